// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Geolocation provider seam.
//!
//! `PushGeoProvider` is fed by the device bridge (`POST /api/fixes`): fixes and
//! acquisition errors are pushed in and fanned out to the one-shot waiters
//! and continuous watches.

use crate::config::GeoConfig;
use crate::models::Fix;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

/// Why a position could not be obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Position unavailable")]
    PositionUnavailable,

    #[error("Timed out waiting for a position fix")]
    Timeout,
}

/// Acquisition options, mirroring what mobile geolocation APIs accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixOptions {
    pub high_accuracy: bool,
    pub timeout: Duration,
    /// Oldest cached fix that may be returned instead of waiting
    pub maximum_age: Duration,
}

impl FixOptions {
    /// Options for the one-shot fix taken on start and resume.
    pub fn initial(config: &GeoConfig) -> Self {
        Self {
            high_accuracy: true,
            timeout: config.fix_timeout,
            maximum_age: config.max_age,
        }
    }

    /// Options for the continuous watch while riding.
    pub fn continuous(config: &GeoConfig) -> Self {
        Self {
            high_accuracy: true,
            timeout: config.watch_timeout,
            maximum_age: config.max_age,
        }
    }
}

pub type WatchId = u64;

/// Result of a single acquisition.
pub type FixResult = Result<Fix, AcquisitionError>;

/// Open continuous subscription. Errors are delivered in-band and do not
/// end the watch; the receiver closes once the watch is cancelled.
pub struct FixWatch {
    pub id: WatchId,
    pub fixes: mpsc::UnboundedReceiver<FixResult>,
}

/// Source of position fixes.
#[async_trait]
pub trait GeoProvider: Send + Sync {
    /// Obtain one fix, honoring `maximum_age` and `timeout`.
    async fn current_fix(&self, options: FixOptions) -> FixResult;

    /// Open a continuous watch.
    fn watch(&self, options: FixOptions) -> FixWatch;

    /// Cancel a watch. Unknown ids are ignored.
    fn cancel(&self, id: WatchId);
}

struct PushInner {
    permitted: AtomicBool,
    last_fix: Mutex<Option<Fix>>,
    events: broadcast::Sender<FixResult>,
    watchers: DashMap<WatchId, mpsc::UnboundedSender<FixResult>>,
    next_id: AtomicU64,
}

/// Provider fed externally with fixes and errors.
#[derive(Clone)]
pub struct PushGeoProvider {
    inner: Arc<PushInner>,
}

impl Default for PushGeoProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl PushGeoProvider {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(PushInner {
                permitted: AtomicBool::new(true),
                last_fix: Mutex::new(None),
                events,
                watchers: DashMap::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Deliver a new fix to waiters and watches.
    ///
    /// Fixes pushed while permission is revoked are dropped.
    pub fn push_fix(&self, fix: Fix) {
        if !self.inner.permitted.load(Ordering::SeqCst) {
            tracing::debug!("Dropping fix pushed while location permission is revoked");
            return;
        }
        if let Ok(mut last) = self.inner.last_fix.lock() {
            *last = Some(fix.clone());
        }
        self.fan_out(Ok(fix));
    }

    /// Deliver an acquisition error to waiters and watches.
    pub fn push_error(&self, error: AcquisitionError) {
        tracing::warn!(error = %error, "Geolocation error pushed");
        self.fan_out(Err(error));
    }

    /// Grant or revoke location permission. Revoking notifies open watches.
    pub fn set_permission(&self, granted: bool) {
        let was = self.inner.permitted.swap(granted, Ordering::SeqCst);
        if was && !granted {
            if let Ok(mut last) = self.inner.last_fix.lock() {
                *last = None;
            }
            self.fan_out(Err(AcquisitionError::PermissionDenied));
        }
    }

    /// Number of open watches.
    pub fn active_watches(&self) -> usize {
        self.inner.watchers.len()
    }

    fn fan_out(&self, event: FixResult) {
        // No receivers is fine: nobody is waiting for a one-shot fix.
        let _ = self.inner.events.send(event.clone());
        self.inner
            .watchers
            .retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    fn cached_fix(&self, maximum_age: Duration) -> Option<Fix> {
        let last = self.inner.last_fix.lock().ok()?.clone()?;
        let max_age = chrono::Duration::from_std(maximum_age).ok()?;
        (Utc::now() - last.timestamp <= max_age).then_some(last)
    }
}

#[async_trait]
impl GeoProvider for PushGeoProvider {
    async fn current_fix(&self, options: FixOptions) -> FixResult {
        if !self.inner.permitted.load(Ordering::SeqCst) {
            return Err(AcquisitionError::PermissionDenied);
        }

        // Subscribe before checking the cache so a fix pushed in between is not lost.
        let mut events = self.inner.events.subscribe();
        if let Some(fix) = self.cached_fix(options.maximum_age) {
            return Ok(fix);
        }

        let wait = async {
            loop {
                match events.recv().await {
                    Ok(result) => return result,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Fix waiter lagged, continuing");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(AcquisitionError::PositionUnavailable)
                    }
                }
            }
        };

        tokio::time::timeout(options.timeout, wait)
            .await
            .unwrap_or(Err(AcquisitionError::Timeout))
    }

    fn watch(&self, options: FixOptions) -> FixWatch {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (source_tx, mut source) = mpsc::unbounded_channel();
        let (tx, fixes) = mpsc::unbounded_channel();
        self.inner.watchers.insert(id, source_tx);

        // Each wait for the next fix is bounded by the per-fix timeout. A
        // timeout is reported in-band and the watch keeps going; cancelling
        // closes `source`, which ends the relay and closes `fixes`.
        tokio::spawn(async move {
            loop {
                let next = match tokio::time::timeout(options.timeout, source.recv()).await {
                    Ok(Some(result)) => result,
                    Ok(None) => break,
                    Err(_) => {
                        tracing::debug!(watch_id = id, "No fix within watch timeout");
                        Err(AcquisitionError::Timeout)
                    }
                };
                if tx.send(next).is_err() {
                    break;
                }
            }
        });

        tracing::debug!(
            watch_id = id,
            timeout_ms = options.timeout.as_millis() as u64,
            "Geolocation watch opened"
        );
        FixWatch { id, fixes }
    }

    fn cancel(&self, id: WatchId) {
        if self.inner.watchers.remove(&id).is_some() {
            tracing::debug!(watch_id = id, "Geolocation watch cancelled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> FixOptions {
        FixOptions {
            high_accuracy: true,
            timeout: Duration::from_millis(200),
            maximum_age: Duration::from_secs(5),
        }
    }

    fn fix_now(lat: f64) -> Fix {
        Fix {
            latitude: lat,
            longitude: 9.0,
            speed_mps: None,
            accuracy_m: Some(5.0),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_current_fix_reuses_recent_fix() {
        let provider = PushGeoProvider::new();
        provider.push_fix(fix_now(45.0));
        let fix = provider.current_fix(options()).await.unwrap();
        assert_eq!(fix.latitude, 45.0);
    }

    #[tokio::test]
    async fn test_current_fix_waits_for_next_push() {
        let provider = PushGeoProvider::new();
        let pusher = provider.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            pusher.push_fix(fix_now(46.0));
        });
        let fix = provider.current_fix(options()).await.unwrap();
        assert_eq!(fix.latitude, 46.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_current_fix_times_out() {
        let provider = PushGeoProvider::new();
        let result = provider.current_fix(options()).await;
        assert_eq!(result, Err(AcquisitionError::Timeout));
    }

    #[tokio::test]
    async fn test_stale_fix_not_reused() {
        let provider = PushGeoProvider::new();
        let mut old = fix_now(45.0);
        old.timestamp = Utc::now() - chrono::Duration::seconds(60);
        provider.push_fix(old);

        let mut opts = options();
        opts.timeout = Duration::from_millis(10);
        assert_eq!(
            provider.current_fix(opts).await,
            Err(AcquisitionError::Timeout)
        );
    }

    #[tokio::test]
    async fn test_permission_denied() {
        let provider = PushGeoProvider::new();
        provider.push_fix(fix_now(45.0));
        provider.set_permission(false);
        assert_eq!(
            provider.current_fix(options()).await,
            Err(AcquisitionError::PermissionDenied)
        );
    }

    #[tokio::test]
    async fn test_watch_receives_fixes_and_errors_until_cancelled() {
        let provider = PushGeoProvider::new();
        let mut watch = provider.watch(options());
        assert_eq!(provider.active_watches(), 1);

        provider.push_fix(fix_now(45.0));
        provider.push_error(AcquisitionError::PositionUnavailable);
        provider.push_fix(fix_now(45.1));

        assert_eq!(watch.fixes.recv().await.unwrap().unwrap().latitude, 45.0);
        assert_eq!(
            watch.fixes.recv().await.unwrap(),
            Err(AcquisitionError::PositionUnavailable)
        );
        assert_eq!(watch.fixes.recv().await.unwrap().unwrap().latitude, 45.1);

        provider.cancel(watch.id);
        assert_eq!(provider.active_watches(), 0);
        assert!(watch.fixes.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_watch_reports_timeouts_and_stays_open() {
        let provider = PushGeoProvider::new();
        let mut opts = options();
        opts.timeout = Duration::from_millis(50);
        let mut watch = provider.watch(opts);

        let started = tokio::time::Instant::now();
        assert_eq!(
            watch.fixes.recv().await.unwrap(),
            Err(AcquisitionError::Timeout)
        );
        assert_eq!(started.elapsed(), Duration::from_millis(50));
        assert_eq!(
            watch.fixes.recv().await.unwrap(),
            Err(AcquisitionError::Timeout)
        );

        provider.push_fix(fix_now(45.2));
        assert_eq!(watch.fixes.recv().await.unwrap().unwrap().latitude, 45.2);
        assert_eq!(provider.active_watches(), 1);

        provider.cancel(watch.id);
        assert!(watch.fixes.recv().await.is_none());
    }
}
