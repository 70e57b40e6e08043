// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Tracking service: drives the session state machine from live samples.
//!
//! The service owns the rider's single `TrackingSession`. While Active, a
//! pump task drains the sample stream into the session; pause and stop cancel
//! the pump. Samples that race a pause or stop are rejected by the session's
//! own state check.

use crate::db::BlobStore;
use crate::error::AppError;
use crate::models::{Position, TrackPoint};
use crate::services::geolocation::AcquisitionError;
use crate::services::notify::Notifier;
use crate::services::sampler::GeoSampler;
use crate::services::session::{
    TrackingAction, TrackingError, TrackingSession, TrackingSnapshot, TrackingState,
};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Pump {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct TrackingInner {
    session: TrackingSession,
    current_position: Option<Position>,
    last_error: Option<String>,
    pump: Option<Pump>,
}

impl TrackingInner {
    fn snapshot(&self) -> TrackingSnapshot {
        TrackingSnapshot {
            session: self.session.snapshot(Utc::now()),
            current_position: self.current_position,
            last_error: self.last_error.clone(),
        }
    }

    fn stop_pump(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.token.cancel();
            // The task may be waiting on this lock; it exits on its own.
            drop(pump.handle);
        }
    }

    fn require(&self, state: TrackingState, action: TrackingAction) -> Result<(), TrackingError> {
        let current = self.session.state();
        if current == state {
            Ok(())
        } else {
            Err(TrackingError::InvalidTransition {
                state: current,
                action,
            })
        }
    }
}

/// Shared handle to the rider's tracking session.
#[derive(Clone)]
pub struct TrackingService {
    sampler: GeoSampler,
    blobs: Arc<dyn BlobStore>,
    photo_bucket: String,
    notifier: Notifier,
    inner: Arc<Mutex<TrackingInner>>,
}

impl TrackingService {
    pub fn new(
        sampler: GeoSampler,
        blobs: Arc<dyn BlobStore>,
        photo_bucket: &str,
        notifier: Notifier,
    ) -> Self {
        Self {
            sampler,
            blobs,
            photo_bucket: photo_bucket.to_string(),
            notifier,
            inner: Arc::new(Mutex::new(TrackingInner::default())),
        }
    }

    pub async fn snapshot(&self) -> TrackingSnapshot {
        self.inner.lock().await.snapshot()
    }

    /// Idle → Active. Fails, staying Idle, when no initial fix is available.
    pub async fn start(&self) -> Result<TrackingSnapshot, AppError> {
        self.inner
            .lock()
            .await
            .require(TrackingState::Idle, TrackingAction::Start)?;

        // Acquire without holding the lock so snapshots stay responsive.
        let first = self.acquire().await?;

        let mut inner = self.inner.lock().await;
        inner.session.start(first.clone(), Utc::now())?;
        inner.current_position = Some(first.position());
        inner.last_error = None;
        self.spawn_pump(&mut inner);

        tracing::info!(
            latitude = first.latitude,
            longitude = first.longitude,
            "Tracking started"
        );
        self.notifier.info("Tracking started", "Recording your ride");
        Ok(inner.snapshot())
    }

    /// Active → Paused.
    pub async fn pause(&self) -> Result<TrackingSnapshot, AppError> {
        let mut inner = self.inner.lock().await;
        inner.session.pause(Utc::now())?;
        inner.stop_pump();
        tracing::info!(points = inner.session.points().len(), "Tracking paused");
        Ok(inner.snapshot())
    }

    /// Paused → Active. A fresh fix is required; it only refreshes the
    /// current position and is not recorded.
    pub async fn resume(&self) -> Result<TrackingSnapshot, AppError> {
        self.inner
            .lock()
            .await
            .require(TrackingState::Paused, TrackingAction::Resume)?;

        let fresh = self.acquire().await?;

        let mut inner = self.inner.lock().await;
        inner.session.resume(Utc::now())?;
        inner.current_position = Some(fresh.position());
        inner.last_error = None;
        self.spawn_pump(&mut inner);
        tracing::info!(
            paused_seconds = inner.session.paused_seconds(),
            "Tracking resumed"
        );
        Ok(inner.snapshot())
    }

    /// Active or Paused → Stopped.
    pub async fn stop(&self) -> Result<TrackingSnapshot, AppError> {
        let mut inner = self.inner.lock().await;
        inner.session.stop(Utc::now())?;
        inner.stop_pump();
        tracing::info!(
            points = inner.session.points().len(),
            distance_km = inner.session.distance_km(),
            "Tracking stopped"
        );
        Ok(inner.snapshot())
    }

    /// Stopped → Idle without saving.
    pub async fn discard(&self) -> Result<TrackingSnapshot, AppError> {
        let mut inner = self.inner.lock().await;
        inner.session.discard()?;
        inner.last_error = None;
        tracing::info!("Tracking session discarded");
        Ok(inner.snapshot())
    }

    /// Attach a note and/or photo URL to the last point while paused.
    pub async fn annotate(
        &self,
        photo_url: Option<String>,
        note: Option<String>,
    ) -> Result<TrackPoint, AppError> {
        let note = note
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        let photo_url = photo_url.filter(|u| !u.trim().is_empty());
        if photo_url.is_none() && note.is_none() {
            return Err(AppError::BadRequest("Nothing to annotate".to_string()));
        }

        let mut inner = self.inner.lock().await;
        let point = inner.session.annotate(photo_url, note)?.clone();
        tracing::info!(
            has_photo = point.photo_url.is_some(),
            has_note = point.note.is_some(),
            "Waypoint annotated"
        );
        Ok(point)
    }

    /// Upload a photo and attach it to the last point while paused.
    ///
    /// The upload is removed again if the annotation is rejected.
    pub async fn attach_photo(
        &self,
        bytes: Vec<u8>,
        content_type: &str,
        user_id: &str,
    ) -> Result<TrackPoint, AppError> {
        if bytes.is_empty() {
            return Err(AppError::BadRequest("Photo is empty".to_string()));
        }
        let ext = photo_extension(content_type).ok_or_else(|| {
            AppError::BadRequest(format!("Unsupported photo type: {}", content_type))
        })?;
        self.inner
            .lock()
            .await
            .session
            .check_annotation(true, false)?;

        let path = format!("{}/{}.{}", user_id, Utc::now().timestamp_millis(), ext);
        let url = self
            .blobs
            .upload(&self.photo_bucket, &path, bytes, content_type)
            .await?;

        let annotated = {
            let mut inner = self.inner.lock().await;
            inner.session.annotate(Some(url), None).cloned()
        };

        match annotated {
            Ok(point) => Ok(point),
            Err(e) => {
                if let Err(remove_err) = self.blobs.remove(&self.photo_bucket, &path).await {
                    tracing::warn!(error = %remove_err, path, "Failed to remove orphaned photo");
                }
                Err(e.into())
            }
        }
    }

    /// Copy of the session once it is Stopped.
    pub async fn stopped_session(&self) -> Result<TrackingSession, AppError> {
        Ok(self.inner.lock().await.session.finished()?.clone())
    }

    /// Return to Idle after the stopped session was persisted.
    pub async fn reset_after_save(&self) {
        let mut inner = self.inner.lock().await;
        if inner.session.state() == TrackingState::Stopped {
            inner.session.reset();
            inner.last_error = None;
        }
    }

    /// Abandon whatever is in progress, e.g. on logout.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.stop_pump();
        *inner = TrackingInner::default();
    }

    async fn acquire(&self) -> Result<TrackPoint, AppError> {
        match self.sampler.first_point().await {
            Ok(point) => Ok(point),
            Err(e) => {
                record_error(&self.inner, &self.notifier, e).await;
                Err(e.into())
            }
        }
    }

    fn spawn_pump(&self, inner: &mut TrackingInner) {
        inner.stop_pump();

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let mut stream = self.sampler.start();
        let state = self.inner.clone();
        let notifier = self.notifier.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    sample = stream.next() => match sample {
                        None => break,
                        Some(Ok(point)) => {
                            let mut inner = state.lock().await;
                            if cancelled.is_cancelled() {
                                break;
                            }
                            inner.current_position = Some(point.position());
                            inner.last_error = None;
                            if !inner.session.record(point) {
                                tracing::debug!("Sample dropped outside an active session");
                            }
                        }
                        Some(Err(e)) => record_error(&state, &notifier, e).await,
                    }
                }
            }
            stream.stop();
            tracing::debug!("Sample pump stopped");
        });

        inner.pump = Some(Pump { token, handle });
    }
}

async fn record_error(inner: &Mutex<TrackingInner>, notifier: &Notifier, error: AcquisitionError) {
    inner.lock().await.last_error = Some(error.to_string());
    notifier.error("Location error", error.to_string());
}

fn photo_extension(content_type: &str) -> Option<&'static str> {
    match content_type.split(';').next()?.trim() {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GeoConfig;
    use crate::db::MemoryBlobStore;
    use crate::models::Fix;
    use crate::services::geolocation::PushGeoProvider;
    use std::time::Duration;

    fn fix(lat: f64) -> Fix {
        Fix {
            latitude: lat,
            longitude: 9.0,
            speed_mps: Some(10.0),
            accuracy_m: Some(5.0),
            timestamp: Utc::now(),
        }
    }

    fn service() -> (TrackingService, PushGeoProvider, MemoryBlobStore) {
        let provider = PushGeoProvider::new();
        let blobs = MemoryBlobStore::new();
        let geo = GeoConfig {
            fix_timeout: Duration::from_millis(100),
            ..GeoConfig::default()
        };
        let service = TrackingService::new(
            GeoSampler::new(Arc::new(provider.clone()), &geo),
            Arc::new(blobs.clone()),
            "route-photos",
            Notifier::new(),
        );
        (service, provider, blobs)
    }

    async fn wait_for_points(service: &TrackingService, count: usize) {
        for _ in 0..100 {
            if service.snapshot().await.session.point_count >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {} points", count);
    }

    #[tokio::test]
    async fn test_start_without_fix_stays_idle() {
        let (service, _provider, _) = service();
        let err = service.start().await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Acquisition(AcquisitionError::Timeout)
        ));
        let snapshot = service.snapshot().await;
        assert_eq!(snapshot.session.state, TrackingState::Idle);
        assert!(snapshot.last_error.is_some());
    }

    #[tokio::test]
    async fn test_samples_recorded_only_while_active() {
        let (service, provider, _) = service();
        provider.push_fix(fix(45.0));
        service.start().await.unwrap();

        provider.push_fix(fix(45.001));
        wait_for_points(&service, 2).await;

        service.pause().await.unwrap();
        provider.push_fix(fix(45.002));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(service.snapshot().await.session.point_count, 2);

        service.stop().await.unwrap();
        let session = service.stopped_session().await.unwrap();
        assert_eq!(session.points().len(), 2);
        assert!(session.distance_km() > 0.1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_gps_reports_timeout_while_active() {
        let (service, provider, _) = service();
        provider.push_fix(fix(45.0));
        service.start().await.unwrap();

        // Default watch timeout is 5 s.
        tokio::time::sleep(Duration::from_secs(6)).await;
        let snapshot = service.snapshot().await;
        assert_eq!(snapshot.session.state, TrackingState::Active);
        assert_eq!(
            snapshot.last_error.as_deref(),
            Some("Timed out waiting for a position fix")
        );

        provider.push_fix(fix(45.001));
        wait_for_points(&service, 2).await;
        assert!(service.snapshot().await.last_error.is_none());
    }

    #[tokio::test]
    async fn test_resume_does_not_record_fresh_fix() {
        let (service, provider, _) = service();
        provider.push_fix(fix(45.0));
        service.start().await.unwrap();
        service.pause().await.unwrap();

        provider.push_fix(fix(45.5));
        let snapshot = service.resume().await.unwrap();
        assert_eq!(snapshot.session.state, TrackingState::Active);
        assert_eq!(snapshot.session.point_count, 1);
        assert_eq!(snapshot.current_position.unwrap().latitude, 45.5);
    }

    #[tokio::test]
    async fn test_invalid_transitions_rejected() {
        let (service, provider, _) = service();
        assert!(matches!(
            service.pause().await,
            Err(AppError::Tracking(TrackingError::InvalidTransition { .. }))
        ));
        provider.push_fix(fix(45.0));
        service.start().await.unwrap();
        assert!(matches!(
            service.start().await,
            Err(AppError::Tracking(TrackingError::InvalidTransition { .. }))
        ));
        assert!(service.discard().await.is_err());
    }

    #[tokio::test]
    async fn test_attach_photo_while_paused() {
        let (service, provider, blobs) = service();
        provider.push_fix(fix(45.0));
        service.start().await.unwrap();
        service.pause().await.unwrap();

        let point = service
            .attach_photo(vec![0xff, 0xd8], "image/jpeg", "u1")
            .await
            .unwrap();
        assert!(point
            .photo_url
            .as_deref()
            .unwrap()
            .starts_with("memory://route-photos/u1/"));
        assert_eq!(blobs.len(), 1);

        let err = service
            .attach_photo(vec![0xff, 0xd8], "image/jpeg", "u1")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Tracking(TrackingError::AlreadyAnnotated("photo"))
        ));
        assert_eq!(blobs.len(), 1);
    }

    #[tokio::test]
    async fn test_annotate_requires_content() {
        let (service, provider, _) = service();
        provider.push_fix(fix(45.0));
        service.start().await.unwrap();
        service.pause().await.unwrap();

        assert!(matches!(
            service.annotate(None, Some("   ".into())).await,
            Err(AppError::BadRequest(_))
        ));
        let point = service
            .annotate(None, Some(" Great view ".into()))
            .await
            .unwrap();
        assert_eq!(point.note.as_deref(), Some("Great view"));
    }

    #[test]
    fn test_photo_extension() {
        assert_eq!(photo_extension("image/jpeg"), Some("jpg"));
        assert_eq!(photo_extension("image/png; charset=binary"), Some("png"));
        assert_eq!(photo_extension("text/plain"), None);
    }
}
