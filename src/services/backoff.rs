// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Capped exponential backoff and a cancellable retry scheduler.

use crate::config::RealtimeConfig;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Reconnection policy: `min(base * 2^attempts, max_delay)`, at most
/// `max_attempts` consecutive attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&RealtimeConfig::default())
    }
}

impl From<&RealtimeConfig> for BackoffPolicy {
    fn from(config: &RealtimeConfig) -> Self {
        Self {
            base: config.base_delay,
            max_delay: config.max_delay,
            max_attempts: config.max_attempts,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the retry that follows attempt number `attempts`.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        // 2^31 already dwarfs any sane cap; avoid overflowing the shift.
        let factor = 1u32.checked_shl(attempts.min(31)).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

/// Runs delayed jobs that can all be cancelled at once.
#[derive(Debug, Default)]
pub struct BackoffScheduler {
    token: CancellationToken,
}

impl BackoffScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `job` after `delay` unless cancelled first.
    pub fn schedule<F>(&self, delay: Duration, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!("Scheduled retry cancelled");
                }
                _ = tokio::time::sleep(delay) => job.await,
            }
        });
    }

    /// Cancel every pending job. Jobs scheduled afterwards are unaffected.
    pub fn cancel_all(&mut self) {
        self.token.cancel();
        self.token = CancellationToken::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for(4), Duration::from_secs(10));
        assert_eq!(policy.delay_for(40), Duration::from_secs(10));
    }

    #[test]
    fn test_exhausted() {
        let policy = BackoffPolicy::default();
        assert!(!policy.exhausted(2));
        assert!(policy.exhausted(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_job_runs_after_delay() {
        let scheduler = BackoffScheduler::new();
        let runs = Arc::new(AtomicU32::new(0));
        let r = runs.clone();
        scheduler.schedule(Duration::from_secs(2), async move {
            r.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(1_999)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_prevents_pending_jobs() {
        let mut scheduler = BackoffScheduler::new();
        let runs = Arc::new(AtomicU32::new(0));
        let r = runs.clone();
        scheduler.schedule(Duration::from_secs(1), async move {
            r.fetch_add(1, Ordering::SeqCst);
        });
        scheduler.cancel_all();

        let r = runs.clone();
        scheduler.schedule(Duration::from_secs(1), async move {
            r.fetch_add(10, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 10);
    }
}
