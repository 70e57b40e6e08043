// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Geo sampler: turns provider fixes into track points.

use crate::config::GeoConfig;
use crate::models::TrackPoint;
use crate::services::geolocation::{
    AcquisitionError, FixOptions, FixResult, GeoProvider, WatchId,
};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Sampled point or a transient acquisition error.
pub type Sample = Result<TrackPoint, AcquisitionError>;

/// Wraps a `GeoProvider` with the ride's acquisition options.
#[derive(Clone)]
pub struct GeoSampler {
    provider: Arc<dyn GeoProvider>,
    initial: FixOptions,
    continuous: FixOptions,
}

impl GeoSampler {
    pub fn new(provider: Arc<dyn GeoProvider>, config: &GeoConfig) -> Self {
        Self {
            provider,
            initial: FixOptions::initial(config),
            continuous: FixOptions::continuous(config),
        }
    }

    /// Acquire a single point, as required before starting or resuming.
    pub async fn first_point(&self) -> Sample {
        let fix = self.provider.current_fix(self.initial).await?;
        Ok(TrackPoint::from_fix(&fix))
    }

    /// Open a continuous sample stream.
    pub fn start(&self) -> SampleStream {
        let watch = self.provider.watch(self.continuous);
        SampleStream {
            id: watch.id,
            fixes: watch.fixes,
            provider: self.provider.clone(),
        }
    }
}

/// Continuous stream of samples. Dropping it cancels the underlying watch.
pub struct SampleStream {
    id: WatchId,
    fixes: mpsc::UnboundedReceiver<FixResult>,
    provider: Arc<dyn GeoProvider>,
}

impl SampleStream {
    /// Next sample, or `None` once the watch has been cancelled.
    pub async fn next(&mut self) -> Option<Sample> {
        let fix = self.fixes.recv().await?;
        Some(fix.map(|f| TrackPoint::from_fix(&f)))
    }

    /// Cancel the watch.
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for SampleStream {
    fn drop(&mut self) {
        self.provider.cancel(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Fix;
    use crate::services::geolocation::PushGeoProvider;
    use chrono::Utc;

    #[tokio::test]
    async fn test_stream_yields_points_and_stops() {
        let provider = PushGeoProvider::new();
        let sampler = GeoSampler::new(Arc::new(provider.clone()), &GeoConfig::default());

        let mut stream = sampler.start();
        provider.push_fix(Fix {
            latitude: 45.0,
            longitude: 9.0,
            speed_mps: Some(5.0),
            accuracy_m: None,
            timestamp: Utc::now(),
        });
        provider.push_error(AcquisitionError::Timeout);

        let point = stream.next().await.unwrap().unwrap();
        assert_eq!(point.speed_kmh, Some(18.0));
        assert_eq!(
            stream.next().await.unwrap(),
            Err(AcquisitionError::Timeout)
        );

        stream.stop();
        assert_eq!(provider.active_watches(), 0);
    }

    #[tokio::test]
    async fn test_first_point_propagates_permission_error() {
        let provider = PushGeoProvider::new();
        provider.set_permission(false);
        let sampler = GeoSampler::new(Arc::new(provider), &GeoConfig::default());
        assert_eq!(
            sampler.first_point().await,
            Err(AcquisitionError::PermissionDenied)
        );
    }
}
