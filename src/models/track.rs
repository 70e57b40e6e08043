// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! GPS fixes and the track points recorded from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Conversion factor from metres per second to kilometres per hour.
const MPS_TO_KMH: f64 = 3.6;

/// One reading from the geolocation provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
    /// Ground speed in metres per second, as reported by the device.
    #[serde(default)]
    pub speed_mps: Option<f64>,
    /// Horizontal accuracy radius in metres.
    #[serde(default)]
    pub accuracy_m: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// A bare latitude/longitude pair, used for the live map position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

/// A point accepted into a tracking session.
///
/// Everything except `photo_url` and `note` is fixed at capture time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct TrackPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub captured_at: DateTime<Utc>,
    /// Instantaneous speed in km/h
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_kmh: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_m: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl TrackPoint {
    pub fn new(latitude: f64, longitude: f64, captured_at: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            captured_at,
            speed_kmh: None,
            accuracy_m: None,
            photo_url: None,
            note: None,
        }
    }

    pub fn with_speed(mut self, speed_kmh: f64) -> Self {
        self.speed_kmh = Some(speed_kmh);
        self
    }

    /// Build a point from a provider fix, converting speed to km/h.
    ///
    /// Devices report a stationary or unknown heading speed as zero or a
    /// negative number; both are stored as `0`.
    pub fn from_fix(fix: &Fix) -> Self {
        Self {
            latitude: fix.latitude,
            longitude: fix.longitude,
            captured_at: fix.timestamp,
            speed_kmh: fix
                .speed_mps
                .map(|s| if s > 0.0 { s * MPS_TO_KMH } else { 0.0 }),
            accuracy_m: fix.accuracy_m.filter(|a| *a > 0.0),
            photo_url: None,
            note: None,
        }
    }

    /// Speed used for running totals: absent, negative or non-finite reads as 0.
    pub fn effective_speed_kmh(&self) -> f64 {
        self.speed_kmh
            .filter(|s| s.is_finite() && *s > 0.0)
            .unwrap_or(0.0)
    }

    pub fn position(&self) -> Position {
        Position {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }

    pub fn has_annotation(&self) -> bool {
        self.photo_url.is_some() || self.note.is_some()
    }
}

impl From<&Fix> for Position {
    fn from(fix: &Fix) -> Self {
        Self {
            latitude: fix.latitude,
            longitude: fix.longitude,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fix(speed_mps: Option<f64>, accuracy_m: Option<f64>) -> Fix {
        Fix {
            latitude: 45.0,
            longitude: 9.0,
            speed_mps,
            accuracy_m,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_from_fix_converts_speed_to_kmh() {
        let point = TrackPoint::from_fix(&fix(Some(10.0), Some(4.0)));
        assert_eq!(point.speed_kmh, Some(36.0));
        assert_eq!(point.accuracy_m, Some(4.0));
    }

    #[test]
    fn test_from_fix_negative_speed_is_zero() {
        let point = TrackPoint::from_fix(&fix(Some(-1.0), None));
        assert_eq!(point.speed_kmh, Some(0.0));
        assert_eq!(point.effective_speed_kmh(), 0.0);
    }

    #[test]
    fn test_from_fix_drops_zero_accuracy() {
        let point = TrackPoint::from_fix(&fix(None, Some(0.0)));
        assert_eq!(point.speed_kmh, None);
        assert_eq!(point.accuracy_m, None);
    }

    #[test]
    fn test_effective_speed_ignores_nan() {
        let point = TrackPoint::new(0.0, 0.0, Utc::now()).with_speed(f64::NAN);
        assert_eq!(point.effective_speed_kmh(), 0.0);
    }
}
