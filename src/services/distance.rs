// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Great-circle distance and running ride totals.
//!
//! Every fix is trusted as delivered: no smoothing, accuracy threshold or
//! outlier rejection is applied, so GPS jitter while stationary adds to the
//! distance.

use crate::models::TrackPoint;
use serde::Serialize;

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance in kilometres between two `(latitude, longitude)`
/// pairs given in degrees.
///
/// ```
/// use moto_tracker::services::distance::haversine_km;
///
/// // 0.001 degrees of latitude is roughly 111 metres
/// let d = haversine_km((45.0, 9.0), (45.001, 9.0));
/// assert!((d - 0.1112).abs() < 0.001);
/// ```
pub fn haversine_km(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lat1, lon1) = from;
    let (lat2, lon2) = to;

    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Distance in kilometres between two track points.
pub fn distance_km(a: &TrackPoint, b: &TrackPoint) -> f64 {
    haversine_km((a.latitude, a.longitude), (b.latitude, b.longitude))
}

/// Total length of a point sequence, summing consecutive segments.
pub fn path_distance_km(points: &[TrackPoint]) -> f64 {
    points.windows(2).map(|w| distance_km(&w[0], &w[1])).sum()
}

/// Running distance and speed totals for one ride.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Accumulator {
    distance_km: f64,
    current_speed_kmh: f64,
    max_speed_kmh: f64,
    #[serde(skip)]
    last: Option<(f64, f64)>,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build totals for an existing point sequence.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a TrackPoint>) -> Self {
        let mut acc = Self::new();
        for point in points {
            acc.push(point);
        }
        acc
    }

    /// Feed the next accepted point. Returns the segment length added.
    pub fn push(&mut self, point: &TrackPoint) -> f64 {
        let here = (point.latitude, point.longitude);
        let segment = self.last.map_or(0.0, |prev| haversine_km(prev, here));

        self.distance_km += segment;
        self.current_speed_kmh = point.effective_speed_kmh();
        self.max_speed_kmh = self.max_speed_kmh.max(self.current_speed_kmh);
        self.last = Some(here);

        segment
    }

    pub fn distance_km(&self) -> f64 {
        self.distance_km
    }

    pub fn current_speed_kmh(&self) -> f64 {
        self.current_speed_kmh
    }

    pub fn max_speed_kmh(&self) -> f64 {
        self.max_speed_kmh
    }
}
