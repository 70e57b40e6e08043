// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Persisted route records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Who can see a route or a feed post.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum Visibility {
    #[default]
    Private,
    Friends,
    Public,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Private => "private",
            Visibility::Friends => "friends",
            Visibility::Public => "public",
        }
    }
}

/// One vertex of a route geometry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

/// Route geometry as stored in the `points` column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct RouteGeometry {
    pub coordinates: Vec<LatLng>,
}

/// Per-point details kept with a recorded route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct PointMetadata {
    pub lat: f64,
    pub lng: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_kmh: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Bounding box of a route, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct RouteBounds {
    pub min_lat: f64,
    pub min_lng: f64,
    pub max_lat: f64,
    pub max_lng: f64,
}

/// Ride statistics and annotations captured while tracking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct RouteMetadata {
    pub points: Vec<PointMetadata>,
    pub duration_seconds: f64,
    pub average_speed_kmh: f64,
    pub max_speed_kmh: f64,
    #[serde(default)]
    pub bounds: Option<RouteBounds>,
}

/// Insert payload for the `routes` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewRoute {
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub distance_km: f64,
    pub points: RouteGeometry,
    pub encoded_polyline: String,
    pub metadata: Option<RouteMetadata>,
    pub gpx_url: Option<String>,
    pub visibility: Visibility,
    pub is_published: bool,
}

/// Stored route record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct Route {
    pub id: String,
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub distance_km: f64,
    #[serde(default)]
    pub points: RouteGeometry,
    #[serde(default)]
    pub encoded_polyline: Option<String>,
    #[serde(default)]
    pub metadata: Option<RouteMetadata>,
    #[serde(default)]
    pub gpx_url: Option<String>,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub is_published: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Route {
    /// Materialize a stored record from an insert payload.
    pub fn from_new(id: String, new: &NewRoute, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id: new.user_id.clone(),
            title: new.title.clone(),
            description: new.description.clone(),
            distance_km: new.distance_km,
            points: new.points.clone(),
            encoded_polyline: Some(new.encoded_polyline.clone()),
            metadata: new.metadata.clone(),
            gpx_url: new.gpx_url.clone(),
            visibility: new.visibility,
            is_published: new.is_published,
            created_at: Some(created_at),
        }
    }
}
