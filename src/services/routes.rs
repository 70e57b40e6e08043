// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Route service: saving rides, GPX import and publishing to the feed.

use crate::db::{BlobStore, DataStore};
use crate::error::AppError;
use crate::models::{NewFeedPost, Route, Visibility};
use crate::services::export::{GpxTrack, RouteExporter};
use crate::services::notify::Notifier;
use crate::services::tracking::TrackingService;
use chrono::Utc;
use std::sync::Arc;

/// Largest GPX upload accepted.
pub const MAX_GPX_BYTES: usize = 10 * 1024 * 1024;

#[derive(Clone)]
pub struct RouteService {
    db: Arc<dyn DataStore>,
    blobs: Arc<dyn BlobStore>,
    tracking: TrackingService,
    notifier: Notifier,
    gpx_bucket: String,
}

impl RouteService {
    pub fn new(
        db: Arc<dyn DataStore>,
        blobs: Arc<dyn BlobStore>,
        tracking: TrackingService,
        notifier: Notifier,
        gpx_bucket: &str,
    ) -> Self {
        Self {
            db,
            blobs,
            tracking,
            notifier,
            gpx_bucket: gpx_bucket.to_string(),
        }
    }

    /// Persist the stopped session and return the tracker to Idle.
    ///
    /// On failure the session stays Stopped so the save can be retried.
    pub async fn save_session(
        &self,
        user_id: &str,
        title: &str,
        description: Option<&str>,
    ) -> Result<Route, AppError> {
        let session = self.tracking.stopped_session().await?;
        let new_route =
            RouteExporter::build_route(&session, user_id, title, description, Utc::now())?;

        let route = match self.db.insert_route(&new_route).await {
            Ok(route) => route,
            Err(e) => {
                self.notifier.error("Save failed", "Could not save the route");
                return Err(e);
            }
        };

        self.tracking.reset_after_save().await;
        tracing::info!(
            route_id = %route.id,
            distance_km = route.distance_km,
            points = route.points.coordinates.len(),
            "Route saved"
        );
        self.notifier
            .info("Route saved", "Your route was saved successfully");
        Ok(route)
    }

    /// GPX document for the stopped session, before it is saved.
    pub async fn session_gpx(&self, title: Option<&str>) -> Result<String, AppError> {
        let session = self.tracking.stopped_session().await?;
        let default_title;
        let title = match title.map(str::trim).filter(|t| !t.is_empty()) {
            Some(t) => t,
            None => {
                let started = session.started_at().unwrap_or_else(Utc::now);
                default_title = format!("Ride {}", started.format("%Y-%m-%d %H:%M"));
                &default_title
            }
        };
        Ok(RouteExporter::to_gpx(&GpxTrack::from_session(
            &session, title, None,
        ))?)
    }

    /// Import a GPX file as a new private route.
    ///
    /// The file is validated and parsed before it is uploaded; the upload is
    /// removed again if the insert fails.
    pub async fn import_gpx(
        &self,
        user_id: &str,
        file_name: &str,
        bytes: Vec<u8>,
        title: &str,
        description: Option<&str>,
    ) -> Result<Route, AppError> {
        if bytes.len() > MAX_GPX_BYTES {
            return Err(AppError::BadRequest("GPX file is too large".to_string()));
        }
        let text = std::str::from_utf8(&bytes)
            .map_err(|_| AppError::BadRequest("GPX file is not valid UTF-8".to_string()))?;
        let track = RouteExporter::parse_gpx(text)?;
        let mut new_route =
            RouteExporter::build_imported_route(&track, user_id, title, description, None)?;

        let path = format!(
            "{}-{}",
            Utc::now().timestamp_millis(),
            sanitize_file_name(file_name)
        );
        let url = self
            .blobs
            .upload(&self.gpx_bucket, &path, bytes, "application/gpx+xml")
            .await?;
        new_route.gpx_url = Some(url);

        let route = match self.db.insert_route(&new_route).await {
            Ok(route) => route,
            Err(e) => {
                if let Err(remove_err) = self.blobs.remove(&self.gpx_bucket, &path).await {
                    tracing::warn!(error = %remove_err, path, "Failed to remove orphaned GPX file");
                }
                return Err(e);
            }
        };

        tracing::info!(
            route_id = %route.id,
            points = track.points.len(),
            distance_km = route.distance_km,
            "GPX route imported"
        );
        self.notifier
            .info("Route uploaded", "Your GPX route was uploaded successfully");
        Ok(route)
    }

    /// The rider's routes, newest first.
    pub async fn list_routes(&self, user_id: &str) -> Result<Vec<Route>, AppError> {
        self.db.list_routes(user_id).await
    }

    /// GPX document for a stored route visible to the rider.
    pub async fn route_gpx(&self, user_id: &str, route_id: &str) -> Result<String, AppError> {
        let route = self
            .db
            .get_route(route_id)
            .await?
            .filter(|r| r.user_id == user_id || r.visibility == Visibility::Public)
            .ok_or_else(|| AppError::NotFound(format!("Route {}", route_id)))?;
        Ok(RouteExporter::to_gpx(&GpxTrack::from_route(&route))?)
    }

    /// Make a route public and announce it in the feed.
    pub async fn publish(&self, user_id: &str, route_id: &str) -> Result<Route, AppError> {
        let route = self.owned_route(user_id, route_id).await?;
        if route.is_published {
            return Ok(route);
        }

        let published = self
            .db
            .set_route_visibility(route_id, Visibility::Public, true)
            .await?;

        if let Err(e) = self.db.insert_post(&NewFeedPost::for_route(&published)).await {
            // Undo the visibility change.
            if let Err(revert_err) = self
                .db
                .set_route_visibility(route_id, route.visibility, route.is_published)
                .await
            {
                tracing::error!(error = %revert_err, route_id, "Failed to revert route visibility");
            }
            return Err(e);
        }

        tracing::info!(route_id, "Route published");
        self.notifier
            .info("Route published", "Your route is now visible in the feed");
        Ok(published)
    }

    /// Make a route private and remove its feed posts.
    pub async fn unpublish(&self, user_id: &str, route_id: &str) -> Result<Route, AppError> {
        self.owned_route(user_id, route_id).await?;
        let route = self
            .db
            .set_route_visibility(route_id, Visibility::Private, false)
            .await?;
        self.db.delete_route_posts(route_id).await?;

        tracing::info!(route_id, "Route unpublished");
        self.notifier
            .info("Route unpublished", "Your route is now private");
        Ok(route)
    }

    async fn owned_route(&self, user_id: &str, route_id: &str) -> Result<Route, AppError> {
        self.db
            .get_route(route_id)
            .await?
            .filter(|r| r.user_id == user_id)
            .ok_or_else(|| AppError::NotFound(format!("Route {}", route_id)))
    }
}

/// Reduce an uploaded file name to a safe storage path segment.
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "route.gpx".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("my ride.gpx"), "my_ride.gpx");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\rides\\alps.gpx"), "alps.gpx");
        assert_eq!(sanitize_file_name(".."), "route.gpx");
    }
}
