// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Live tracking routes and the device location bridge.

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::{Fix, Route, TrackPoint};
use crate::services::{AcquisitionError, TrackingSnapshot};
use crate::AppState;
use axum::{
    extract::{DefaultBodyLimit, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use std::sync::Arc;

/// Largest photo accepted, after base64 decoding.
const MAX_PHOTO_BYTES: usize = 8 * 1024 * 1024;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/tracking", get(get_tracking))
        .route("/api/tracking/start", post(start))
        .route("/api/tracking/pause", post(pause))
        .route("/api/tracking/resume", post(resume))
        .route("/api/tracking/stop", post(stop))
        .route("/api/tracking/discard", post(discard))
        .route("/api/tracking/annotate", post(annotate))
        .route(
            "/api/tracking/photo",
            post(upload_photo).layer(DefaultBodyLimit::max(MAX_PHOTO_BYTES * 4 / 3 + 4096)),
        )
        .route("/api/tracking/save", post(save))
        .route("/api/tracking/gpx", get(session_gpx))
        .route("/api/fixes", post(push_fix))
        .route("/api/fixes/error", post(push_fix_error))
        .route("/api/fixes/permission", post(set_permission))
}

async fn get_tracking(State(state): State<Arc<AppState>>) -> Json<TrackingSnapshot> {
    Json(state.tracking.snapshot().await)
}

async fn start(State(state): State<Arc<AppState>>) -> Result<Json<TrackingSnapshot>> {
    Ok(Json(state.tracking.start().await?))
}

async fn pause(State(state): State<Arc<AppState>>) -> Result<Json<TrackingSnapshot>> {
    Ok(Json(state.tracking.pause().await?))
}

async fn resume(State(state): State<Arc<AppState>>) -> Result<Json<TrackingSnapshot>> {
    Ok(Json(state.tracking.resume().await?))
}

async fn stop(State(state): State<Arc<AppState>>) -> Result<Json<TrackingSnapshot>> {
    Ok(Json(state.tracking.stop().await?))
}

async fn discard(State(state): State<Arc<AppState>>) -> Result<Json<TrackingSnapshot>> {
    Ok(Json(state.tracking.discard().await?))
}

#[derive(Deserialize)]
struct AnnotateRequest {
    photo_url: Option<String>,
    note: Option<String>,
}

async fn annotate(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AnnotateRequest>,
) -> Result<Json<TrackPoint>> {
    Ok(Json(
        state.tracking.annotate(body.photo_url, body.note).await?,
    ))
}

#[derive(Deserialize)]
struct PhotoRequest {
    content_type: String,
    /// Base64-encoded image bytes
    data: String,
}

async fn upload_photo(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<PhotoRequest>,
) -> Result<Json<TrackPoint>> {
    let bytes = STANDARD
        .decode(body.data.trim())
        .map_err(|_| AppError::BadRequest("Photo data is not valid base64".to_string()))?;
    if bytes.len() > MAX_PHOTO_BYTES {
        return Err(AppError::BadRequest("Photo is too large".to_string()));
    }
    Ok(Json(
        state
            .tracking
            .attach_photo(bytes, &body.content_type, &user.user_id)
            .await?,
    ))
}

#[derive(Deserialize)]
struct SaveRequest {
    title: String,
    description: Option<String>,
}

async fn save(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<SaveRequest>,
) -> Result<(StatusCode, Json<Route>)> {
    let route = state
        .routes
        .save_session(&user.user_id, &body.title, body.description.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(route)))
}

#[derive(Deserialize)]
struct GpxQuery {
    title: Option<String>,
}

async fn session_gpx(
    State(state): State<Arc<AppState>>,
    Query(query): Query<GpxQuery>,
) -> Result<impl IntoResponse> {
    let gpx = state.routes.session_gpx(query.title.as_deref()).await?;
    Ok(([(header::CONTENT_TYPE, "application/gpx+xml")], gpx))
}

async fn push_fix(State(state): State<Arc<AppState>>, Json(fix): Json<Fix>) -> StatusCode {
    if !fix.latitude.is_finite()
        || !fix.longitude.is_finite()
        || fix.latitude.abs() > 90.0
        || fix.longitude.abs() > 180.0
    {
        return StatusCode::UNPROCESSABLE_ENTITY;
    }
    state.geo.push_fix(fix);
    StatusCode::NO_CONTENT
}

#[derive(Deserialize)]
struct FixErrorRequest {
    error: AcquisitionError,
}

async fn push_fix_error(
    State(state): State<Arc<AppState>>,
    Json(body): Json<FixErrorRequest>,
) -> StatusCode {
    match body.error {
        AcquisitionError::PermissionDenied => state.geo.set_permission(false),
        other => state.geo.push_error(other),
    }
    StatusCode::NO_CONTENT
}

#[derive(Deserialize)]
struct PermissionRequest {
    granted: bool,
}

async fn set_permission(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PermissionRequest>,
) -> StatusCode {
    state.geo.set_permission(body.granted);
    StatusCode::NO_CONTENT
}
