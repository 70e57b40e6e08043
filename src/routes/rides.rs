// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Saved routes: listing, GPX import/export and publishing.

use crate::error::Result;
use crate::middleware::auth::AuthUser;
use crate::models::Route;
use crate::services::routes::MAX_GPX_BYTES;
use crate::AppState;
use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/routes", get(list_routes))
        .route(
            "/api/routes/import",
            post(import_route).layer(DefaultBodyLimit::max(MAX_GPX_BYTES + 64 * 1024)),
        )
        .route("/api/routes/{id}/gpx", get(route_gpx))
        .route("/api/routes/{id}/publish", post(publish))
        .route("/api/routes/{id}/unpublish", post(unpublish))
}

async fn list_routes(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<Route>>> {
    Ok(Json(state.routes.list_routes(&user.user_id).await?))
}

#[derive(Deserialize)]
struct ImportRequest {
    file_name: String,
    /// GPX document text
    gpx: String,
    title: String,
    description: Option<String>,
}

async fn import_route(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<ImportRequest>,
) -> Result<(StatusCode, Json<Route>)> {
    let route = state
        .routes
        .import_gpx(
            &user.user_id,
            &body.file_name,
            body.gpx.into_bytes(),
            &body.title,
            body.description.as_deref(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(route)))
}

async fn route_gpx(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(route_id): Path<String>,
) -> Result<impl IntoResponse> {
    let gpx = state.routes.route_gpx(&user.user_id, &route_id).await?;
    Ok(([(header::CONTENT_TYPE, "application/gpx+xml")], gpx))
}

async fn publish(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(route_id): Path<String>,
) -> Result<Json<Route>> {
    Ok(Json(state.routes.publish(&user.user_id, &route_id).await?))
}

async fn unpublish(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(route_id): Path<String>,
) -> Result<Json<Route>> {
    Ok(Json(state.routes.unpublish(&user.user_id, &route_id).await?))
}
