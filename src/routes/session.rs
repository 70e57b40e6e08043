// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Login and logout.
//!
//! The access token is issued by the hosted backend; it is forwarded on every
//! backend call, where row-level security scopes it to the rider.

use crate::error::Result;
use crate::AppState;
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Public session routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/session", post(login))
}

/// Session routes that require the current token.
pub fn protected_routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/session", axum::routing::delete(logout))
}

#[derive(Deserialize)]
struct LoginRequest {
    user_id: String,
    access_token: String,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct SessionResponse {
    pub user_id: String,
}

/// Log in. Replacing an active session requires its bearer token.
async fn login(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> Result<Json<SessionResponse>> {
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));
    let session = state
        .login(&body.user_id, &body.access_token, presented)
        .await?;
    Ok(Json(SessionResponse {
        user_id: session.user_id,
    }))
}

async fn logout(State(state): State<Arc<AppState>>) -> StatusCode {
    state.logout().await;
    StatusCode::NO_CONTENT
}
