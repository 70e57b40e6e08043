// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Database webhook feeding row changes into the realtime broker.

use crate::db::tables;
use crate::models::{ChangeEvent, RowChange};
use crate::AppState;
use axum::{
    extract::{Json, State},
    http::{HeaderMap, StatusCode},
    routing::post,
    Router,
};
use std::sync::Arc;
use subtle::ConstantTimeEq;

const SECRET_HEADER: &str = "x-webhook-secret";

/// Webhook routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/webhooks/friendships", post(handle_change))
}

/// Handle a friendship row change (POST).
async fn handle_change(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<RowChange>,
) -> StatusCode {
    let Some(expected) = state.config.webhook_secret.as_deref() else {
        return StatusCode::NOT_FOUND;
    };

    let provided = headers
        .get(SECRET_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default();
    if !bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
        tracing::warn!("Security Alert: Webhook secret mismatch");
        return StatusCode::UNAUTHORIZED;
    }

    if payload.table != tables::FRIENDSHIPS {
        tracing::debug!(table = %payload.table, "Ignoring webhook for unrelated table");
        return StatusCode::OK;
    }

    let event = ChangeEvent::from(payload);
    let delivered = state.broker.publish(&event);
    tracing::info!(kind = ?event.kind, delivered, "Friendship change received");
    StatusCode::OK
}
