// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Realtime connection status, manual retry and queued notifications.

use crate::models::ConnectionState;
use crate::services::Notification;
use crate::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/realtime", get(get_status))
        .route("/api/realtime/retry", post(retry))
        .route("/api/notifications", get(take_notifications))
}

async fn get_status(State(state): State<Arc<AppState>>) -> Json<ConnectionState> {
    Json(state.realtime.state())
}

/// Reconnect now, with a fresh attempt budget.
async fn retry(State(state): State<Arc<AppState>>) -> (StatusCode, Json<ConnectionState>) {
    state.realtime.retry_connection();
    (StatusCode::ACCEPTED, Json(state.realtime.state()))
}

/// Notifications raised since the last call, oldest first.
async fn take_notifications(State(state): State<Arc<AppState>>) -> Json<Vec<Notification>> {
    Json(state.notifier.drain())
}
