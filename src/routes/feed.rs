// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Post feed and likes.

use crate::error::Result;
use crate::models::FeedMode;
use crate::services::FeedSnapshot;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/feed", get(load))
        .route("/api/feed/more", post(load_more))
        .route("/api/feed/refresh", post(refresh))
        .route("/api/feed/posts/{id}/like", post(like).delete(unlike))
}

#[derive(Deserialize)]
struct FeedQuery {
    #[serde(default)]
    mode: Option<FeedMode>,
}

/// First page in the requested mode, or the current mode when omitted.
async fn load(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FeedQuery>,
) -> Result<Json<FeedSnapshot>> {
    let snapshot = match query.mode {
        Some(mode) => state.feed.load(mode).await?,
        None => state.feed.refresh().await?,
    };
    Ok(Json(snapshot))
}

async fn load_more(State(state): State<Arc<AppState>>) -> Result<Json<FeedSnapshot>> {
    Ok(Json(state.feed.load_more().await?))
}

async fn refresh(State(state): State<Arc<AppState>>) -> Result<Json<FeedSnapshot>> {
    Ok(Json(state.feed.refresh().await?))
}

async fn like(
    State(state): State<Arc<AppState>>,
    Path(post_id): Path<String>,
) -> Result<StatusCode> {
    state.feed.like(&post_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unlike(
    State(state): State<Arc<AppState>>,
    Path(post_id): Path<String>,
) -> Result<StatusCode> {
    state.feed.unlike(&post_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
