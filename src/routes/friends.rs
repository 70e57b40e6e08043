// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Friend lists, requests and user search.

use crate::error::Result;
use crate::models::{FriendRequest, Friendship, UserSummary};
use crate::services::FriendsSnapshot;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/friends", get(get_friends))
        .route("/api/friends/refresh", post(refresh))
        .route("/api/friends/search", get(search))
        .route(
            "/api/friends/requests",
            get(get_requests).post(send_request),
        )
        .route("/api/friends/requests/{id}/accept", post(accept))
        .route("/api/friends/requests/{id}/decline", post(decline))
        .route("/api/friends/{id}", delete(remove))
}

async fn get_friends(State(state): State<Arc<AppState>>) -> Json<FriendsSnapshot> {
    Json(state.friends.snapshot().await)
}

async fn refresh(State(state): State<Arc<AppState>>) -> Json<FriendsSnapshot> {
    state.friends.refresh_all().await;
    Json(state.friends.snapshot().await)
}

async fn get_requests(State(state): State<Arc<AppState>>) -> Json<Vec<FriendRequest>> {
    Json(state.friends.requests().await)
}

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
}

async fn search(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<UserSummary>>> {
    Ok(Json(state.friends.search_users(&query.q).await?))
}

#[derive(Deserialize)]
struct SendRequest {
    username: String,
}

async fn send_request(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SendRequest>,
) -> Result<(StatusCode, Json<Friendship>)> {
    let friendship = state.friends.send(&body.username).await?;
    Ok((StatusCode::CREATED, Json(friendship)))
}

async fn accept(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> Result<Json<FriendsSnapshot>> {
    state.friends.accept(&request_id).await?;
    Ok(Json(state.friends.snapshot().await))
}

async fn decline(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> Result<Json<FriendsSnapshot>> {
    state.friends.decline(&request_id).await?;
    Ok(Json(state.friends.snapshot().await))
}

async fn remove(
    State(state): State<Arc<AppState>>,
    Path(friend_id): Path<String>,
) -> Result<Json<FriendsSnapshot>> {
    state.friends.remove(&friend_id).await?;
    Ok(Json(state.friends.snapshot().await))
}
