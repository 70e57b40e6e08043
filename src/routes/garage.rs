// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Motorcycle profile, expirations and maintenance log.

use crate::error::Result;
use crate::models::{
    Expiration, ExpirationInput, Maintenance, MaintenanceInput, Motorcycle, MotorcycleDetails,
};
use crate::services::GarageSnapshot;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/garage", get(get_garage))
        .route("/api/garage/motorcycle", put(update_motorcycle))
        .route("/api/garage/expirations", post(add_expiration))
        .route(
            "/api/garage/expirations/{id}",
            put(update_expiration).delete(delete_expiration),
        )
        .route("/api/garage/maintenances", post(add_maintenance))
        .route(
            "/api/garage/maintenances/{id}",
            put(update_maintenance).delete(delete_maintenance),
        )
}

/// Reload everything and return it, with expiration status as of today.
async fn get_garage(State(state): State<Arc<AppState>>) -> Result<Json<GarageSnapshot>> {
    state.garage.refresh().await?;
    Ok(Json(state.garage.snapshot(Utc::now().date_naive()).await))
}

async fn update_motorcycle(
    State(state): State<Arc<AppState>>,
    Json(details): Json<MotorcycleDetails>,
) -> Result<Json<Motorcycle>> {
    Ok(Json(state.garage.update_motorcycle(details).await?))
}

async fn add_expiration(
    State(state): State<Arc<AppState>>,
    Json(input): Json<ExpirationInput>,
) -> Result<(StatusCode, Json<Expiration>)> {
    let row = state.garage.add_expiration(input).await?;
    Ok((StatusCode::CREATED, Json(row)))
}

async fn update_expiration(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(input): Json<ExpirationInput>,
) -> Result<Json<Expiration>> {
    Ok(Json(state.garage.update_expiration(&id, input).await?))
}

async fn delete_expiration(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    state.garage.delete_expiration(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_maintenance(
    State(state): State<Arc<AppState>>,
    Json(input): Json<MaintenanceInput>,
) -> Result<(StatusCode, Json<Maintenance>)> {
    let row = state.garage.add_maintenance(input).await?;
    Ok((StatusCode::CREATED, Json(row)))
}

async fn update_maintenance(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(input): Json<MaintenanceInput>,
) -> Result<Json<Maintenance>> {
    Ok(Json(state.garage.update_maintenance(&id, input).await?))
}

async fn delete_maintenance(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    state.garage.delete_maintenance(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
