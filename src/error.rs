// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use crate::db::broker::RealtimeError;
use crate::services::export::ExportError;
use crate::services::geolocation::AcquisitionError;
use crate::services::session::TrackingError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Location error: {0}")]
    Acquisition(#[from] AcquisitionError),

    #[error("Tracking error: {0}")]
    Tracking(#[from] TrackingError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("Realtime error: {0}")]
    Realtime(#[from] RealtimeError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl AppError {
    /// HTTP status and stable machine-readable code for this error.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            AppError::Acquisition(e) => match e {
                AcquisitionError::PermissionDenied => {
                    (StatusCode::FORBIDDEN, "location_permission_denied")
                }
                AcquisitionError::PositionUnavailable => {
                    (StatusCode::SERVICE_UNAVAILABLE, "position_unavailable")
                }
                AcquisitionError::Timeout => (StatusCode::GATEWAY_TIMEOUT, "position_timeout"),
            },
            AppError::Tracking(_) => (StatusCode::CONFLICT, "invalid_tracking_state"),
            AppError::Export(e) => match e {
                ExportError::InsufficientData { .. } => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "insufficient_data")
                }
                ExportError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
                ExportError::InvalidGpx(_) => (StatusCode::BAD_REQUEST, "invalid_gpx"),
                ExportError::Write(_) => (StatusCode::INTERNAL_SERVER_ERROR, "export_error"),
            },
            AppError::Realtime(_) => (StatusCode::SERVICE_UNAVAILABLE, "realtime_error"),
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            AppError::Storage(_) => (StatusCode::BAD_GATEWAY, "storage_error"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = self.status_and_code();

        let details = match &self {
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                None
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                None
            }
            AppError::Unauthorized => None,
            AppError::NotFound(msg) | AppError::BadRequest(msg) | AppError::Conflict(msg) => {
                Some(msg.clone())
            }
            AppError::Storage(msg) => {
                tracing::warn!(error = %msg, "Storage error");
                Some(msg.clone())
            }
            other => Some(other.to_string()),
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
