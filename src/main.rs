// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Moto-Tracker API Server
//!
//! Records rides from device location fixes, exports and imports GPX, and
//! keeps the rider's friend lists in sync with the backend's change feed.

use moto_tracker::{config::Config, AppState};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging
    init_logging();

    // Load configuration from environment
    let config = Config::from_env().expect("Failed to load configuration");
    tracing::info!(port = config.port, "Starting Moto-Tracker API");

    if config.is_offline() {
        tracing::warn!("BACKEND_URL not set, running with in-memory storage");
    } else {
        tracing::info!(
            backend = config.backend_url.as_deref().unwrap_or_default(),
            transport = ?config.realtime.transport,
            "Using hosted backend"
        );
    }
    if config.webhook_secret.is_none() {
        tracing::warn!("WEBHOOK_SECRET not set, friendship webhook is disabled");
    }

    // Build shared state
    let state = Arc::new(AppState::from_config(config.clone()));

    // Build router
    let app = moto_tracker::routes::create_router(state.clone());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.realtime.shutdown();
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

/// Initialize structured JSON logging.
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("moto_tracker=debug".parse().unwrap())
                .add_directive("info".parse().unwrap()),
        )
        .with(format)
        .init();
}
