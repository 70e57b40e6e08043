// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use axum::body::Body;
use axum::http::{header, Request};
use axum::response::Response;
use chrono::Utc;
use moto_tracker::config::Config;
use moto_tracker::db::{LocalBroker, MemoryBlobStore, MemoryStore};
use moto_tracker::models::{Fix, Profile};
use moto_tracker::routes::create_router;
use moto_tracker::AppState;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Access token used by `logged_in_app`.
#[allow(dead_code)]
pub const TEST_TOKEN: &str = "test-access-token";

/// Offline app with handles on its in-memory backends.
#[allow(dead_code)]
pub struct TestApp {
    pub router: axum::Router,
    pub state: Arc<AppState>,
    pub store: MemoryStore,
    pub blobs: MemoryBlobStore,
    pub broker: LocalBroker,
}

/// Create a test app with in-memory store, blobs and broker.
#[allow(dead_code)]
pub fn create_test_app() -> TestApp {
    let broker = LocalBroker::new();
    let store = MemoryStore::with_broker(broker.clone());
    let blobs = MemoryBlobStore::new();
    let state = Arc::new(AppState::with_stores(
        Config::test_default(),
        Arc::new(store.clone()),
        Arc::new(blobs.clone()),
        broker.clone(),
    ));

    TestApp {
        router: create_router(state.clone()),
        state,
        store,
        blobs,
        broker,
    }
}

/// Test app with `user_id` logged in using `TEST_TOKEN`.
#[allow(dead_code)]
pub async fn logged_in_app(user_id: &str) -> TestApp {
    let app = create_test_app();
    app.store.insert_profile(profile(user_id, user_id));
    app.state
        .login(user_id, TEST_TOKEN, None)
        .await
        .expect("login should succeed");
    app
}

#[allow(dead_code)]
pub fn profile(id: &str, username: &str) -> Profile {
    Profile {
        id: id.to_string(),
        username: username.to_string(),
        avatar_url: None,
        weekly_count: 0,
        streak_days: 0,
    }
}

/// A fresh fix, timestamped now.
#[allow(dead_code)]
pub fn fix(latitude: f64, longitude: f64, speed_mps: Option<f64>) -> Fix {
    Fix {
        latitude,
        longitude,
        speed_mps,
        accuracy_m: Some(5.0),
        timestamp: Utc::now(),
    }
}

/// Request builder carrying the test bearer token.
#[allow(dead_code)]
pub fn authed(method: &str, uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", TEST_TOKEN))
}

#[allow(dead_code)]
pub fn authed_json(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    authed(method, uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[allow(dead_code)]
pub async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

#[allow(dead_code)]
pub async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Poll `check` until it holds, failing the test after a couple of seconds.
#[allow(dead_code)]
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Timed out waiting for: {}", what);
}
