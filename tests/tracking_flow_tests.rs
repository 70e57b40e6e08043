// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! End-to-end ride recording through the services.

use moto_tracker::error::AppError;
use moto_tracker::services::{AcquisitionError, NotificationLevel, TrackingState};

mod common;

use common::{eventually, fix};

#[tokio::test]
async fn test_ride_with_waypoint_survives_gpx_roundtrip() {
    let app = common::logged_in_app("rider-1").await;
    let state = &app.state;

    state.geo.push_fix(fix(45.0, 9.0, Some(0.0)));
    state.tracking.start().await.unwrap();

    state.geo.push_fix(fix(45.001, 9.0, Some(10.0)));
    eventually("second point", || async move {
        state.tracking.snapshot().await.session.point_count == 2
    })
    .await;

    let paused = state.tracking.pause().await.unwrap();
    assert_eq!(paused.session.state, TrackingState::Paused);
    assert!((paused.session.max_speed_kmh - 36.0).abs() < 1e-9);

    let point = state
        .tracking
        .attach_photo(vec![0xFF, 0xD8, 0xFF], "image/jpeg", "rider-1")
        .await
        .unwrap();
    let photo_url = point.photo_url.clone().unwrap();
    assert!(photo_url.starts_with("memory://route-photos/rider-1/"));
    let point = state
        .tracking
        .annotate(None, Some("  Viewpoint  ".to_string()))
        .await
        .unwrap();
    assert_eq!(point.note.as_deref(), Some("Viewpoint"));
    assert_eq!(point.photo_url.as_deref(), Some(photo_url.as_str()));

    // Samples while paused are not recorded.
    state.geo.push_fix(fix(45.0015, 9.0, Some(5.0)));
    state.tracking.resume().await.unwrap();
    assert_eq!(state.tracking.snapshot().await.session.point_count, 2);

    state.geo.push_fix(fix(45.002, 9.0, Some(8.0)));
    eventually("third point", || async move {
        state.tracking.snapshot().await.session.point_count == 3
    })
    .await;
    state.tracking.stop().await.unwrap();

    let route = state
        .routes
        .save_session("rider-1", "Pass ride", Some("With a stop"))
        .await
        .unwrap();
    assert_eq!(route.points.coordinates.len(), 3);
    assert!((route.distance_km - 0.2224).abs() < 0.001);
    let metadata = route.metadata.clone().unwrap();
    assert_eq!(metadata.points[1].photo_url.as_deref(), Some(photo_url.as_str()));
    assert_eq!(metadata.points[1].note.as_deref(), Some("Viewpoint"));
    assert_eq!(state.tracking.snapshot().await.session.state, TrackingState::Idle);

    let gpx = state.routes.route_gpx("rider-1", &route.id).await.unwrap();
    assert!(gpx.contains("<wpt"));
    assert!(gpx.contains(&photo_url));

    let imported = state
        .routes
        .import_gpx("rider-1", "pass.gpx", gpx.into_bytes(), "Pass ride again", None)
        .await
        .unwrap();
    assert_eq!(imported.points.coordinates.len(), 3);
    assert!((imported.distance_km - route.distance_km).abs() < 1e-6);

    let routes = state.routes.list_routes("rider-1").await.unwrap();
    assert_eq!(routes.len(), 2);
}

#[tokio::test]
async fn test_start_without_permission_stays_idle() {
    let app = common::logged_in_app("rider-1").await;
    app.state.notifier.drain();
    app.state.geo.set_permission(false);

    let err = app.state.tracking.start().await.unwrap_err();
    assert!(matches!(
        err,
        AppError::Acquisition(AcquisitionError::PermissionDenied)
    ));

    let snapshot = app.state.tracking.snapshot().await;
    assert_eq!(snapshot.session.state, TrackingState::Idle);
    assert_eq!(snapshot.session.point_count, 0);
    assert_eq!(
        snapshot.last_error.as_deref(),
        Some("Location permission denied")
    );

    let notifications = app.state.notifier.drain();
    assert!(notifications
        .iter()
        .any(|n| n.level == NotificationLevel::Error && n.title == "Location error"));
}

#[tokio::test]
async fn test_location_error_keeps_session_active() {
    let app = common::logged_in_app("rider-1").await;
    let state = &app.state;

    state.geo.push_fix(fix(45.0, 9.0, None));
    state.tracking.start().await.unwrap();

    state.geo.push_error(AcquisitionError::PositionUnavailable);
    eventually("error recorded", || async move {
        state.tracking.snapshot().await.last_error.is_some()
    })
    .await;
    let snapshot = state.tracking.snapshot().await;
    assert_eq!(snapshot.session.state, TrackingState::Active);
    assert_eq!(snapshot.last_error.as_deref(), Some("Position unavailable"));

    state.geo.push_fix(fix(45.0005, 9.0, None));
    eventually("recovered", || async move {
        let snapshot = state.tracking.snapshot().await;
        snapshot.session.point_count == 2 && snapshot.last_error.is_none()
    })
    .await;
}

#[tokio::test]
async fn test_discard_returns_to_idle_without_saving() {
    let app = common::logged_in_app("rider-1").await;
    let state = &app.state;

    state.geo.push_fix(fix(45.0, 9.0, None));
    state.tracking.start().await.unwrap();
    state.tracking.stop().await.unwrap();
    state.tracking.discard().await.unwrap();

    assert_eq!(state.tracking.snapshot().await.session.state, TrackingState::Idle);
    assert!(state.routes.list_routes("rider-1").await.unwrap().is_empty());
}
