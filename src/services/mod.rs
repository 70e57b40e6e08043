// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod backoff;
pub mod distance;
pub mod export;
pub mod feed;
pub mod friends;
pub mod garage;
pub mod geolocation;
pub mod notify;
pub mod realtime;
pub mod routes;
pub mod sampler;
pub mod session;
pub mod tracking;

pub use backoff::{BackoffPolicy, BackoffScheduler};
pub use distance::Accumulator;
pub use export::{ExportError, GpxTrack, RouteExporter};
pub use feed::{FeedService, FeedSnapshot};
pub use friends::{FriendAction, FriendsService, FriendsSnapshot};
pub use garage::{GarageService, GarageSnapshot};
pub use geolocation::{AcquisitionError, GeoProvider, PushGeoProvider};
pub use notify::{Notification, NotificationLevel, Notifier};
pub use realtime::RealtimeEngine;
pub use routes::RouteService;
pub use sampler::GeoSampler;
pub use session::{TrackingError, TrackingSession, TrackingSnapshot, TrackingState};
pub use tracking::TrackingService;
