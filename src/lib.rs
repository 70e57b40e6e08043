// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Moto-Tracker: record motorcycle rides and share them with friends
//!
//! This crate provides the backend for live ride tracking (GPS sampling,
//! distance and speed accounting, pause/resume), GPX export and import,
//! route publishing, a realtime friend-request feed, the post feed and the
//! rider's garage.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::{Config, RealtimeTransport};
use db::{
    BlobStore, ChannelProvider, DataStore, LocalBroker, MemoryBlobStore, MemoryStore,
    RestBlobStore, RestStore, SocketProvider,
};
use error::AppError;
use services::{
    BackoffPolicy, FeedService, FriendsService, GarageService, GeoSampler, Notifier,
    PushGeoProvider, RealtimeEngine, RouteService, TrackingService, TrackingState,
};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;

fn tokens_match(a: &str, b: &str) -> bool {
    bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

/// The logged-in rider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub user_id: String,
    pub access_token: String,
}

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub db: Arc<dyn DataStore>,
    pub blobs: Arc<dyn BlobStore>,
    /// Fed by the database webhook and, offline, by the memory store
    pub broker: LocalBroker,
    /// Where the realtime engine subscribes
    pub channels: Arc<dyn ChannelProvider>,
    pub geo: PushGeoProvider,
    pub notifier: Notifier,
    pub tracking: TrackingService,
    pub routes: RouteService,
    pub friends: FriendsService,
    pub feed: FeedService,
    pub garage: GarageService,
    pub realtime: RealtimeEngine,
    session: RwLock<Option<AuthSession>>,
}

impl AppState {
    /// Wire services over the given stores, subscribing to `broker`.
    /// Must run inside a Tokio runtime.
    pub fn with_stores(
        config: Config,
        db: Arc<dyn DataStore>,
        blobs: Arc<dyn BlobStore>,
        broker: LocalBroker,
    ) -> Self {
        let channels = Arc::new(broker.clone());
        Self::with_channels(config, db, blobs, broker, channels)
    }

    /// Wire services over the given stores and channel provider.
    pub fn with_channels(
        config: Config,
        db: Arc<dyn DataStore>,
        blobs: Arc<dyn BlobStore>,
        broker: LocalBroker,
        channels: Arc<dyn ChannelProvider>,
    ) -> Self {
        let notifier = Notifier::new();
        let geo = PushGeoProvider::new();
        let sampler = GeoSampler::new(Arc::new(geo.clone()), &config.geo);
        let tracking = TrackingService::new(
            sampler,
            blobs.clone(),
            &config.photo_bucket,
            notifier.clone(),
        );
        let routes = RouteService::new(
            db.clone(),
            blobs.clone(),
            tracking.clone(),
            notifier.clone(),
            &config.gpx_bucket,
        );
        let friends = FriendsService::new(db.clone(), notifier.clone());
        let feed = FeedService::new(db.clone(), friends.clone(), notifier.clone());
        let garage = GarageService::new(db.clone(), notifier.clone());
        let realtime = RealtimeEngine::spawn(
            channels.clone(),
            friends.clone(),
            BackoffPolicy::from(&config.realtime),
        );

        Self {
            config,
            db,
            blobs,
            broker,
            channels,
            geo,
            notifier,
            tracking,
            routes,
            friends,
            feed,
            garage,
            realtime,
            session: RwLock::new(None),
        }
    }

    /// Fully in-process state: memory store wired to the local broker.
    pub fn offline(config: Config) -> Self {
        let broker = LocalBroker::new();
        let db = MemoryStore::with_broker(broker.clone());
        Self::with_stores(config, Arc::new(db), Arc::new(MemoryBlobStore::new()), broker)
    }

    /// Hosted backend when configured, offline otherwise.
    pub fn from_config(config: Config) -> Self {
        let Some(url) = config.backend_url.clone() else {
            return Self::offline(config);
        };
        let key = config.backend_anon_key.clone();
        let db = Arc::new(RestStore::new(&url, &key));
        let blobs = Arc::new(RestBlobStore::new(&url, &key));
        let broker = LocalBroker::new();
        let channels: Arc<dyn ChannelProvider> = match config.realtime.transport {
            RealtimeTransport::Socket => Arc::new(SocketProvider::with_heartbeat(
                &url,
                &key,
                config.realtime.heartbeat,
            )),
            RealtimeTransport::Webhook => Arc::new(broker.clone()),
        };
        Self::with_channels(config, db, blobs, broker, channels)
    }

    pub async fn current_session(&self) -> Option<AuthSession> {
        self.session.read().await.clone()
    }

    /// Log a rider in: scope backend access to their token, load their
    /// friend lists and start the realtime feed.
    ///
    /// The token is checked with the backend's auth service. While a rider
    /// is logged in, only a caller presenting their current token may
    /// replace the session (re-posting the identical session is allowed),
    /// and a different rider is refused while a ride is not yet saved or
    /// discarded.
    pub async fn login(
        &self,
        user_id: &str,
        access_token: &str,
        presented_token: Option<&str>,
    ) -> Result<AuthSession, AppError> {
        let user_id = user_id.trim();
        let access_token = access_token.trim();
        if user_id.is_empty() || access_token.is_empty() {
            return Err(AppError::BadRequest(
                "user_id and access_token are required".to_string(),
            ));
        }

        self.db.verify_access_token(user_id, access_token).await?;

        let session = AuthSession {
            user_id: user_id.to_string(),
            access_token: access_token.to_string(),
        };
        {
            let mut current = self.session.write().await;
            if let Some(previous) = current.as_ref() {
                let same_session = previous.user_id == session.user_id
                    && tokens_match(&previous.access_token, access_token);
                let holds_current =
                    presented_token.is_some_and(|t| tokens_match(&previous.access_token, t));
                if !same_session && !holds_current {
                    tracing::warn!(user_id = %session.user_id, "Refusing to replace the active session");
                    return Err(AppError::Unauthorized);
                }

                if previous.user_id != session.user_id {
                    let ride = self.tracking.snapshot().await.session.state;
                    if ride != TrackingState::Idle {
                        return Err(AppError::Conflict(format!(
                            "Ride is {}; save or discard it before switching riders",
                            ride
                        )));
                    }
                    tracing::info!(previous = %previous.user_id, "Replacing logged-in rider");
                    self.tracking.reset().await;
                }
            }
            *current = Some(session.clone());
        }

        self.db.set_access_token(Some(session.access_token.clone()));
        self.blobs.set_access_token(Some(session.access_token.clone()));
        self.channels.set_access_token(Some(session.access_token.clone()));
        self.friends.set_user(&session.user_id).await;
        self.friends.refresh_all().await;
        self.feed.set_user(&session.user_id).await;
        self.garage.set_user(&session.user_id).await;
        self.realtime.start(&session.user_id);

        tracing::info!(user_id = %session.user_id, "Rider logged in");
        Ok(session)
    }

    /// Log out: stop the realtime feed and drop all per-rider state.
    pub async fn logout(&self) {
        let previous = self.session.write().await.take();
        self.realtime.stop();
        self.friends.clear().await;
        self.feed.clear().await;
        self.garage.clear().await;
        self.tracking.reset().await;
        self.db.set_access_token(None);
        self.blobs.set_access_token(None);
        self.channels.set_access_token(None);
        if let Some(previous) = previous {
            tracing::info!(user_id = %previous.user_id, "Rider logged out");
        }
    }
}
