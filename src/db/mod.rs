// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Data layer: the hosted backend's tables, object storage and change feed.
//!
//! `RestStore` talks to the PostgREST endpoint of the hosted backend;
//! `MemoryStore` keeps everything in-process for offline mode and tests.
//! Row changes arrive over `SocketProvider` from the hosted backend, or
//! through `LocalBroker` offline and when fed by the database webhook.

pub mod broker;
pub mod memory;
pub mod rest;
pub mod socket;
pub mod storage;

pub use broker::{
    Channel, ChannelId, ChannelProvider, InjectedFailure, LocalBroker, RealtimeError,
};
pub use memory::MemoryStore;
pub use rest::RestStore;
pub use socket::SocketProvider;
pub use storage::{BlobStore, MemoryBlobStore, RestBlobStore};

use crate::error::AppError;
use crate::models::{
    Expiration, ExpirationInput, FeedPost, Friendship, FriendshipStatus, Maintenance,
    MaintenanceInput, Motorcycle, MotorcycleDetails, NewFeedPost, NewRoute, Profile, Route,
    Visibility,
};
use async_trait::async_trait;

/// Table names as constants.
pub mod tables {
    pub const ROUTES: &str = "routes";
    pub const POSTS: &str = "posts";
    pub const PROFILES: &str = "profiles";
    pub const FRIENDSHIPS: &str = "friendships";
    pub const POST_LIKES: &str = "post_likes";
    pub const MOTORCYCLES: &str = "motorcycles";
    pub const EXPIRATIONS: &str = "expirations";
    pub const MAINTENANCES: &str = "maintenances";
}

/// Selection of `friendships` rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FriendshipQuery<'a> {
    /// Rows where the user is on either side, restricted to the given statuses.
    Involving(&'a str, &'a [FriendshipStatus]),
    /// Rows the user sent with the given status.
    SentBy(&'a str, FriendshipStatus),
    /// Rows addressed to the user with the given status.
    ReceivedBy(&'a str, FriendshipStatus),
    /// Rows between two users in either direction, restricted to the given statuses.
    Between(&'a str, &'a str, &'a [FriendshipStatus]),
}

impl FriendshipQuery<'_> {
    pub fn matches(&self, row: &Friendship) -> bool {
        match *self {
            FriendshipQuery::Involving(user, statuses) => {
                (row.user_id == user || row.friend_id == user) && statuses.contains(&row.status)
            }
            FriendshipQuery::SentBy(user, status) => row.user_id == user && row.status == status,
            FriendshipQuery::ReceivedBy(user, status) => {
                row.friend_id == user && row.status == status
            }
            FriendshipQuery::Between(a, b, statuses) => {
                ((row.user_id == a && row.friend_id == b)
                    || (row.user_id == b && row.friend_id == a))
                    && statuses.contains(&row.status)
            }
        }
    }
}

/// Persistence operations needed by the services.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Set the rider's access token used for row-level security.
    fn set_access_token(&self, _token: Option<String>) {}

    /// Check that `access_token` was issued to `user_id`.
    ///
    /// Stores without an auth service accept any token.
    async fn verify_access_token(&self, _user_id: &str, _access_token: &str) -> Result<(), AppError> {
        Ok(())
    }

    // ─── Routes & Posts ──────────────────────────────────────────

    async fn insert_route(&self, route: &NewRoute) -> Result<Route, AppError>;

    /// Routes owned by a user, newest first.
    async fn list_routes(&self, user_id: &str) -> Result<Vec<Route>, AppError>;

    async fn get_route(&self, id: &str) -> Result<Option<Route>, AppError>;

    async fn set_route_visibility(
        &self,
        id: &str,
        visibility: Visibility,
        is_published: bool,
    ) -> Result<Route, AppError>;

    async fn insert_post(&self, post: &NewFeedPost) -> Result<(), AppError>;

    async fn delete_route_posts(&self, route_id: &str) -> Result<(), AppError>;

    async fn get_routes(&self, ids: &[String]) -> Result<Vec<Route>, AppError>;

    // ─── Feed ────────────────────────────────────────────────────

    /// Public posts, newest first, optionally restricted to some authors.
    async fn list_public_posts(
        &self,
        authors: Option<&[String]>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<FeedPost>, AppError>;

    /// Which of `post_ids` the user has liked.
    async fn liked_post_ids(
        &self,
        user_id: &str,
        post_ids: &[String],
    ) -> Result<Vec<String>, AppError>;

    /// Record a like. Returns `false` if the user already liked the post.
    async fn insert_like(&self, post_id: &str, user_id: &str) -> Result<bool, AppError>;

    /// Remove a like. Returns `false` if there was none.
    async fn delete_like(&self, post_id: &str, user_id: &str) -> Result<bool, AppError>;

    // ─── Garage ──────────────────────────────────────────────────

    async fn get_motorcycle(&self, user_id: &str) -> Result<Option<Motorcycle>, AppError>;

    async fn insert_motorcycle(
        &self,
        user_id: &str,
        details: &MotorcycleDetails,
    ) -> Result<Motorcycle, AppError>;

    async fn update_motorcycle(
        &self,
        id: &str,
        user_id: &str,
        details: &MotorcycleDetails,
    ) -> Result<Option<Motorcycle>, AppError>;

    /// The user's expirations, soonest first.
    async fn list_expirations(&self, user_id: &str) -> Result<Vec<Expiration>, AppError>;

    async fn insert_expiration(
        &self,
        user_id: &str,
        input: &ExpirationInput,
    ) -> Result<Expiration, AppError>;

    /// Returns `None` when the user has no expiration with this id.
    async fn update_expiration(
        &self,
        id: &str,
        user_id: &str,
        input: &ExpirationInput,
    ) -> Result<Option<Expiration>, AppError>;

    async fn delete_expiration(&self, id: &str, user_id: &str) -> Result<bool, AppError>;

    /// The user's maintenance records, most recent first.
    async fn list_maintenances(&self, user_id: &str) -> Result<Vec<Maintenance>, AppError>;

    async fn insert_maintenance(
        &self,
        user_id: &str,
        input: &MaintenanceInput,
    ) -> Result<Maintenance, AppError>;

    /// Returns `None` when the user has no record with this id.
    async fn update_maintenance(
        &self,
        id: &str,
        user_id: &str,
        input: &MaintenanceInput,
    ) -> Result<Option<Maintenance>, AppError>;

    async fn delete_maintenance(&self, id: &str, user_id: &str) -> Result<bool, AppError>;

    // ─── Profiles ────────────────────────────────────────────────

    async fn get_profile(&self, id: &str) -> Result<Option<Profile>, AppError>;

    async fn get_profiles(&self, ids: &[String]) -> Result<Vec<Profile>, AppError>;

    async fn find_profile_by_username(&self, username: &str)
        -> Result<Option<Profile>, AppError>;

    /// Case-insensitive substring search on usernames, excluding one id.
    async fn search_profiles(
        &self,
        query: &str,
        exclude_id: &str,
        limit: usize,
    ) -> Result<Vec<Profile>, AppError>;

    // ─── Friendships ─────────────────────────────────────────────

    async fn list_friendships(
        &self,
        query: FriendshipQuery<'_>,
    ) -> Result<Vec<Friendship>, AppError>;

    /// Insert a pending request from `user_id` to `friend_id`.
    async fn insert_friendship(&self, user_id: &str, friend_id: &str)
        -> Result<Friendship, AppError>;

    /// Update the status of a pending request addressed to `recipient_id`.
    ///
    /// Returns `None` when no such pending row exists.
    async fn update_friendship_status(
        &self,
        id: &str,
        recipient_id: &str,
        status: FriendshipStatus,
    ) -> Result<Option<Friendship>, AppError>;

    /// Delete a pending request addressed to `recipient_id`.
    ///
    /// Returns `None` when no such pending row exists.
    async fn delete_friendship(
        &self,
        id: &str,
        recipient_id: &str,
    ) -> Result<Option<Friendship>, AppError>;

    /// Delete rows between two users with the given status, either direction.
    async fn delete_friendship_between(
        &self,
        a: &str,
        b: &str,
        status: FriendshipStatus,
    ) -> Result<(), AppError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(user_id: &str, friend_id: &str, status: FriendshipStatus) -> Friendship {
        Friendship {
            id: "1".into(),
            user_id: user_id.into(),
            friend_id: friend_id.into(),
            status,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_query_matching() {
        let pending = row("a", "b", FriendshipStatus::Pending);
        let both = [FriendshipStatus::Pending, FriendshipStatus::Accepted];

        assert!(FriendshipQuery::SentBy("a", FriendshipStatus::Pending).matches(&pending));
        assert!(!FriendshipQuery::SentBy("b", FriendshipStatus::Pending).matches(&pending));
        assert!(FriendshipQuery::ReceivedBy("b", FriendshipStatus::Pending).matches(&pending));
        assert!(FriendshipQuery::Involving("b", &both).matches(&pending));
        assert!(!FriendshipQuery::Involving("b", &[FriendshipStatus::Accepted]).matches(&pending));
        assert!(FriendshipQuery::Between("b", "a", &both).matches(&pending));
        assert!(!FriendshipQuery::Between("a", "c", &both).matches(&pending));
    }
}
