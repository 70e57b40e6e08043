// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Friends service: the rider's friends, incoming requests and sent requests.
//!
//! Local state changes in two ways. Outbound actions write to the store first
//! and then reconcile per `FriendAction::policy()`. Change events pushed by
//! the realtime engine are applied through the `handle_*` methods, which are
//! idempotent.

use crate::db::{tables, DataStore, FriendshipQuery};
use crate::error::AppError;
use crate::models::{
    ChangeEvent, ChangeKind, Friend, FriendRequest, Friendship, FriendshipKey, FriendshipStatus,
    UserSummary,
};
use crate::services::notify::Notifier;
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Most search results returned.
pub const SEARCH_LIMIT: usize = 10;

const ACTIVE_STATUSES: [FriendshipStatus; 2] =
    [FriendshipStatus::Pending, FriendshipStatus::Accepted];

/// Outbound friend actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FriendAction {
    Send,
    Accept,
    Decline,
    Remove,
}

/// How local state follows a successful write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconcile {
    /// Patch local state directly.
    OptimisticPatch,
    /// Re-read the listed collections from the store.
    RefetchAfterWrite(&'static [RefreshTarget]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTarget {
    Friends,
    Requests,
    Sent,
}

impl FriendAction {
    pub fn policy(self) -> Reconcile {
        match self {
            FriendAction::Send | FriendAction::Remove => Reconcile::OptimisticPatch,
            FriendAction::Accept => Reconcile::RefetchAfterWrite(&[
                RefreshTarget::Friends,
                RefreshTarget::Requests,
                RefreshTarget::Sent,
            ]),
            FriendAction::Decline => {
                Reconcile::RefetchAfterWrite(&[RefreshTarget::Requests, RefreshTarget::Sent])
            }
        }
    }
}

#[derive(Debug, Default, Clone)]
struct FriendsState {
    user_id: Option<String>,
    friends: Vec<Friend>,
    requests: Vec<FriendRequest>,
    sent: Vec<String>,
}

/// Friends view returned by the API.
#[derive(Debug, Clone, Serialize)]
pub struct FriendsSnapshot {
    pub friends: Vec<Friend>,
    pub requests: Vec<FriendRequest>,
    pub sent_requests: Vec<String>,
}

/// Shared handle to the rider's friend state.
#[derive(Clone)]
pub struct FriendsService {
    db: Arc<dyn DataStore>,
    notifier: Notifier,
    state: Arc<RwLock<FriendsState>>,
}

impl FriendsService {
    pub fn new(db: Arc<dyn DataStore>, notifier: Notifier) -> Self {
        Self {
            db,
            notifier,
            state: Arc::new(RwLock::new(FriendsState::default())),
        }
    }

    /// Bind to a rider, clearing anything left from a previous one.
    pub async fn set_user(&self, user_id: &str) {
        let mut state = self.state.write().await;
        *state = FriendsState {
            user_id: Some(user_id.to_string()),
            ..FriendsState::default()
        };
    }

    /// Forget the rider and all local state.
    pub async fn clear(&self) {
        *self.state.write().await = FriendsState::default();
    }

    pub async fn snapshot(&self) -> FriendsSnapshot {
        let state = self.state.read().await;
        FriendsSnapshot {
            friends: state.friends.clone(),
            requests: state.requests.clone(),
            sent_requests: state.sent.clone(),
        }
    }

    pub async fn friends(&self) -> Vec<Friend> {
        self.state.read().await.friends.clone()
    }

    pub async fn requests(&self) -> Vec<FriendRequest> {
        self.state.read().await.requests.clone()
    }

    pub async fn sent_requests(&self) -> Vec<String> {
        self.state.read().await.sent.clone()
    }

    async fn me(&self) -> Result<String, AppError> {
        self.state
            .read()
            .await
            .user_id
            .clone()
            .ok_or(AppError::Unauthorized)
    }

    // ─── Refresh ─────────────────────────────────────────────────

    /// Reload accepted friends. On failure the previous list is kept.
    pub async fn refresh_friends(&self) -> Result<(), AppError> {
        let result = self.load_friends().await;
        self.apply_refresh("friends", result, |state, friends| {
            state.friends = friends
        })
        .await
    }

    /// Reload pending requests addressed to the rider.
    pub async fn refresh_requests(&self) -> Result<(), AppError> {
        let result = self.load_requests().await;
        self.apply_refresh("friend requests", result, |state, requests| {
            state.requests = requests
        })
        .await
    }

    /// Reload the ids the rider has pending requests out to.
    pub async fn refresh_sent(&self) -> Result<(), AppError> {
        let result = self.load_sent().await;
        self.apply_refresh("sent requests", result, |state, sent| state.sent = sent)
            .await
    }

    /// Refresh friends, requests and sent requests in parallel.
    pub async fn refresh_all(&self) {
        self.refresh(&[
            RefreshTarget::Friends,
            RefreshTarget::Requests,
            RefreshTarget::Sent,
        ])
        .await;
    }

    async fn refresh(&self, targets: &[RefreshTarget]) {
        let tasks = targets.iter().map(|target| async move {
            // Failures are already logged and notified by the refresh itself.
            let _ = match target {
                RefreshTarget::Friends => self.refresh_friends().await,
                RefreshTarget::Requests => self.refresh_requests().await,
                RefreshTarget::Sent => self.refresh_sent().await,
            };
        });
        join_all(tasks).await;
    }

    async fn apply_refresh<T>(
        &self,
        what: &str,
        result: Result<T, AppError>,
        apply: impl FnOnce(&mut FriendsState, T),
    ) -> Result<(), AppError> {
        match result {
            Ok(value) => {
                apply(&mut *self.state.write().await, value);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, what, "Refresh failed, keeping previous list");
                self.notifier
                    .error("Error", format!("Failed to load {}", what));
                Err(e)
            }
        }
    }

    async fn load_friends(&self) -> Result<Vec<Friend>, AppError> {
        let me = self.me().await?;
        let rows = self
            .db
            .list_friendships(FriendshipQuery::Involving(
                &me,
                &[FriendshipStatus::Accepted],
            ))
            .await?;

        let mut ids: Vec<String> = Vec::new();
        for row in &rows {
            if let Some(other) = row.counterpart(&me) {
                if !ids.iter().any(|id| id == other) {
                    ids.push(other.to_string());
                }
            }
        }
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let profiles = self.db.get_profiles(&ids).await?;
        Ok(profiles.into_iter().map(Friend::from).collect())
    }

    async fn load_requests(&self) -> Result<Vec<FriendRequest>, AppError> {
        let me = self.me().await?;
        let rows = self
            .db
            .list_friendships(FriendshipQuery::ReceivedBy(&me, FriendshipStatus::Pending))
            .await?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let sender_ids: Vec<String> = rows.iter().map(|r| r.user_id.clone()).collect();
        let profiles = self.db.get_profiles(&sender_ids).await?;

        let mut seen = HashSet::new();
        Ok(rows
            .into_iter()
            .filter(|row| seen.insert(row.id.clone()))
            .filter_map(|row| {
                let profile = profiles.iter().find(|p| p.id == row.user_id);
                if profile.is_none() {
                    tracing::debug!(request_id = %row.id, sender = %row.user_id, "Dropping request with unknown sender");
                }
                profile.map(|p| FriendRequest::pending(row.id, p))
            })
            .collect())
    }

    async fn load_sent(&self) -> Result<Vec<String>, AppError> {
        let me = self.me().await?;
        let rows = self
            .db
            .list_friendships(FriendshipQuery::SentBy(&me, FriendshipStatus::Pending))
            .await?;
        let mut sent: Vec<String> = Vec::with_capacity(rows.len());
        for row in rows {
            if !sent.contains(&row.friend_id) {
                sent.push(row.friend_id);
            }
        }
        Ok(sent)
    }

    // ─── Search ──────────────────────────────────────────────────

    /// Riders whose username contains `query`, excluding the rider and anyone
    /// already pending or accepted with them.
    pub async fn search_users(&self, query: &str) -> Result<Vec<UserSummary>, AppError> {
        let me = self.me().await?;
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let profiles = self.db.search_profiles(query, &me, SEARCH_LIMIT).await?;
        if profiles.is_empty() {
            return Ok(Vec::new());
        }

        let related: HashSet<String> = self
            .db
            .list_friendships(FriendshipQuery::Involving(&me, &ACTIVE_STATUSES))
            .await?
            .iter()
            .filter_map(|row| row.counterpart(&me).map(str::to_string))
            .collect();

        Ok(profiles
            .into_iter()
            .filter(|p| !related.contains(&p.id))
            .map(|p| UserSummary {
                id: p.id,
                username: p.username,
            })
            .collect())
    }

    // ─── Outbound actions ────────────────────────────────────────

    /// Send a request to the rider with the given username.
    pub async fn send(&self, username: &str) -> Result<Friendship, AppError> {
        let me = self.me().await?;
        let username = username.trim();
        if username.is_empty() {
            return Err(AppError::BadRequest("Username is required".to_string()));
        }

        let target = self
            .db
            .find_profile_by_username(username)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {}", username)))?;
        if target.id == me {
            return Err(AppError::BadRequest(
                "Cannot send a friend request to yourself".to_string(),
            ));
        }

        let existing = self
            .db
            .list_friendships(FriendshipQuery::Between(&me, &target.id, &ACTIVE_STATUSES))
            .await?;
        if let Some(row) = existing.first() {
            return Err(AppError::Conflict(match row.status {
                FriendshipStatus::Accepted => {
                    format!("You are already friends with {}", username)
                }
                FriendshipStatus::Pending => format!(
                    "A friend request involving you and {} is already pending",
                    username
                ),
            }));
        }

        let row = self.db.insert_friendship(&me, &target.id).await?;
        self.reconcile(FriendAction::Send, &target.id).await;

        tracing::info!(request_id = %row.id, to = %target.id, "Friend request sent");
        self.notifier
            .info("Request sent", format!("Friend request sent to {}", username));
        Ok(row)
    }

    /// Accept a pending request addressed to the rider.
    pub async fn accept(&self, request_id: &str) -> Result<(), AppError> {
        let me = self.me().await?;
        self.db
            .update_friendship_status(request_id, &me, FriendshipStatus::Accepted)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Friend request {}", request_id)))?;

        self.reconcile(FriendAction::Accept, request_id).await;
        tracing::info!(request_id, "Friend request accepted");
        self.notifier
            .info("Request accepted", "You are now friends!");
        Ok(())
    }

    /// Decline (delete) a pending request addressed to the rider.
    pub async fn decline(&self, request_id: &str) -> Result<(), AppError> {
        let me = self.me().await?;
        self.db
            .delete_friendship(request_id, &me)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Friend request {}", request_id)))?;

        self.reconcile(FriendAction::Decline, request_id).await;
        tracing::info!(request_id, "Friend request declined");
        self.notifier
            .info("Request declined", "The request was removed");
        Ok(())
    }

    /// End an accepted friendship, whichever side sent the original request.
    pub async fn remove(&self, friend_id: &str) -> Result<(), AppError> {
        let me = self.me().await?;
        let username = self
            .state
            .read()
            .await
            .friends
            .iter()
            .find(|f| f.id == friend_id)
            .map(|f| f.username.clone());
        self.db
            .delete_friendship_between(&me, friend_id, FriendshipStatus::Accepted)
            .await?;

        self.reconcile(FriendAction::Remove, friend_id).await;
        tracing::info!(friend_id, "Friend removed");
        let message = match username {
            Some(name) => format!("{} is no longer in your friends", name),
            None => "The friendship was removed".to_string(),
        };
        self.notifier.info("Friend removed", message);
        Ok(())
    }

    /// Apply the local effect of a successful write.
    async fn reconcile(&self, action: FriendAction, subject: &str) {
        // Accept and decline drop the request immediately, then refetch.
        if matches!(action, FriendAction::Accept | FriendAction::Decline) {
            self.state
                .write()
                .await
                .requests
                .retain(|r| r.id != subject);
        }

        match action.policy() {
            Reconcile::OptimisticPatch => {
                let mut state = self.state.write().await;
                match action {
                    FriendAction::Send => {
                        if !state.sent.iter().any(|id| id == subject) {
                            state.sent.push(subject.to_string());
                        }
                    }
                    FriendAction::Remove => state.friends.retain(|f| f.id != subject),
                    FriendAction::Accept | FriendAction::Decline => {}
                }
            }
            Reconcile::RefetchAfterWrite(targets) => self.refresh(targets).await,
        }
    }

    // ─── Change events ───────────────────────────────────────────

    /// Route a change event from the realtime engine to its handler.
    pub async fn apply_change(&self, event: &ChangeEvent) {
        if event.table != tables::FRIENDSHIPS {
            return;
        }
        match event.kind {
            ChangeKind::Insert => match event.new_record::<Friendship>() {
                Some(row) => self.handle_created(&row).await,
                None => tracing::warn!("Ignoring malformed friendship insert"),
            },
            ChangeKind::Update => match event.new_record::<Friendship>() {
                Some(row) => self.handle_updated(&row).await,
                None => tracing::warn!("Ignoring malformed friendship update"),
            },
            ChangeKind::Delete => match event.old_record::<FriendshipKey>() {
                Some(key) => self.handle_deleted(&key).await,
                None => tracing::warn!("Ignoring friendship delete without id"),
            },
        }
    }

    /// A new row appeared: add it as an incoming request if it is one.
    pub async fn handle_created(&self, row: &Friendship) {
        let Ok(me) = self.me().await else {
            return;
        };
        if row.status != FriendshipStatus::Pending || row.friend_id != me {
            return;
        }
        if self.has_request(&row.id).await {
            tracing::debug!(request_id = %row.id, "Duplicate request event ignored");
            return;
        }

        let sender = match self.db.get_profile(&row.user_id).await {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                tracing::warn!(sender = %row.user_id, "Request sender profile not found");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, sender = %row.user_id, "Failed to fetch sender profile");
                return;
            }
        };

        {
            // Re-check: another event or a refresh may have added it meanwhile.
            let mut state = self.state.write().await;
            if state.requests.iter().any(|r| r.id == row.id) {
                return;
            }
            state.requests.push(FriendRequest::pending(row.id.clone(), &sender));
        }

        tracing::info!(request_id = %row.id, from = %sender.username, "Friend request received");
        self.notifier.info(
            "New friend request",
            format!("{} wants to be your friend!", sender.username),
        );
    }

    /// A row changed: an acceptance removes the request and updates friends.
    pub async fn handle_updated(&self, row: &Friendship) {
        if row.status == FriendshipStatus::Accepted {
            self.state
                .write()
                .await
                .requests
                .retain(|r| r.id != row.id);
            let _ = self.refresh_friends().await;
        }
        let _ = self.refresh_sent().await;
    }

    /// A row was deleted: drop the matching request, if any.
    pub async fn handle_deleted(&self, key: &FriendshipKey) {
        self.state
            .write()
            .await
            .requests
            .retain(|r| r.id != key.id);
        let _ = self.refresh_sent().await;
    }

    async fn has_request(&self, id: &str) -> bool {
        self.state.read().await.requests.iter().any(|r| r.id == id)
    }
}
