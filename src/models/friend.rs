// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Friendship rows, profiles and their local projections.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Status column of a `friendships` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum FriendshipStatus {
    Pending,
    Accepted,
}

impl FriendshipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FriendshipStatus::Pending => "pending",
            FriendshipStatus::Accepted => "accepted",
        }
    }
}

/// A relationship between two riders: `user_id` asked, `friend_id` was asked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Friendship {
    pub id: String,
    pub user_id: String,
    pub friend_id: String,
    pub status: FriendshipStatus,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Friendship {
    /// The other side of the relationship, if `me` is part of it.
    pub fn counterpart(&self, me: &str) -> Option<&str> {
        if self.user_id == me {
            Some(&self.friend_id)
        } else if self.friend_id == me {
            Some(&self.user_id)
        } else {
            None
        }
    }
}

/// Identity of a deleted row. Delete events may only carry the primary key.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FriendshipKey {
    pub id: String,
}

/// Public profile of a rider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub weekly_count: u32,
    #[serde(default)]
    pub streak_days: u32,
}

/// Accepted friend, as shown in the friends list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct Friend {
    pub id: String,
    pub username: String,
    pub weekly_count: u32,
    pub streak_days: u32,
    pub avatar_url: Option<String>,
}

impl From<Profile> for Friend {
    fn from(profile: Profile) -> Self {
        Self {
            id: profile.id,
            username: profile.username,
            weekly_count: profile.weekly_count,
            streak_days: profile.streak_days,
            avatar_url: profile.avatar_url,
        }
    }
}

/// Sender details attached to an incoming request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct RequestSender {
    pub id: String,
    pub username: String,
    pub avatar_url: Option<String>,
}

/// Pending request addressed to the current rider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct FriendRequest {
    /// Id of the underlying friendship row
    pub id: String,
    pub from: RequestSender,
    pub status: FriendshipStatus,
}

impl FriendRequest {
    pub fn pending(id: String, sender: &Profile) -> Self {
        Self {
            id,
            from: RequestSender {
                id: sender.id.clone(),
                username: sender.username.clone(),
                avatar_url: sender.avatar_url.clone(),
            },
            status: FriendshipStatus::Pending,
        }
    }
}

/// Search hit when looking for riders to befriend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct UserSummary {
    pub id: String,
    pub username: String,
}
