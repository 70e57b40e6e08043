// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Feed posts and the entries the feed shows for them.

use crate::models::{Profile, Route, RouteGeometry, Visibility};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Username shown when a post's author has no readable profile.
pub const UNKNOWN_AUTHOR: &str = "Unknown";

/// What a post carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum PostKind {
    #[default]
    Route,
    Text,
    Image,
}

/// Which authors the feed shows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum FeedMode {
    #[default]
    All,
    Friends,
}

/// Insert payload for the `posts` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFeedPost {
    pub author_id: String,
    #[serde(rename = "type")]
    pub kind: PostKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub visibility: Visibility,
    pub is_public: bool,
}

impl NewFeedPost {
    /// Public post announcing a shared route.
    pub fn for_route(route: &Route) -> Self {
        Self {
            author_id: route.user_id.clone(),
            kind: PostKind::Route,
            route_id: Some(route.id.clone()),
            content: Some(format!("Shared a new route: {}", route.title)),
            visibility: Visibility::Public,
            is_public: true,
        }
    }
}

/// Stored `posts` row. Counters are maintained by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct FeedPost {
    pub id: String,
    pub author_id: String,
    #[serde(rename = "type", default)]
    pub kind: PostKind,
    #[serde(default)]
    pub route_id: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub likes_count: u32,
    #[serde(default)]
    pub comments_count: u32,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl FeedPost {
    /// Materialize a stored row from an insert payload.
    pub fn from_new(id: String, new: &NewFeedPost, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            author_id: new.author_id.clone(),
            kind: new.kind,
            route_id: new.route_id.clone(),
            content: new.content.clone(),
            visibility: new.visibility,
            is_public: new.is_public,
            likes_count: 0,
            comments_count: 0,
            created_at: Some(created_at),
            updated_at: Some(created_at),
        }
    }
}

/// Author block shown on a post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct PostAuthor {
    pub id: String,
    pub username: String,
    pub avatar_url: Option<String>,
}

impl PostAuthor {
    pub fn unknown(id: &str) -> Self {
        Self {
            id: id.to_string(),
            username: UNKNOWN_AUTHOR.to_string(),
            avatar_url: None,
        }
    }
}

impl From<Profile> for PostAuthor {
    fn from(p: Profile) -> Self {
        Self {
            id: p.id,
            username: p.username,
            avatar_url: p.avatar_url,
        }
    }
}

/// The part of a route a post preview needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct RouteSummary {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub distance_km: f64,
    pub points: RouteGeometry,
}

impl From<Route> for RouteSummary {
    fn from(r: Route) -> Self {
        Self {
            id: r.id,
            title: r.title,
            description: r.description,
            distance_km: r.distance_km,
            points: r.points,
        }
    }
}

/// A post joined with its author, route preview and the rider's like.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct FeedEntry {
    #[serde(flatten)]
    pub post: FeedPost,
    pub author: PostAuthor,
    pub route: Option<RouteSummary>,
    pub is_liked: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_row_with_missing_counters() {
        let post: FeedPost = serde_json::from_value(serde_json::json!({
            "id": "p1",
            "author_id": "u1",
            "type": "text",
            "content": "Anyone riding Sunday?",
            "visibility": "friends",
            "is_public": true,
            "created_at": "2026-05-01T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(post.kind, PostKind::Text);
        assert_eq!(post.visibility, Visibility::Friends);
        assert_eq!(post.likes_count, 0);
        assert!(post.route_id.is_none());
    }

    #[test]
    fn test_entry_flattens_post_fields() {
        let now = Utc::now();
        let new = NewFeedPost {
            author_id: "u1".into(),
            kind: PostKind::Text,
            route_id: None,
            content: Some("hi".into()),
            visibility: Visibility::Public,
            is_public: true,
        };
        let entry = FeedEntry {
            post: FeedPost::from_new("p1".into(), &new, now),
            author: PostAuthor::unknown("u1"),
            route: None,
            is_liked: true,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["id"], "p1");
        assert_eq!(json["type"], "text");
        assert_eq!(json["author"]["username"], UNKNOWN_AUTHOR);
        assert_eq!(json["is_liked"], true);
    }
}
