// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Hosted backend client for the PostgREST data API.
//!
//! Every request carries the project's anon key as `apikey` and the rider's
//! access token (or the anon key before login) as the bearer token, so the
//! backend's row-level security applies.

use crate::db::{tables, DataStore, FriendshipQuery};
use crate::error::AppError;
use crate::models::{
    Expiration, ExpirationInput, FeedPost, Friendship, FriendshipStatus, Maintenance,
    MaintenanceInput, Motorcycle, MotorcycleDetails, NewFeedPost, NewRoute, Profile, Route,
    Visibility,
};
use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// PostgREST-backed data store.
#[derive(Clone)]
pub struct RestStore {
    http: reqwest::Client,
    base_url: String,
    auth_url: String,
    anon_key: String,
    access_token: Arc<RwLock<Option<String>>>,
}

/// The part of the auth service's user record we need.
#[derive(Deserialize)]
struct AuthUserRecord {
    id: String,
}

#[derive(Deserialize)]
struct LikeRow {
    post_id: String,
}

/// Insert body for rows owned by a rider.
#[derive(Serialize)]
struct Owned<'a, T> {
    user_id: &'a str,
    #[serde(flatten)]
    row: &'a T,
}

const RETURN_ROWS: &str = "return=representation";

impl RestStore {
    /// Create a client for `{base_url}/rest/v1` and `{base_url}/auth/v1`.
    pub fn new(base_url: &str, anon_key: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            http: reqwest::Client::new(),
            base_url: format!("{}/rest/v1", base),
            auth_url: format!("{}/auth/v1", base),
            anon_key: anon_key.to_string(),
            access_token: Arc::new(RwLock::new(None)),
        }
    }

    fn bearer(&self) -> String {
        self.access_token
            .read()
            .ok()
            .and_then(|t| t.clone())
            .unwrap_or_else(|| self.anon_key.clone())
    }

    fn request(&self, method: reqwest::Method, table: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}/{}", self.base_url, table))
            .header("apikey", &self.anon_key)
            .bearer_auth(self.bearer())
    }

    /// GET rows matching the given PostgREST query parameters.
    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, AppError> {
        let response = self
            .request(reqwest::Method::GET, table)
            .query(query)
            .send()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        check_response_json(response).await
    }

    /// Write rows and return the representation the backend stored.
    async fn write<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: reqwest::Method,
        table: &str,
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> Result<Vec<T>, AppError> {
        self.write_with(RETURN_ROWS, method, table, query, body)
            .await
    }

    async fn write_with<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        prefer: &str,
        method: reqwest::Method,
        table: &str,
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> Result<Vec<T>, AppError> {
        let mut request = self
            .request(method, table)
            .header("Prefer", prefer)
            .query(query);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        check_response_json(response).await
    }
}

/// Check response status and parse the JSON body.
async fn check_response_json<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, AppError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            tracing::warn!(status = %status, "Backend rejected credentials");
            return Err(AppError::Unauthorized);
        }
        return Err(AppError::Database(format!("HTTP {}: {}", status, body)));
    }

    response
        .json()
        .await
        .map_err(|e| AppError::Database(format!("JSON parse error: {}", e)))
}

fn eq(value: &str) -> String {
    format!("eq.{}", value)
}

fn in_list<'a>(values: impl IntoIterator<Item = &'a str>) -> String {
    format!("in.({})", values.into_iter().collect::<Vec<_>>().join(","))
}

fn status_list(statuses: &[FriendshipStatus]) -> String {
    in_list(statuses.iter().map(|s| s.as_str()))
}

/// Ids interpolated into `or=(...)` filters must be plain UUIDs, or they
/// could add clauses of their own.
fn filter_id(id: &str) -> Result<&str, AppError> {
    uuid::Uuid::parse_str(id)
        .map(|_| id)
        .map_err(|_| AppError::BadRequest(format!("Invalid user id: {}", id)))
}

/// Match a pending request by id and recipient.
fn pending_request(id: &str, recipient_id: &str) -> Vec<(&'static str, String)> {
    vec![
        ("id", eq(id)),
        ("friend_id", eq(recipient_id)),
        ("status", eq(FriendshipStatus::Pending.as_str())),
    ]
}

/// One page of public posts, newest first.
fn feed_params(
    authors: Option<&[String]>,
    offset: usize,
    limit: usize,
) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("is_public", "eq.true".to_string()),
        ("order", "created_at.desc,id.desc".to_string()),
        ("offset", offset.to_string()),
        ("limit", limit.to_string()),
    ];
    if let Some(authors) = authors {
        params.push(("author_id", in_list(authors.iter().map(String::as_str))));
    }
    params
}

/// Match a row by id and owner.
fn owned_row(id: &str, user_id: &str) -> [(&'static str, String); 2] {
    [("id", eq(id)), ("user_id", eq(user_id))]
}

/// PostgREST parameters for a friendship query.
fn friendship_params(query: FriendshipQuery<'_>) -> Result<Vec<(&'static str, String)>, AppError> {
    Ok(match query {
        FriendshipQuery::Involving(user, statuses) => {
            let user = filter_id(user)?;
            vec![
                ("or", format!("(user_id.eq.{0},friend_id.eq.{0})", user)),
                ("status", status_list(statuses)),
            ]
        }
        FriendshipQuery::SentBy(user, status) => {
            vec![("user_id", eq(user)), ("status", eq(status.as_str()))]
        }
        FriendshipQuery::ReceivedBy(user, status) => {
            vec![("friend_id", eq(user)), ("status", eq(status.as_str()))]
        }
        FriendshipQuery::Between(a, b, statuses) => {
            let (a, b) = (filter_id(a)?, filter_id(b)?);
            vec![
                (
                    "or",
                    format!(
                        "(and(user_id.eq.{0},friend_id.eq.{1}),and(user_id.eq.{1},friend_id.eq.{0}))",
                        a, b
                    ),
                ),
                ("status", status_list(statuses)),
            ]
        }
    })
}

#[async_trait]
impl DataStore for RestStore {
    fn set_access_token(&self, token: Option<String>) {
        if let Ok(mut t) = self.access_token.write() {
            *t = token;
        }
    }

    async fn verify_access_token(&self, user_id: &str, access_token: &str) -> Result<(), AppError> {
        let response = self
            .http
            .get(format!("{}/user", self.auth_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        let user: AuthUserRecord = check_response_json(response).await?;
        if user.id != user_id {
            tracing::warn!(claimed = %user_id, "Access token belongs to another user");
            return Err(AppError::Unauthorized);
        }
        Ok(())
    }

    async fn insert_route(&self, route: &NewRoute) -> Result<Route, AppError> {
        let rows: Vec<Route> = self
            .write(reqwest::Method::POST, tables::ROUTES, &[], Some(route))
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| AppError::Database("Route insert returned no row".to_string()))
    }

    async fn list_routes(&self, user_id: &str) -> Result<Vec<Route>, AppError> {
        self.select(
            tables::ROUTES,
            &[
                ("user_id", eq(user_id)),
                ("order", "created_at.desc".to_string()),
            ],
        )
        .await
    }

    async fn get_route(&self, id: &str) -> Result<Option<Route>, AppError> {
        let rows: Vec<Route> = self.select(tables::ROUTES, &[("id", eq(id))]).await?;
        Ok(rows.into_iter().next())
    }

    async fn set_route_visibility(
        &self,
        id: &str,
        visibility: Visibility,
        is_published: bool,
    ) -> Result<Route, AppError> {
        let body = serde_json::json!({
            "visibility": visibility,
            "is_published": is_published,
        });
        let rows: Vec<Route> = self
            .write(
                reqwest::Method::PATCH,
                tables::ROUTES,
                &[("id", eq(id))],
                Some(&body),
            )
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound(format!("Route {}", id)))
    }

    async fn insert_post(&self, post: &NewFeedPost) -> Result<(), AppError> {
        let _: Vec<serde_json::Value> = self
            .write(reqwest::Method::POST, tables::POSTS, &[], Some(post))
            .await?;
        Ok(())
    }

    async fn delete_route_posts(&self, route_id: &str) -> Result<(), AppError> {
        let _: Vec<serde_json::Value> = self
            .write::<_, ()>(
                reqwest::Method::DELETE,
                tables::POSTS,
                &[("route_id", eq(route_id))],
                None,
            )
            .await?;
        Ok(())
    }

    async fn get_routes(&self, ids: &[String]) -> Result<Vec<Route>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.select(
            tables::ROUTES,
            &[("id", in_list(ids.iter().map(String::as_str)))],
        )
        .await
    }

    async fn list_public_posts(
        &self,
        authors: Option<&[String]>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<FeedPost>, AppError> {
        if authors.is_some_and(|a| a.is_empty()) {
            return Ok(Vec::new());
        }
        self.select(tables::POSTS, &feed_params(authors, offset, limit))
            .await
    }

    async fn liked_post_ids(
        &self,
        user_id: &str,
        post_ids: &[String],
    ) -> Result<Vec<String>, AppError> {
        if post_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<LikeRow> = self
            .select(
                tables::POST_LIKES,
                &[
                    ("select", "post_id".to_string()),
                    ("user_id", eq(user_id)),
                    ("post_id", in_list(post_ids.iter().map(String::as_str))),
                ],
            )
            .await?;
        Ok(rows.into_iter().map(|r| r.post_id).collect())
    }

    async fn insert_like(&self, post_id: &str, user_id: &str) -> Result<bool, AppError> {
        let body = serde_json::json!({ "post_id": post_id, "user_id": user_id });
        // A duplicate like comes back as zero rows instead of a conflict.
        let rows: Vec<serde_json::Value> = self
            .write_with(
                "return=representation,resolution=ignore-duplicates",
                reqwest::Method::POST,
                tables::POST_LIKES,
                &[("on_conflict", "post_id,user_id".to_string())],
                Some(&body),
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn delete_like(&self, post_id: &str, user_id: &str) -> Result<bool, AppError> {
        let rows: Vec<serde_json::Value> = self
            .write::<_, ()>(
                reqwest::Method::DELETE,
                tables::POST_LIKES,
                &[("post_id", eq(post_id)), ("user_id", eq(user_id))],
                None,
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn get_profile(&self, id: &str) -> Result<Option<Profile>, AppError> {
        let rows: Vec<Profile> = self.select(tables::PROFILES, &[("id", eq(id))]).await?;
        Ok(rows.into_iter().next())
    }

    async fn get_profiles(&self, ids: &[String]) -> Result<Vec<Profile>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.select(
            tables::PROFILES,
            &[("id", in_list(ids.iter().map(String::as_str)))],
        )
        .await
    }

    async fn find_profile_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Profile>, AppError> {
        let rows: Vec<Profile> = self
            .select(
                tables::PROFILES,
                &[("username", eq(username)), ("limit", "1".to_string())],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn search_profiles(
        &self,
        query: &str,
        exclude_id: &str,
        limit: usize,
    ) -> Result<Vec<Profile>, AppError> {
        self.select(
            tables::PROFILES,
            &[
                ("username", format!("ilike.*{}*", query)),
                ("id", format!("neq.{}", exclude_id)),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }

    async fn list_friendships(
        &self,
        query: FriendshipQuery<'_>,
    ) -> Result<Vec<Friendship>, AppError> {
        self.select(tables::FRIENDSHIPS, &friendship_params(query)?)
            .await
    }

    async fn insert_friendship(
        &self,
        user_id: &str,
        friend_id: &str,
    ) -> Result<Friendship, AppError> {
        let body = serde_json::json!({
            "user_id": user_id,
            "friend_id": friend_id,
            "status": FriendshipStatus::Pending,
        });
        let rows: Vec<Friendship> = self
            .write(reqwest::Method::POST, tables::FRIENDSHIPS, &[], Some(&body))
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| AppError::Database("Friendship insert returned no row".to_string()))
    }

    async fn update_friendship_status(
        &self,
        id: &str,
        recipient_id: &str,
        status: FriendshipStatus,
    ) -> Result<Option<Friendship>, AppError> {
        let body = serde_json::json!({
            "status": status,
            "updated_at": Utc::now(),
        });
        let rows: Vec<Friendship> = self
            .write(
                reqwest::Method::PATCH,
                tables::FRIENDSHIPS,
                &pending_request(id, recipient_id),
                Some(&body),
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn delete_friendship(
        &self,
        id: &str,
        recipient_id: &str,
    ) -> Result<Option<Friendship>, AppError> {
        let rows: Vec<Friendship> = self
            .write::<_, ()>(
                reqwest::Method::DELETE,
                tables::FRIENDSHIPS,
                &pending_request(id, recipient_id),
                None,
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn delete_friendship_between(
        &self,
        a: &str,
        b: &str,
        status: FriendshipStatus,
    ) -> Result<(), AppError> {
        let _: Vec<serde_json::Value> = self
            .write::<_, ()>(
                reqwest::Method::DELETE,
                tables::FRIENDSHIPS,
                &friendship_params(FriendshipQuery::Between(a, b, &[status]))?,
                None,
            )
            .await?;
        Ok(())
    }

    async fn get_motorcycle(&self, user_id: &str) -> Result<Option<Motorcycle>, AppError> {
        let rows: Vec<Motorcycle> = self
            .select(
                tables::MOTORCYCLES,
                &[("user_id", eq(user_id)), ("limit", "1".to_string())],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn insert_motorcycle(
        &self,
        user_id: &str,
        details: &MotorcycleDetails,
    ) -> Result<Motorcycle, AppError> {
        let rows: Vec<Motorcycle> = self
            .write(
                reqwest::Method::POST,
                tables::MOTORCYCLES,
                &[],
                Some(&Owned { user_id, row: details }),
            )
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| AppError::Database("Motorcycle insert returned no row".to_string()))
    }

    async fn update_motorcycle(
        &self,
        id: &str,
        user_id: &str,
        details: &MotorcycleDetails,
    ) -> Result<Option<Motorcycle>, AppError> {
        let body = serde_json::json!({
            "name": details.name,
            "photo_url": details.photo_url,
            "updated_at": Utc::now(),
        });
        let rows: Vec<Motorcycle> = self
            .write(
                reqwest::Method::PATCH,
                tables::MOTORCYCLES,
                &owned_row(id, user_id),
                Some(&body),
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn list_expirations(&self, user_id: &str) -> Result<Vec<Expiration>, AppError> {
        self.select(
            tables::EXPIRATIONS,
            &[
                ("user_id", eq(user_id)),
                ("order", "expiration_date.asc".to_string()),
            ],
        )
        .await
    }

    async fn insert_expiration(
        &self,
        user_id: &str,
        input: &ExpirationInput,
    ) -> Result<Expiration, AppError> {
        let rows: Vec<Expiration> = self
            .write(
                reqwest::Method::POST,
                tables::EXPIRATIONS,
                &[],
                Some(&Owned { user_id, row: input }),
            )
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| AppError::Database("Expiration insert returned no row".to_string()))
    }

    async fn update_expiration(
        &self,
        id: &str,
        user_id: &str,
        input: &ExpirationInput,
    ) -> Result<Option<Expiration>, AppError> {
        let rows: Vec<Expiration> = self
            .write(
                reqwest::Method::PATCH,
                tables::EXPIRATIONS,
                &owned_row(id, user_id),
                Some(input),
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn delete_expiration(&self, id: &str, user_id: &str) -> Result<bool, AppError> {
        let rows: Vec<serde_json::Value> = self
            .write::<_, ()>(
                reqwest::Method::DELETE,
                tables::EXPIRATIONS,
                &owned_row(id, user_id),
                None,
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn list_maintenances(&self, user_id: &str) -> Result<Vec<Maintenance>, AppError> {
        self.select(
            tables::MAINTENANCES,
            &[
                ("user_id", eq(user_id)),
                ("order", "date.desc".to_string()),
            ],
        )
        .await
    }

    async fn insert_maintenance(
        &self,
        user_id: &str,
        input: &MaintenanceInput,
    ) -> Result<Maintenance, AppError> {
        let rows: Vec<Maintenance> = self
            .write(
                reqwest::Method::POST,
                tables::MAINTENANCES,
                &[],
                Some(&Owned { user_id, row: input }),
            )
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| AppError::Database("Maintenance insert returned no row".to_string()))
    }

    async fn update_maintenance(
        &self,
        id: &str,
        user_id: &str,
        input: &MaintenanceInput,
    ) -> Result<Option<Maintenance>, AppError> {
        let rows: Vec<Maintenance> = self
            .write(
                reqwest::Method::PATCH,
                tables::MAINTENANCES,
                &owned_row(id, user_id),
                Some(input),
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn delete_maintenance(&self, id: &str, user_id: &str) -> Result<bool, AppError> {
        let rows: Vec<serde_json::Value> = self
            .write::<_, ()>(
                reqwest::Method::DELETE,
                tables::MAINTENANCES,
                &owned_row(id, user_id),
                None,
            )
            .await?;
        Ok(!rows.is_empty())
    }
}
