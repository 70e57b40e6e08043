// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process data store for offline mode and tests.
//!
//! Friendship writes are published to the attached broker the way the hosted
//! backend's change feed would publish them.

use crate::db::{tables, DataStore, FriendshipQuery, LocalBroker};
use crate::error::AppError;
use crate::models::{
    ChangeEvent, Expiration, ExpirationInput, FeedPost, Friendship, FriendshipStatus, Maintenance,
    MaintenanceInput, Motorcycle, MotorcycleDetails, NewFeedPost, NewRoute, Profile, Route,
    Visibility,
};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct MemoryInner {
    routes: DashMap<String, Route>,
    posts: DashMap<String, FeedPost>,
    /// (post id, user id)
    likes: DashSet<(String, String)>,
    profiles: DashMap<String, Profile>,
    friendships: DashMap<String, Friendship>,
    motorcycles: DashMap<String, Motorcycle>,
    expirations: DashMap<String, Expiration>,
    maintenances: DashMap<String, Maintenance>,
    next_id: AtomicU64,
    failing: AtomicBool,
}

/// Data store backed by concurrent maps.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
    broker: Option<LocalBroker>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that publishes friendship changes to `broker`.
    pub fn with_broker(broker: LocalBroker) -> Self {
        Self {
            inner: Arc::default(),
            broker: Some(broker),
        }
    }

    /// Make every subsequent operation fail with a database error.
    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }

    pub fn insert_profile(&self, profile: Profile) {
        self.inner.profiles.insert(profile.id.clone(), profile);
    }

    /// All friendship rows, for inspection.
    pub fn friendships(&self) -> Vec<Friendship> {
        self.inner
            .friendships
            .iter()
            .map(|r| r.value().clone())
            .collect()
    }

    /// Feed posts referencing a route.
    pub fn posts_for_route(&self, route_id: &str) -> Vec<FeedPost> {
        self.inner
            .posts
            .iter()
            .filter(|p| p.value().route_id.as_deref() == Some(route_id))
            .map(|p| p.value().clone())
            .collect()
    }

    /// Insert a post and return its id.
    pub fn add_post(&self, post: &NewFeedPost) -> String {
        let stored = FeedPost::from_new(self.next_id(), post, Utc::now());
        let id = stored.id.clone();
        self.inner.posts.insert(id.clone(), stored);
        id
    }

    pub fn post(&self, id: &str) -> Option<FeedPost> {
        self.inner.posts.get(id).map(|p| p.value().clone())
    }

    fn check(&self) -> Result<(), AppError> {
        if self.inner.failing.load(Ordering::SeqCst) {
            return Err(AppError::Database("Simulated database failure".to_string()));
        }
        Ok(())
    }

    /// Ids are sequential, so they break ties between equal timestamps.
    fn seq(id: &str) -> u64 {
        id.parse().unwrap_or_default()
    }

    fn next_id(&self) -> String {
        (self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn emit(&self, event: ChangeEvent) {
        if let Some(broker) = &self.broker {
            broker.publish(&event);
        }
    }

    fn to_json(row: &Friendship) -> Result<serde_json::Value, AppError> {
        serde_json::to_value(row).map_err(|e| AppError::Internal(e.into()))
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn insert_route(&self, route: &NewRoute) -> Result<Route, AppError> {
        self.check()?;
        let stored = Route::from_new(self.next_id(), route, Utc::now());
        self.inner.routes.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn list_routes(&self, user_id: &str) -> Result<Vec<Route>, AppError> {
        self.check()?;
        let mut routes: Vec<Route> = self
            .inner
            .routes
            .iter()
            .filter(|r| r.value().user_id == user_id)
            .map(|r| r.value().clone())
            .collect();
        routes.sort_by_key(|r| std::cmp::Reverse((r.created_at, Self::seq(&r.id))));
        Ok(routes)
    }

    async fn get_route(&self, id: &str) -> Result<Option<Route>, AppError> {
        self.check()?;
        Ok(self.inner.routes.get(id).map(|r| r.value().clone()))
    }

    async fn set_route_visibility(
        &self,
        id: &str,
        visibility: Visibility,
        is_published: bool,
    ) -> Result<Route, AppError> {
        self.check()?;
        let mut route = self
            .inner
            .routes
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("Route {}", id)))?;
        route.visibility = visibility;
        route.is_published = is_published;
        Ok(route.clone())
    }

    async fn insert_post(&self, post: &NewFeedPost) -> Result<(), AppError> {
        self.check()?;
        self.add_post(post);
        Ok(())
    }

    async fn delete_route_posts(&self, route_id: &str) -> Result<(), AppError> {
        self.check()?;
        self.inner
            .posts
            .retain(|_, p| p.route_id.as_deref() != Some(route_id));
        self.inner
            .likes
            .retain(|(post_id, _)| self.inner.posts.contains_key(post_id));
        Ok(())
    }

    async fn get_routes(&self, ids: &[String]) -> Result<Vec<Route>, AppError> {
        self.check()?;
        Ok(ids
            .iter()
            .filter_map(|id| self.inner.routes.get(id).map(|r| r.value().clone()))
            .collect())
    }

    async fn list_public_posts(
        &self,
        authors: Option<&[String]>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<FeedPost>, AppError> {
        self.check()?;
        let mut posts: Vec<FeedPost> = self
            .inner
            .posts
            .iter()
            .filter(|p| p.value().is_public)
            .filter(|p| authors.map_or(true, |a| a.contains(&p.value().author_id)))
            .map(|p| p.value().clone())
            .collect();
        posts.sort_by_key(|p| std::cmp::Reverse((p.created_at, Self::seq(&p.id))));
        Ok(posts.into_iter().skip(offset).take(limit).collect())
    }

    async fn liked_post_ids(
        &self,
        user_id: &str,
        post_ids: &[String],
    ) -> Result<Vec<String>, AppError> {
        self.check()?;
        Ok(post_ids
            .iter()
            .filter(|id| {
                self.inner
                    .likes
                    .contains(&((*id).clone(), user_id.to_string()))
            })
            .cloned()
            .collect())
    }

    async fn insert_like(&self, post_id: &str, user_id: &str) -> Result<bool, AppError> {
        self.check()?;
        let mut post = self
            .inner
            .posts
            .get_mut(post_id)
            .ok_or_else(|| AppError::NotFound(format!("Post {}", post_id)))?;
        let inserted = self
            .inner
            .likes
            .insert((post_id.to_string(), user_id.to_string()));
        if inserted {
            post.likes_count += 1;
        }
        Ok(inserted)
    }

    async fn delete_like(&self, post_id: &str, user_id: &str) -> Result<bool, AppError> {
        self.check()?;
        let removed = self
            .inner
            .likes
            .remove(&(post_id.to_string(), user_id.to_string()))
            .is_some();
        if removed {
            if let Some(mut post) = self.inner.posts.get_mut(post_id) {
                post.likes_count = post.likes_count.saturating_sub(1);
            }
        }
        Ok(removed)
    }

    async fn get_profile(&self, id: &str) -> Result<Option<Profile>, AppError> {
        self.check()?;
        Ok(self.inner.profiles.get(id).map(|p| p.value().clone()))
    }

    async fn get_profiles(&self, ids: &[String]) -> Result<Vec<Profile>, AppError> {
        self.check()?;
        Ok(ids
            .iter()
            .filter_map(|id| self.inner.profiles.get(id).map(|p| p.value().clone()))
            .collect())
    }

    async fn find_profile_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Profile>, AppError> {
        self.check()?;
        Ok(self
            .inner
            .profiles
            .iter()
            .find(|p| p.value().username == username)
            .map(|p| p.value().clone()))
    }

    async fn search_profiles(
        &self,
        query: &str,
        exclude_id: &str,
        limit: usize,
    ) -> Result<Vec<Profile>, AppError> {
        self.check()?;
        let needle = query.to_lowercase();
        let mut hits: Vec<Profile> = self
            .inner
            .profiles
            .iter()
            .filter(|p| p.value().id != exclude_id)
            .filter(|p| p.value().username.to_lowercase().contains(&needle))
            .map(|p| p.value().clone())
            .collect();
        hits.sort_by(|a, b| a.username.cmp(&b.username));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn list_friendships(
        &self,
        query: FriendshipQuery<'_>,
    ) -> Result<Vec<Friendship>, AppError> {
        self.check()?;
        Ok(self
            .inner
            .friendships
            .iter()
            .filter(|r| query.matches(r.value()))
            .map(|r| r.value().clone())
            .collect())
    }

    async fn insert_friendship(
        &self,
        user_id: &str,
        friend_id: &str,
    ) -> Result<Friendship, AppError> {
        self.check()?;
        let now = Utc::now();
        let row = Friendship {
            id: self.next_id(),
            user_id: user_id.to_string(),
            friend_id: friend_id.to_string(),
            status: FriendshipStatus::Pending,
            created_at: Some(now),
            updated_at: Some(now),
        };
        self.inner.friendships.insert(row.id.clone(), row.clone());
        self.emit(ChangeEvent::insert(tables::FRIENDSHIPS, Self::to_json(&row)?));
        Ok(row)
    }

    async fn update_friendship_status(
        &self,
        id: &str,
        recipient_id: &str,
        status: FriendshipStatus,
    ) -> Result<Option<Friendship>, AppError> {
        self.check()?;
        let (old, new) = {
            let Some(mut row) = self.inner.friendships.get_mut(id) else {
                return Ok(None);
            };
            if row.friend_id != recipient_id || row.status != FriendshipStatus::Pending {
                return Ok(None);
            }
            let old = row.clone();
            row.status = status;
            row.updated_at = Some(Utc::now());
            (old, row.clone())
        };
        self.emit(ChangeEvent::update(
            tables::FRIENDSHIPS,
            Some(Self::to_json(&old)?),
            Self::to_json(&new)?,
        ));
        Ok(Some(new))
    }

    async fn delete_friendship(
        &self,
        id: &str,
        recipient_id: &str,
    ) -> Result<Option<Friendship>, AppError> {
        self.check()?;
        let removed = self
            .inner
            .friendships
            .remove_if(id, |_, row| {
                row.friend_id == recipient_id && row.status == FriendshipStatus::Pending
            })
            .map(|(_, row)| row);
        if let Some(row) = &removed {
            // Delete payloads carry only the primary key.
            self.emit(ChangeEvent::delete(
                tables::FRIENDSHIPS,
                serde_json::json!({ "id": row.id }),
            ));
        }
        Ok(removed)
    }

    async fn delete_friendship_between(
        &self,
        a: &str,
        b: &str,
        status: FriendshipStatus,
    ) -> Result<(), AppError> {
        self.check()?;
        let statuses = [status];
        let query = FriendshipQuery::Between(a, b, &statuses);
        let ids: Vec<String> = self
            .inner
            .friendships
            .iter()
            .filter(|r| query.matches(r.value()))
            .map(|r| r.key().clone())
            .collect();
        for id in ids {
            if self.inner.friendships.remove(&id).is_some() {
                self.emit(ChangeEvent::delete(
                    tables::FRIENDSHIPS,
                    serde_json::json!({ "id": id }),
                ));
            }
        }
        Ok(())
    }

    async fn get_motorcycle(&self, user_id: &str) -> Result<Option<Motorcycle>, AppError> {
        self.check()?;
        Ok(self
            .inner
            .motorcycles
            .iter()
            .find(|m| m.value().user_id == user_id)
            .map(|m| m.value().clone()))
    }

    async fn insert_motorcycle(
        &self,
        user_id: &str,
        details: &MotorcycleDetails,
    ) -> Result<Motorcycle, AppError> {
        self.check()?;
        if self
            .inner
            .motorcycles
            .iter()
            .any(|m| m.value().user_id == user_id)
        {
            return Err(AppError::Conflict(
                "Rider already has a motorcycle".to_string(),
            ));
        }
        let now = Utc::now();
        let row = Motorcycle {
            id: self.next_id(),
            user_id: user_id.to_string(),
            name: details.name.clone(),
            photo_url: details.photo_url.clone(),
            created_at: Some(now),
            updated_at: Some(now),
        };
        self.inner.motorcycles.insert(row.id.clone(), row.clone());
        Ok(row)
    }

    async fn update_motorcycle(
        &self,
        id: &str,
        user_id: &str,
        details: &MotorcycleDetails,
    ) -> Result<Option<Motorcycle>, AppError> {
        self.check()?;
        let Some(mut row) = self.inner.motorcycles.get_mut(id) else {
            return Ok(None);
        };
        if row.user_id != user_id {
            return Ok(None);
        }
        row.name = details.name.clone();
        row.photo_url = details.photo_url.clone();
        row.updated_at = Some(Utc::now());
        Ok(Some(row.clone()))
    }

    async fn list_expirations(&self, user_id: &str) -> Result<Vec<Expiration>, AppError> {
        self.check()?;
        let mut rows: Vec<Expiration> = self
            .inner
            .expirations
            .iter()
            .filter(|e| e.value().user_id == user_id)
            .map(|e| e.value().clone())
            .collect();
        rows.sort_by_key(|e| (e.expiration_date, Self::seq(&e.id)));
        Ok(rows)
    }

    async fn insert_expiration(
        &self,
        user_id: &str,
        input: &ExpirationInput,
    ) -> Result<Expiration, AppError> {
        self.check()?;
        let row = Expiration {
            id: self.next_id(),
            user_id: user_id.to_string(),
            kind: input.kind,
            expiration_date: input.expiration_date,
            notes: input.notes.clone(),
        };
        self.inner.expirations.insert(row.id.clone(), row.clone());
        Ok(row)
    }

    async fn update_expiration(
        &self,
        id: &str,
        user_id: &str,
        input: &ExpirationInput,
    ) -> Result<Option<Expiration>, AppError> {
        self.check()?;
        let Some(mut row) = self.inner.expirations.get_mut(id) else {
            return Ok(None);
        };
        if row.user_id != user_id {
            return Ok(None);
        }
        row.kind = input.kind;
        row.expiration_date = input.expiration_date;
        row.notes = input.notes.clone();
        Ok(Some(row.clone()))
    }

    async fn delete_expiration(&self, id: &str, user_id: &str) -> Result<bool, AppError> {
        self.check()?;
        Ok(self
            .inner
            .expirations
            .remove_if(id, |_, row| row.user_id == user_id)
            .is_some())
    }

    async fn list_maintenances(&self, user_id: &str) -> Result<Vec<Maintenance>, AppError> {
        self.check()?;
        let mut rows: Vec<Maintenance> = self
            .inner
            .maintenances
            .iter()
            .filter(|m| m.value().user_id == user_id)
            .map(|m| m.value().clone())
            .collect();
        rows.sort_by_key(|m| std::cmp::Reverse((m.date, Self::seq(&m.id))));
        Ok(rows)
    }

    async fn insert_maintenance(
        &self,
        user_id: &str,
        input: &MaintenanceInput,
    ) -> Result<Maintenance, AppError> {
        self.check()?;
        let row = Maintenance {
            id: self.next_id(),
            user_id: user_id.to_string(),
            kind: input.kind.clone(),
            date: input.date,
            expiration_date: input.expiration_date,
            mileage: input.mileage,
            cost: input.cost,
            notes: input.notes.clone(),
        };
        self.inner.maintenances.insert(row.id.clone(), row.clone());
        Ok(row)
    }

    async fn update_maintenance(
        &self,
        id: &str,
        user_id: &str,
        input: &MaintenanceInput,
    ) -> Result<Option<Maintenance>, AppError> {
        self.check()?;
        let Some(mut row) = self.inner.maintenances.get_mut(id) else {
            return Ok(None);
        };
        if row.user_id != user_id {
            return Ok(None);
        }
        row.kind = input.kind.clone();
        row.date = input.date;
        row.expiration_date = input.expiration_date;
        row.mileage = input.mileage;
        row.cost = input.cost;
        row.notes = input.notes.clone();
        Ok(Some(row.clone()))
    }

    async fn delete_maintenance(&self, id: &str, user_id: &str) -> Result<bool, AppError> {
        self.check()?;
        Ok(self
            .inner
            .maintenances
            .remove_if(id, |_, row| row.user_id == user_id)
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ChannelProvider;
    use crate::models::{
        ChangeKind, ChannelMessage, ChannelSpec, ColumnFilter, ExpirationKind, PostKind,
        RouteGeometry,
    };
    use chrono::NaiveDate;

    fn profile(id: &str, username: &str) -> Profile {
        Profile {
            id: id.into(),
            username: username.into(),
            avatar_url: None,
            weekly_count: 0,
            streak_days: 0,
        }
    }

    fn new_route(user_id: &str, title: &str) -> NewRoute {
        NewRoute {
            user_id: user_id.into(),
            title: title.into(),
            description: None,
            distance_km: 1.0,
            points: RouteGeometry::default(),
            encoded_polyline: String::new(),
            metadata: None,
            gpx_url: None,
            visibility: Visibility::Private,
            is_published: false,
        }
    }

    #[tokio::test]
    async fn test_routes_listed_newest_first() {
        let store = MemoryStore::new();
        store.insert_route(&new_route("u1", "first")).await.unwrap();
        store.insert_route(&new_route("u1", "second")).await.unwrap();
        store.insert_route(&new_route("u2", "other")).await.unwrap();

        let titles: Vec<String> = store
            .list_routes("u1")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.title)
            .collect();
        assert_eq!(titles, vec!["second", "first"]);
    }

    #[tokio::test]
    async fn test_search_is_case_insensitive_and_excludes_self() {
        let store = MemoryStore::new();
        store.insert_profile(profile("me", "RiderMe"));
        store.insert_profile(profile("u1", "rider_one"));
        store.insert_profile(profile("u2", "biker"));

        let hits = store.search_profiles("RIDER", "me", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "u1");
    }

    #[tokio::test]
    async fn test_update_only_by_recipient() {
        let store = MemoryStore::new();
        let row = store.insert_friendship("a", "b").await.unwrap();

        let wrong = store
            .update_friendship_status(&row.id, "a", FriendshipStatus::Accepted)
            .await
            .unwrap();
        assert!(wrong.is_none());

        let updated = store
            .update_friendship_status(&row.id, "b", FriendshipStatus::Accepted)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, FriendshipStatus::Accepted);
    }

    #[tokio::test]
    async fn test_answered_request_cannot_be_answered_again() {
        let store = MemoryStore::new();
        let row = store.insert_friendship("a", "b").await.unwrap();
        store
            .update_friendship_status(&row.id, "b", FriendshipStatus::Accepted)
            .await
            .unwrap()
            .unwrap();

        assert!(store
            .update_friendship_status(&row.id, "b", FriendshipStatus::Accepted)
            .await
            .unwrap()
            .is_none());
        assert!(store.delete_friendship(&row.id, "b").await.unwrap().is_none());
        assert_eq!(store.friendships().len(), 1);
    }

    #[tokio::test]
    async fn test_friendship_writes_are_published() {
        let broker = LocalBroker::new();
        let store = MemoryStore::with_broker(broker.clone());
        let mut channel = broker
            .subscribe(ChannelSpec {
                name: "friend-requests".into(),
                table: tables::FRIENDSHIPS.into(),
                filter: ColumnFilter::eq("friend_id", "b"),
                kinds: vec![ChangeKind::Insert, ChangeKind::Update, ChangeKind::Delete],
            })
            .await
            .unwrap();
        let _subscribed = channel.messages.recv().await;

        let row = store.insert_friendship("a", "b").await.unwrap();
        store.delete_friendship(&row.id, "b").await.unwrap();

        match channel.messages.recv().await {
            Some(ChannelMessage::Change(e)) => assert_eq!(e.kind, ChangeKind::Insert),
            other => panic!("unexpected message: {:?}", other),
        }
        match channel.messages.recv().await {
            Some(ChannelMessage::Change(e)) => {
                assert_eq!(e.kind, ChangeKind::Delete);
                assert_eq!(e.old, Some(serde_json::json!({"id": row.id})));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    fn text_post(author_id: &str, content: &str, is_public: bool) -> NewFeedPost {
        NewFeedPost {
            author_id: author_id.into(),
            kind: PostKind::Text,
            route_id: None,
            content: Some(content.into()),
            visibility: Visibility::Public,
            is_public,
        }
    }

    #[tokio::test]
    async fn test_public_posts_paged_newest_first() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.add_post(&text_post("u1", &format!("post {}", i), true));
        }
        store.add_post(&text_post("u1", "hidden", false));
        store.add_post(&text_post("u2", "other author", true));

        let first: Vec<Option<String>> = store
            .list_public_posts(None, 0, 2)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.content)
            .collect();
        assert_eq!(
            first,
            vec![Some("other author".into()), Some("post 4".into())]
        );

        let authors = vec!["u1".to_string()];
        let page = store.list_public_posts(Some(&authors), 3, 10).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[1].content.as_deref(), Some("post 0"));
    }

    #[tokio::test]
    async fn test_likes_count_once_per_user() {
        let store = MemoryStore::new();
        let id = store.add_post(&text_post("u1", "hello", true));

        assert!(store.insert_like(&id, "u2").await.unwrap());
        assert!(!store.insert_like(&id, "u2").await.unwrap());
        assert!(store.insert_like(&id, "u3").await.unwrap());
        assert_eq!(store.post(&id).unwrap().likes_count, 2);
        assert_eq!(
            store.liked_post_ids("u2", &[id.clone()]).await.unwrap(),
            vec![id.clone()]
        );

        assert!(store.delete_like(&id, "u2").await.unwrap());
        assert!(!store.delete_like(&id, "u2").await.unwrap());
        assert_eq!(store.post(&id).unwrap().likes_count, 1);
        assert!(matches!(
            store.insert_like("missing", "u2").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_garage_rows_are_scoped_to_owner() {
        let store = MemoryStore::new();
        let details = MotorcycleDetails {
            name: Some("Tenere".into()),
            photo_url: None,
        };
        let bike = store.insert_motorcycle("u1", &details).await.unwrap();
        assert!(matches!(
            store.insert_motorcycle("u1", &details).await,
            Err(AppError::Conflict(_))
        ));
        assert!(store
            .update_motorcycle(&bike.id, "u2", &details)
            .await
            .unwrap()
            .is_none());

        let input = ExpirationInput {
            kind: ExpirationKind::Insurance,
            expiration_date: NaiveDate::from_ymd_opt(2026, 9, 1).unwrap(),
            notes: None,
        };
        let row = store.insert_expiration("u1", &input).await.unwrap();
        assert!(!store.delete_expiration(&row.id, "u2").await.unwrap());
        assert!(store
            .update_expiration(&row.id, "u2", &input)
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.list_expirations("u1").await.unwrap().len(), 1);
        assert!(store.list_expirations("u2").await.unwrap().is_empty());
        assert!(store.delete_expiration(&row.id, "u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_failing_store() {
        let store = MemoryStore::new();
        store.set_failing(true);
        assert!(matches!(
            store.get_profile("x").await,
            Err(AppError::Database(_))
        ));
    }
}
