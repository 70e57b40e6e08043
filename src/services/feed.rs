// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Feed service: public posts from everyone or only from the rider's
//! friends, loaded one page at a time.
//!
//! Loads are serialized. A reset load waits for any load in flight;
//! `load_more` returns the current view instead of queueing behind one.

use crate::db::DataStore;
use crate::error::AppError;
use crate::models::{FeedEntry, FeedMode, FeedPost, PostAuthor, RouteSummary};
use crate::services::friends::FriendsService;
use crate::services::notify::Notifier;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Posts fetched per page.
pub const POSTS_PER_PAGE: usize = 10;

#[derive(Debug, Default, Clone)]
struct FeedState {
    user_id: Option<String>,
    mode: FeedMode,
    entries: Vec<FeedEntry>,
    /// Rows consumed so far, the offset of the next page
    offset: usize,
    has_more: bool,
}

/// Feed view returned by the API.
#[derive(Debug, Clone, Serialize)]
pub struct FeedSnapshot {
    pub mode: FeedMode,
    pub posts: Vec<FeedEntry>,
    pub has_more: bool,
}

/// Shared handle to the rider's feed.
#[derive(Clone)]
pub struct FeedService {
    db: Arc<dyn DataStore>,
    friends: FriendsService,
    notifier: Notifier,
    state: Arc<RwLock<FeedState>>,
    loading: Arc<Mutex<()>>,
}

impl FeedService {
    pub fn new(db: Arc<dyn DataStore>, friends: FriendsService, notifier: Notifier) -> Self {
        Self {
            db,
            friends,
            notifier,
            state: Arc::new(RwLock::new(FeedState::default())),
            loading: Arc::new(Mutex::new(())),
        }
    }

    /// Bind to a rider, dropping any feed loaded for a previous one.
    pub async fn set_user(&self, user_id: &str) {
        *self.state.write().await = FeedState {
            user_id: Some(user_id.to_string()),
            ..FeedState::default()
        };
    }

    pub async fn clear(&self) {
        *self.state.write().await = FeedState::default();
    }

    pub async fn snapshot(&self) -> FeedSnapshot {
        let state = self.state.read().await;
        FeedSnapshot {
            mode: state.mode,
            posts: state.entries.clone(),
            has_more: state.has_more,
        }
    }

    /// Load the first page in `mode`, replacing the current view.
    ///
    /// On failure the previous view, including its mode, is kept.
    pub async fn load(&self, mode: FeedMode) -> Result<FeedSnapshot, AppError> {
        let _loading = self.loading.lock().await;
        self.load_page(mode, true).await?;
        Ok(self.snapshot().await)
    }

    /// Reload the first page in the current mode.
    pub async fn refresh(&self) -> Result<FeedSnapshot, AppError> {
        let mode = self.state.read().await.mode;
        self.load(mode).await
    }

    /// Append the next page. A no-op when the feed is exhausted or a load
    /// is already running.
    pub async fn load_more(&self) -> Result<FeedSnapshot, AppError> {
        let Ok(_loading) = self.loading.try_lock() else {
            tracing::debug!("Feed load already running");
            return Ok(self.snapshot().await);
        };
        let (mode, has_more) = {
            let state = self.state.read().await;
            (state.mode, state.has_more)
        };
        if has_more {
            self.load_page(mode, false).await?;
        }
        Ok(self.snapshot().await)
    }

    async fn load_page(&self, mode: FeedMode, reset: bool) -> Result<(), AppError> {
        let (me, offset) = {
            let state = self.state.read().await;
            let me = state.user_id.clone().ok_or(AppError::Unauthorized)?;
            (me, if reset { 0 } else { state.offset })
        };

        let page = match self.fetch(&me, mode, offset).await {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    ?mode,
                    offset,
                    "Feed load failed, keeping previous posts"
                );
                if !matches!(e, AppError::Unauthorized) {
                    self.notifier.error("Error", "Failed to load feed");
                }
                return Err(e);
            }
        };

        let mut state = self.state.write().await;
        if state.user_id.as_deref() != Some(me.as_str()) {
            tracing::debug!("Rider changed during feed load, dropping page");
            return Ok(());
        }
        let fetched = page.len();
        state.has_more = fetched == POSTS_PER_PAGE;
        if reset {
            state.mode = mode;
            state.entries = page;
            state.offset = fetched;
        } else {
            // New posts shift later pages, so a page may repeat earlier rows.
            let seen: HashSet<String> =
                state.entries.iter().map(|e| e.post.id.clone()).collect();
            state
                .entries
                .extend(page.into_iter().filter(|e| !seen.contains(&e.post.id)));
            state.offset += fetched;
        }
        tracing::debug!(?mode, fetched, total = state.entries.len(), "Feed page loaded");
        Ok(())
    }

    async fn fetch(
        &self,
        me: &str,
        mode: FeedMode,
        offset: usize,
    ) -> Result<Vec<FeedEntry>, AppError> {
        let authors = match mode {
            FeedMode::All => None,
            FeedMode::Friends => {
                let ids: Vec<String> = self
                    .friends
                    .friends()
                    .await
                    .into_iter()
                    .map(|f| f.id)
                    .collect();
                if ids.is_empty() {
                    return Ok(Vec::new());
                }
                Some(ids)
            }
        };

        let posts = self
            .db
            .list_public_posts(authors.as_deref(), offset, POSTS_PER_PAGE)
            .await?;
        self.join(me, posts).await
    }

    /// Attach authors, route previews and the rider's likes to posts.
    async fn join(&self, me: &str, posts: Vec<FeedPost>) -> Result<Vec<FeedEntry>, AppError> {
        if posts.is_empty() {
            return Ok(Vec::new());
        }

        let author_ids = distinct(posts.iter().map(|p| p.author_id.as_str()));
        let route_ids = distinct(posts.iter().filter_map(|p| p.route_id.as_deref()));
        let post_ids: Vec<String> = posts.iter().map(|p| p.id.clone()).collect();

        let (profiles, routes, liked) = tokio::try_join!(
            self.db.get_profiles(&author_ids),
            self.db.get_routes(&route_ids),
            self.db.liked_post_ids(me, &post_ids),
        )?;
        let liked: HashSet<String> = liked.into_iter().collect();

        Ok(posts
            .into_iter()
            .map(|post| {
                let author = profiles
                    .iter()
                    .find(|p| p.id == post.author_id)
                    .cloned()
                    .map(PostAuthor::from)
                    .unwrap_or_else(|| PostAuthor::unknown(&post.author_id));
                let route = post.route_id.as_deref().and_then(|id| {
                    routes
                        .iter()
                        .find(|r| r.id == id)
                        .cloned()
                        .map(RouteSummary::from)
                });
                FeedEntry {
                    is_liked: liked.contains(&post.id),
                    post,
                    author,
                    route,
                }
            })
            .collect())
    }

    /// Like a post. Liking twice counts once.
    pub async fn like(&self, post_id: &str) -> Result<(), AppError> {
        let me = self.me().await?;
        let inserted = self.db.insert_like(post_id, &me).await?;
        self.patch(post_id, |entry| {
            if inserted && !entry.is_liked {
                entry.post.likes_count += 1;
            }
            entry.is_liked = true;
        })
        .await;
        tracing::debug!(post_id, inserted, "Post liked");
        Ok(())
    }

    /// Withdraw a like. Unliking a post that was not liked changes nothing.
    pub async fn unlike(&self, post_id: &str) -> Result<(), AppError> {
        let me = self.me().await?;
        let removed = self.db.delete_like(post_id, &me).await?;
        self.patch(post_id, |entry| {
            if removed && entry.is_liked {
                entry.post.likes_count = entry.post.likes_count.saturating_sub(1);
            }
            entry.is_liked = false;
        })
        .await;
        tracing::debug!(post_id, removed, "Post unliked");
        Ok(())
    }

    async fn patch(&self, post_id: &str, apply: impl FnOnce(&mut FeedEntry)) {
        let mut state = self.state.write().await;
        if let Some(entry) = state.entries.iter_mut().find(|e| e.post.id == post_id) {
            apply(entry);
        }
    }

    async fn me(&self) -> Result<String, AppError> {
        self.state
            .read()
            .await
            .user_id
            .clone()
            .ok_or(AppError::Unauthorized)
    }
}

fn distinct<'a>(ids: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for id in ids {
        if !out.iter().any(|o| o == id) {
            out.push(id.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::{
        FriendshipStatus, NewFeedPost, NewRoute, PostKind, Profile, RouteGeometry, Visibility,
    };

    fn profile(id: &str, username: &str) -> Profile {
        Profile {
            id: id.into(),
            username: username.into(),
            avatar_url: None,
            weekly_count: 0,
            streak_days: 0,
        }
    }

    fn text_post(author_id: &str, content: &str) -> NewFeedPost {
        NewFeedPost {
            author_id: author_id.into(),
            kind: PostKind::Text,
            route_id: None,
            content: Some(content.into()),
            visibility: Visibility::Public,
            is_public: true,
        }
    }

    async fn setup() -> (FeedService, FriendsService, MemoryStore, Notifier) {
        let store = MemoryStore::new();
        store.insert_profile(profile("me", "me"));
        store.insert_profile(profile("alice", "alice"));
        store.insert_profile(profile("bob", "bob"));
        let notifier = Notifier::new();
        let friends = FriendsService::new(Arc::new(store.clone()), notifier.clone());
        friends.set_user("me").await;
        let feed = FeedService::new(Arc::new(store.clone()), friends.clone(), notifier.clone());
        feed.set_user("me").await;
        (feed, friends, store, notifier)
    }

    #[tokio::test]
    async fn test_pages_until_exhausted() {
        let (feed, _friends, store, _notifier) = setup().await;
        for i in 0..23 {
            store.add_post(&text_post("alice", &format!("post {}", i)));
        }

        let first = feed.load(FeedMode::All).await.unwrap();
        assert_eq!(first.posts.len(), POSTS_PER_PAGE);
        assert!(first.has_more);
        assert_eq!(first.posts[0].post.content.as_deref(), Some("post 22"));
        assert_eq!(first.posts[0].author.username, "alice");

        let second = feed.load_more().await.unwrap();
        assert_eq!(second.posts.len(), 20);
        let third = feed.load_more().await.unwrap();
        assert_eq!(third.posts.len(), 23);
        assert!(!third.has_more);
        assert_eq!(third.posts[22].post.content.as_deref(), Some("post 0"));

        let again = feed.load_more().await.unwrap();
        assert_eq!(again.posts.len(), 23);

        let refreshed = feed.refresh().await.unwrap();
        assert_eq!(refreshed.posts.len(), POSTS_PER_PAGE);
        assert!(refreshed.has_more);
    }

    #[tokio::test]
    async fn test_friends_mode_filters_authors() {
        let (feed, friends, store, _notifier) = setup().await;
        store.add_post(&text_post("alice", "from a friend"));
        store.add_post(&text_post("bob", "from a stranger"));

        let empty = feed.load(FeedMode::Friends).await.unwrap();
        assert_eq!(empty.mode, FeedMode::Friends);
        assert!(empty.posts.is_empty());
        assert!(!empty.has_more);

        let row = store.insert_friendship("alice", "me").await.unwrap();
        store
            .update_friendship_status(&row.id, "me", FriendshipStatus::Accepted)
            .await
            .unwrap();
        friends.refresh_friends().await.unwrap();

        let view = feed.refresh().await.unwrap();
        assert_eq!(view.posts.len(), 1);
        assert_eq!(view.posts[0].post.author_id, "alice");

        let all = feed.load(FeedMode::All).await.unwrap();
        assert_eq!(all.posts.len(), 2);
    }

    #[tokio::test]
    async fn test_entries_carry_route_and_unknown_author() {
        let (feed, _friends, store, _notifier) = setup().await;
        let route = store
            .insert_route(&NewRoute {
                user_id: "ghost".into(),
                title: "Stelvio".into(),
                description: None,
                distance_km: 48.5,
                points: RouteGeometry::default(),
                encoded_polyline: String::new(),
                metadata: None,
                gpx_url: None,
                visibility: Visibility::Public,
                is_published: true,
            })
            .await
            .unwrap();
        store.add_post(&NewFeedPost::for_route(&route));

        let view = feed.load(FeedMode::All).await.unwrap();
        let entry = &view.posts[0];
        assert_eq!(entry.author.username, "Unknown");
        let summary = entry.route.as_ref().unwrap();
        assert_eq!(summary.title, "Stelvio");
        assert_eq!(summary.distance_km, 48.5);
    }

    #[tokio::test]
    async fn test_like_and_unlike_patch_local_counts() {
        let (feed, _friends, store, _notifier) = setup().await;
        let id = store.add_post(&text_post("alice", "hello"));
        feed.load(FeedMode::All).await.unwrap();

        feed.like(&id).await.unwrap();
        feed.like(&id).await.unwrap();
        let entry = feed.snapshot().await.posts[0].clone();
        assert!(entry.is_liked);
        assert_eq!(entry.post.likes_count, 1);
        assert_eq!(store.post(&id).unwrap().likes_count, 1);

        feed.unlike(&id).await.unwrap();
        feed.unlike(&id).await.unwrap();
        let entry = feed.snapshot().await.posts[0].clone();
        assert!(!entry.is_liked);
        assert_eq!(entry.post.likes_count, 0);

        // Likes survive a reload.
        feed.like(&id).await.unwrap();
        let view = feed.refresh().await.unwrap();
        assert!(view.posts[0].is_liked);
        assert_eq!(view.posts[0].post.likes_count, 1);
    }

    #[tokio::test]
    async fn test_failed_load_keeps_previous_posts() {
        let (feed, friends, store, notifier) = setup().await;
        store.add_post(&text_post("alice", "hello"));
        let row = store.insert_friendship("me", "alice").await.unwrap();
        store
            .update_friendship_status(&row.id, "alice", FriendshipStatus::Accepted)
            .await
            .unwrap();
        friends.refresh_friends().await.unwrap();
        feed.load(FeedMode::All).await.unwrap();

        store.set_failing(true);
        assert!(matches!(
            feed.load(FeedMode::Friends).await,
            Err(AppError::Database(_))
        ));
        let view = feed.snapshot().await;
        assert_eq!(view.mode, FeedMode::All);
        assert_eq!(view.posts.len(), 1);
        assert!(notifier
            .drain()
            .iter()
            .any(|n| n.message == "Failed to load feed"));
    }

    #[tokio::test]
    async fn test_feed_requires_rider() {
        let (feed, _friends, _store, _notifier) = setup().await;
        feed.clear().await;
        assert!(matches!(
            feed.load(FeedMode::All).await,
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(feed.like("1").await, Err(AppError::Unauthorized)));
    }
}
