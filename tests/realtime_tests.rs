// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Realtime engine scenarios against the local broker and the socket provider.
//!
//! The clock is paused, so backoff delays elapse as soon as the runtime is
//! otherwise idle.

use moto_tracker::db::{
    tables, DataStore, InjectedFailure, LocalBroker, MemoryStore, SocketProvider,
};
use moto_tracker::models::{ChangeEvent, ConnectionState, ConnectionStatus};
use moto_tracker::services::realtime::{CHANNEL_CLOSED, MAX_ATTEMPTS_EXCEEDED};
use moto_tracker::services::{BackoffPolicy, FriendsService, Notifier, RealtimeEngine};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

mod common;

use common::eventually;

struct Harness {
    engine: RealtimeEngine,
    broker: LocalBroker,
    store: MemoryStore,
    friends: FriendsService,
    state: watch::Receiver<ConnectionState>,
}

async fn harness() -> Harness {
    let broker = LocalBroker::new();
    let store = MemoryStore::with_broker(broker.clone());
    store.insert_profile(common::profile("me", "me"));
    store.insert_profile(common::profile("alice", "alice"));

    let friends = FriendsService::new(Arc::new(store.clone()), Notifier::new());
    friends.set_user("me").await;
    let engine = RealtimeEngine::spawn(
        Arc::new(broker.clone()),
        friends.clone(),
        BackoffPolicy::default(),
    );
    let state = engine.subscribe_state();

    Harness {
        engine,
        broker,
        store,
        friends,
        state,
    }
}

async fn connected() -> Harness {
    let mut h = harness().await;
    h.engine.start("me");
    h.state
        .wait_for(|s| s.status == ConnectionStatus::Connected)
        .await
        .unwrap();
    h
}

#[tokio::test(start_paused = true)]
async fn test_three_failures_stop_auto_retry_until_manual_retry() {
    let mut h = harness().await;
    h.broker
        .set_failure(Some(InjectedFailure::Reject("denied".to_string())));
    h.engine.start("me");

    let state = h
        .state
        .wait_for(|s| s.last_error.as_deref() == Some(MAX_ATTEMPTS_EXCEEDED))
        .await
        .unwrap()
        .clone();
    assert_eq!(state.status, ConnectionStatus::Error);
    assert_eq!(state.attempts, 3);
    assert_eq!(h.broker.subscribe_calls(), 3);

    // No further automatic attempts.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.broker.subscribe_calls(), 3);
    assert_eq!(h.engine.state().status, ConnectionStatus::Error);

    h.broker.set_failure(None);
    h.engine.retry_connection();
    let state = h
        .state
        .wait_for(|s| s.status == ConnectionStatus::Connected)
        .await
        .unwrap()
        .clone();
    assert_eq!(state.attempts, 0);
    assert!(state.last_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_backoff_delays_double() {
    let mut h = harness().await;
    h.broker
        .set_failure(Some(InjectedFailure::Reject("denied".to_string())));
    let started = tokio::time::Instant::now();
    h.engine.start("me");

    h.state
        .wait_for(|s| s.last_error.as_deref() == Some(MAX_ATTEMPTS_EXCEEDED))
        .await
        .unwrap();

    // 1 s + 2 s + 4 s between the three attempts and the final check.
    assert_eq!(started.elapsed(), Duration::from_secs(7));
}

#[tokio::test(start_paused = true)]
async fn test_channel_error_enters_error_and_recovers() {
    let mut h = harness().await;
    h.broker
        .set_failure(Some(InjectedFailure::ChannelError("boom".to_string())));
    h.engine.start("me");

    let state = h
        .state
        .wait_for(|s| s.status == ConnectionStatus::Error)
        .await
        .unwrap()
        .clone();
    assert_eq!(state.last_error.as_deref(), Some("Channel error: boom"));
    assert_eq!(state.attempts, 1);

    h.broker.set_failure(None);
    h.state
        .wait_for(|s| s.status == ConnectionStatus::Connected)
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_close_while_connected_retries() {
    let mut h = connected().await;

    h.broker.close_all();
    let state = h
        .state
        .wait_for(|s| s.status == ConnectionStatus::Error)
        .await
        .unwrap()
        .clone();
    assert_eq!(state.last_error.as_deref(), Some(CHANNEL_CLOSED));

    h.state
        .wait_for(|s| s.status == ConnectionStatus::Connected)
        .await
        .unwrap();
    assert_eq!(h.broker.active_channels(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_pending_retry() {
    let mut h = harness().await;
    h.broker
        .set_failure(Some(InjectedFailure::Reject("denied".to_string())));
    h.engine.start("me");
    h.state
        .wait_for(|s| s.status == ConnectionStatus::Error)
        .await
        .unwrap();

    h.engine.stop();
    h.state
        .wait_for(|s| s.status == ConnectionStatus::Disconnected)
        .await
        .unwrap();
    let calls = h.broker.subscribe_calls();

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.broker.subscribe_calls(), calls);
    assert_eq!(h.engine.state(), ConnectionState::default());
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_created_event_yields_one_request() {
    let h = connected().await;

    let row = h.store.insert_friendship("alice", "me").await.unwrap();
    let friends = &h.friends;
    eventually("request delivered", || async move {
        friends.requests().await.len() == 1
    })
    .await;

    let duplicate = ChangeEvent::insert(tables::FRIENDSHIPS, serde_json::to_value(&row).unwrap());
    assert_eq!(h.broker.publish(&duplicate), 1);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let requests = h.friends.requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].id, row.id);
    assert_eq!(requests[0].from.username, "alice");
}

#[tokio::test(start_paused = true)]
async fn test_accept_moves_request_to_friends() {
    let h = connected().await;

    let row = h.store.insert_friendship("alice", "me").await.unwrap();
    let friends = &h.friends;
    eventually("request delivered", || async move {
        friends.requests().await.len() == 1
    })
    .await;

    h.friends.accept(&row.id).await.unwrap();
    assert!(h.friends.requests().await.is_empty());
    let friends = h.friends.friends().await;
    assert_eq!(friends.len(), 1);
    assert_eq!(friends[0].id, "alice");

    // The accepted update for the same row arrives afterwards and is a no-op.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.friends.requests().await.is_empty());
    assert_eq!(h.friends.friends().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_decline_removes_request_and_row() {
    let h = connected().await;

    let row = h.store.insert_friendship("alice", "me").await.unwrap();
    let friends = &h.friends;
    eventually("request delivered", || async move {
        friends.requests().await.len() == 1
    })
    .await;

    h.friends.decline(&row.id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(h.friends.requests().await.is_empty());
    assert!(h.store.friendships().is_empty());
    assert_eq!(h.engine.state().status, ConnectionStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_remote_delete_drops_request() {
    let h = connected().await;

    let row = h.store.insert_friendship("alice", "me").await.unwrap();
    let friends = &h.friends;
    eventually("request delivered", || async move {
        friends.requests().await.len() == 1
    })
    .await;

    // Sender withdraws: the change feed carries only the primary key.
    let event = ChangeEvent::delete(tables::FRIENDSHIPS, serde_json::json!({ "id": row.id }));
    h.broker.publish(&event);

    eventually("request withdrawn", || async move {
        friends.requests().await.is_empty()
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_reloads_requests_missed_while_down() {
    let mut h = harness().await;
    h.broker
        .set_failure(Some(InjectedFailure::Reject("denied".to_string())));
    h.engine.start("me");
    h.state
        .wait_for(|s| s.status == ConnectionStatus::Error)
        .await
        .unwrap();

    // Nobody is subscribed, so this insert is never delivered as an event.
    h.store.insert_friendship("alice", "me").await.unwrap();
    assert!(h.friends.requests().await.is_empty());

    h.broker.set_failure(None);
    h.engine.retry_connection();
    h.state
        .wait_for(|s| s.status == ConnectionStatus::Connected)
        .await
        .unwrap();

    let friends = &h.friends;
    eventually("missed request reloaded", || async move {
        friends.requests().await.len() == 1
    })
    .await;
    assert_eq!(h.friends.requests().await[0].from.username, "alice");
}

#[tokio::test(start_paused = true)]
async fn test_automatic_reconnect_reloads_requests() {
    let h = connected().await;

    h.broker.close_all();
    let mut state = h.engine.subscribe_state();
    state
        .wait_for(|s| s.status == ConnectionStatus::Error)
        .await
        .unwrap();
    // No channel is open, so only a reload can pick this up.
    h.store.insert_friendship("alice", "me").await.unwrap();
    state
        .wait_for(|s| s.status == ConnectionStatus::Connected)
        .await
        .unwrap();

    let friends = &h.friends;
    eventually("request reloaded after automatic reconnect", || async move {
        friends.requests().await.len() == 1
    })
    .await;
}

#[tokio::test]
async fn test_unreachable_socket_puts_engine_in_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let store = MemoryStore::new();
    let friends = FriendsService::new(Arc::new(store), Notifier::new());
    friends.set_user("me").await;
    let provider = SocketProvider::new(&format!("http://{}", addr), "anon");
    let engine = RealtimeEngine::spawn(Arc::new(provider), friends, BackoffPolicy::default());
    let mut state = engine.subscribe_state();
    engine.start("me");

    let state = state
        .wait_for(|s| s.status == ConnectionStatus::Error)
        .await
        .unwrap()
        .clone();
    assert!(state
        .last_error
        .as_deref()
        .is_some_and(|e| e.starts_with("Could not reach the realtime service")));
    engine.stop();
}
