// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Change-feed channels.
//!
//! `LocalBroker` fans row changes out to filtered channels. It is fed by the
//! in-memory store and by the database webhook endpoint, so subscribers see
//! the same stream whichever backend is in use.

use crate::models::{ChangeEvent, ChannelMessage, ChannelSpec, ChannelStatus};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub type ChannelId = u64;

/// Realtime subscription errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RealtimeError {
    #[error("Subscription rejected: {0}")]
    Rejected(String),

    #[error("Could not reach the realtime service: {0}")]
    Connect(String),
}

/// An open channel. Status and change messages arrive on `messages`.
pub struct Channel {
    pub id: ChannelId,
    pub messages: mpsc::UnboundedReceiver<ChannelMessage>,
}

/// Pub/sub substrate.
#[async_trait]
pub trait ChannelProvider: Send + Sync {
    /// Token presented when joining channels. Local providers ignore it.
    fn set_access_token(&self, _token: Option<String>) {}

    async fn subscribe(&self, spec: ChannelSpec) -> Result<Channel, RealtimeError>;

    /// Close a channel. Unknown ids are ignored.
    fn unsubscribe(&self, id: ChannelId);
}

/// Failure injected into subsequent subscriptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectedFailure {
    /// `subscribe` itself fails.
    Reject(String),
    /// The channel opens but reports a channel error instead of subscribing.
    ChannelError(String),
}

struct Subscriber {
    spec: ChannelSpec,
    tx: mpsc::UnboundedSender<ChannelMessage>,
}

struct BrokerInner {
    channels: DashMap<ChannelId, Subscriber>,
    next_id: AtomicU64,
    subscribe_calls: AtomicU32,
    failure: Mutex<Option<InjectedFailure>>,
}

/// In-process channel provider.
#[derive(Clone)]
pub struct LocalBroker {
    inner: Arc<BrokerInner>,
}

impl Default for LocalBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                channels: DashMap::new(),
                next_id: AtomicU64::new(1),
                subscribe_calls: AtomicU32::new(0),
                failure: Mutex::new(None),
            }),
        }
    }

    /// Deliver a change to every matching channel. Returns the number of
    /// channels it was delivered to.
    pub fn publish(&self, event: &ChangeEvent) -> usize {
        let mut delivered = 0;
        self.inner.channels.retain(|_, sub| {
            if !sub.spec.matches(event) {
                return true;
            }
            let ok = sub
                .tx
                .send(ChannelMessage::Change(event.clone()))
                .is_ok();
            if ok {
                delivered += 1;
            }
            ok
        });
        tracing::debug!(
            table = %event.table,
            kind = ?event.kind,
            delivered,
            "Change published"
        );
        delivered
    }

    /// Close every open channel, as a dropped connection would.
    pub fn close_all(&self) {
        for entry in self.inner.channels.iter() {
            let _ = entry
                .value()
                .tx
                .send(ChannelMessage::Status(ChannelStatus::Closed));
        }
        self.inner.channels.clear();
        tracing::info!("All realtime channels closed");
    }

    /// Make subsequent subscriptions fail (or succeed again with `None`).
    pub fn set_failure(&self, failure: Option<InjectedFailure>) {
        if let Ok(mut f) = self.inner.failure.lock() {
            *f = failure;
        }
    }

    pub fn active_channels(&self) -> usize {
        self.inner.channels.len()
    }

    /// Total `subscribe` calls since creation.
    pub fn subscribe_calls(&self) -> u32 {
        self.inner.subscribe_calls.load(Ordering::SeqCst)
    }

    fn current_failure(&self) -> Option<InjectedFailure> {
        self.inner.failure.lock().ok().and_then(|f| f.clone())
    }
}

#[async_trait]
impl ChannelProvider for LocalBroker {
    async fn subscribe(&self, spec: ChannelSpec) -> Result<Channel, RealtimeError> {
        self.inner.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, messages) = mpsc::unbounded_channel();

        match self.current_failure() {
            Some(InjectedFailure::Reject(msg)) => return Err(RealtimeError::Rejected(msg)),
            Some(InjectedFailure::ChannelError(msg)) => {
                let _ = tx.send(ChannelMessage::Status(ChannelStatus::ChannelError(msg)));
                return Ok(Channel { id, messages });
            }
            None => {}
        }

        let _ = tx.send(ChannelMessage::Status(ChannelStatus::Subscribed));
        tracing::debug!(channel = %spec.name, channel_id = id, "Channel subscribed");
        self.inner.channels.insert(id, Subscriber { spec, tx });
        Ok(Channel { id, messages })
    }

    fn unsubscribe(&self, id: ChannelId) {
        if self.inner.channels.remove(&id).is_some() {
            tracing::debug!(channel_id = id, "Channel unsubscribed");
        }
    }
}
