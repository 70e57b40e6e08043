// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Realtime engine: keeps the friendship change feed subscribed.
//!
//! A single driver task owns the connection state. Commands from the API,
//! channel messages and retry deadlines all arrive on one inbox and are
//! handled strictly in order. Status is published on a `watch` channel.
//!
//! ```text
//! Disconnected --start--> Connecting --subscribed--> Connected
//!                             |                          |
//!                             +--error--> Error <--closed+
//!                                           |
//!                     retry after min(base * 2^attempts, cap)
//! ```
//!
//! Each (re)connect bumps a generation counter; messages from channels of an
//! older generation are dropped. Changes published while the feed was down
//! are never replayed, so reaching Connected again after a failure reloads
//! the friend lists.

use crate::db::{tables, Channel, ChannelId, ChannelProvider};
use crate::models::{
    ChangeKind, ChannelMessage, ChannelSpec, ChannelStatus, ColumnFilter, ConnectionState,
    ConnectionStatus,
};
use crate::services::backoff::{BackoffPolicy, BackoffScheduler};
use crate::services::friends::FriendsService;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

pub const MAX_ATTEMPTS_EXCEEDED: &str = "Maximum connection attempts exceeded";
pub const CHANNEL_CLOSED: &str = "Channel closed";

enum Input {
    Start(String),
    Stop,
    Retry,
    RetryDue,
    Channel {
        generation: u64,
        primary: bool,
        message: ChannelMessage,
    },
    Shutdown,
}

/// Handle to the realtime driver task.
#[derive(Clone)]
pub struct RealtimeEngine {
    commands: mpsc::UnboundedSender<Input>,
    state: watch::Receiver<ConnectionState>,
}

impl RealtimeEngine {
    /// Spawn the driver. It stays Disconnected until `start`.
    pub fn spawn(
        provider: Arc<dyn ChannelProvider>,
        friends: FriendsService,
        policy: BackoffPolicy,
    ) -> Self {
        let (commands, inbox) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::default());

        let driver = Driver {
            provider,
            friends,
            policy,
            inbox: commands.downgrade(),
            state: state_tx,
            user_id: None,
            generation: 0,
            channels: Vec::new(),
            forwarders: Vec::new(),
            scheduler: BackoffScheduler::new(),
            pending_delay: policy.base,
            resync: false,
        };
        tokio::spawn(driver.run(inbox));

        Self { commands, state }
    }

    /// Subscribe for `user_id`, replacing any previous subscription.
    pub fn start(&self, user_id: &str) {
        self.send(Input::Start(user_id.to_string()));
    }

    /// Drop subscriptions and pending retries; status becomes Disconnected.
    pub fn stop(&self) {
        self.send(Input::Stop);
    }

    /// Manual retry: resets the attempt counter and connects.
    pub fn retry_connection(&self) {
        self.send(Input::Retry);
    }

    /// Stop the driver task for good.
    pub fn shutdown(&self) {
        self.send(Input::Shutdown);
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    fn send(&self, input: Input) {
        if self.commands.send(input).is_err() {
            tracing::warn!("Realtime driver is not running");
        }
    }
}

struct Driver {
    provider: Arc<dyn ChannelProvider>,
    friends: FriendsService,
    policy: BackoffPolicy,
    inbox: mpsc::WeakUnboundedSender<Input>,
    state: watch::Sender<ConnectionState>,
    user_id: Option<String>,
    generation: u64,
    channels: Vec<ChannelId>,
    forwarders: Vec<JoinHandle<()>>,
    scheduler: BackoffScheduler,
    /// Delay before the retry that follows a failure of the current attempt
    pending_delay: Duration,
    /// Set after a failure; the next Connected triggers a full refresh
    resync: bool,
}

impl Driver {
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Input>) {
        while let Some(input) = inbox.recv().await {
            match input {
                Input::Start(user_id) => {
                    self.teardown();
                    self.resync = false;
                    self.user_id = Some(user_id);
                    self.set_state(ConnectionState::default());
                    self.connect().await;
                }
                Input::Stop => {
                    self.teardown();
                    self.resync = false;
                    self.user_id = None;
                    self.set_state(ConnectionState::default());
                    tracing::info!("Realtime subscriptions stopped");
                }
                Input::Retry => {
                    if self.user_id.is_none() {
                        tracing::warn!("Manual retry ignored: no rider logged in");
                        continue;
                    }
                    tracing::info!("Manual realtime retry");
                    self.state.send_modify(|s| s.attempts = 0);
                    self.connect().await;
                }
                Input::RetryDue => {
                    if self.status() == ConnectionStatus::Error && self.user_id.is_some() {
                        self.connect().await;
                    }
                }
                Input::Channel {
                    generation,
                    primary,
                    message,
                } => {
                    if generation == self.generation {
                        self.on_message(primary, message).await;
                    }
                }
                Input::Shutdown => break,
            }
        }
        self.teardown();
        tracing::debug!("Realtime driver exited");
    }

    fn status(&self) -> ConnectionStatus {
        self.state.borrow().status
    }

    fn attempts(&self) -> u32 {
        self.state.borrow().attempts
    }

    fn set_state(&self, state: ConnectionState) {
        tracing::debug!(status = ?state.status, attempts = state.attempts, "Realtime status");
        self.state.send_replace(state);
    }

    async fn connect(&mut self) {
        let Some(user_id) = self.user_id.clone() else {
            return;
        };
        let attempts = self.attempts();

        self.teardown();

        if self.policy.exhausted(attempts) {
            tracing::warn!(attempts, "Max realtime connection attempts reached");
            self.set_state(ConnectionState {
                status: ConnectionStatus::Error,
                attempts,
                last_error: Some(MAX_ATTEMPTS_EXCEEDED.to_string()),
            });
            return;
        }

        self.pending_delay = self.policy.delay_for(attempts);
        self.set_state(ConnectionState {
            status: ConnectionStatus::Connecting,
            attempts: attempts + 1,
            last_error: None,
        });
        tracing::info!(attempt = attempts + 1, user_id = %user_id, "Starting realtime subscriptions");

        let primary = ChannelSpec {
            name: format!("friend-requests-{}", user_id),
            table: tables::FRIENDSHIPS.to_string(),
            filter: ColumnFilter::eq("friend_id", &user_id),
            kinds: vec![ChangeKind::Insert, ChangeKind::Update, ChangeKind::Delete],
        };
        match self.provider.subscribe(primary).await {
            Ok(channel) => self.attach(channel, true),
            Err(e) => {
                self.fail(e.to_string());
                return;
            }
        }

        let secondary = ChannelSpec {
            name: format!("friend-updates-{}", user_id),
            table: tables::FRIENDSHIPS.to_string(),
            filter: ColumnFilter::eq("user_id", &user_id),
            kinds: vec![ChangeKind::Update],
        };
        match self.provider.subscribe(secondary).await {
            Ok(channel) => self.attach(channel, false),
            Err(e) => tracing::warn!(error = %e, "Secondary realtime subscription failed"),
        }
    }

    /// Forward a channel's messages into the inbox, tagged with the current
    /// generation. The end of the stream is reported as `Closed`.
    fn attach(&mut self, mut channel: Channel, primary: bool) {
        let Some(inbox) = self.inbox.upgrade() else {
            return;
        };
        let generation = self.generation;
        self.channels.push(channel.id);
        self.forwarders.push(tokio::spawn(async move {
            while let Some(message) = channel.messages.recv().await {
                let input = Input::Channel {
                    generation,
                    primary,
                    message,
                };
                if inbox.send(input).is_err() {
                    return;
                }
            }
            let _ = inbox.send(Input::Channel {
                generation,
                primary,
                message: ChannelMessage::Status(ChannelStatus::Closed),
            });
        }));
    }

    async fn on_message(&mut self, primary: bool, message: ChannelMessage) {
        match message {
            ChannelMessage::Change(event) => self.friends.apply_change(&event).await,
            ChannelMessage::Status(status) if !primary => {
                tracing::debug!(status = ?status, "Secondary channel status");
            }
            ChannelMessage::Status(ChannelStatus::Subscribed) => {
                self.set_state(ConnectionState {
                    status: ConnectionStatus::Connected,
                    attempts: 0,
                    last_error: None,
                });
                tracing::info!("Realtime connected");
                if std::mem::take(&mut self.resync) {
                    tracing::info!("Reloading friend lists after reconnect");
                    self.friends.refresh_all().await;
                }
            }
            ChannelMessage::Status(ChannelStatus::ChannelError(msg)) => {
                if self.is_live() {
                    self.fail(format!("Channel error: {}", msg));
                }
            }
            ChannelMessage::Status(ChannelStatus::Closed) => {
                if self.is_live() {
                    self.fail(CHANNEL_CLOSED.to_string());
                }
            }
        }
    }

    fn is_live(&self) -> bool {
        matches!(
            self.status(),
            ConnectionStatus::Connecting | ConnectionStatus::Connected
        )
    }

    /// Enter Error and schedule the next attempt.
    fn fail(&mut self, error: String) {
        tracing::warn!(error = %error, "Realtime connection failed");
        let attempts = self.attempts();
        self.teardown();
        self.resync = true;
        self.set_state(ConnectionState {
            status: ConnectionStatus::Error,
            attempts,
            last_error: Some(error),
        });

        let Some(inbox) = self.inbox.upgrade() else {
            return;
        };
        let delay = self.pending_delay;
        tracing::info!(delay_ms = delay.as_millis() as u64, "Scheduling realtime retry");
        self.scheduler.schedule(delay, async move {
            let _ = inbox.send(Input::RetryDue);
        });
    }

    /// Close channels, stop forwarders and cancel pending retries.
    fn teardown(&mut self) {
        self.generation += 1;
        for id in self.channels.drain(..) {
            self.provider.unsubscribe(id);
        }
        for forwarder in self.forwarders.drain(..) {
            forwarder.abort();
        }
        self.scheduler.cancel_all();
    }
}
