// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Change feed over the hosted backend's realtime websocket.
//!
//! Each channel opens its own socket and joins one topic using the Phoenix
//! channel protocol: `phx_join` carrying a `postgres_changes` config, a
//! heartbeat on the `phoenix` topic, and `phx_leave` on unsubscribe.

use crate::db::broker::{Channel, ChannelId, ChannelProvider, RealtimeError};
use crate::models::{ChangeEvent, ChannelMessage, ChannelSpec, ChannelStatus, RowChange};
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Realtime protocol version sent as `vsn`.
pub const PROTOCOL_VERSION: &str = "1.0.0";

pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(25);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Ref of the join message; its reply carries the same ref.
const JOIN_REF: &str = "1";

/// One Phoenix channel frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PhoenixMessage {
    topic: String,
    event: String,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(rename = "ref", default)]
    msg_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    join_ref: Option<String>,
}

impl PhoenixMessage {
    fn new(topic: &str, event: &str, payload: serde_json::Value, msg_ref: u64) -> Self {
        Self {
            topic: topic.to_string(),
            event: event.to_string(),
            payload,
            msg_ref: Some(msg_ref.to_string()),
            join_ref: None,
        }
    }

    fn frame(&self) -> Message {
        // Serializing a struct of strings and JSON values cannot fail.
        Message::Text(serde_json::to_string(self).unwrap_or_default().into())
    }
}

struct SocketInner {
    endpoint: String,
    anon_key: String,
    access_token: RwLock<Option<String>>,
    channels: DashMap<ChannelId, CancellationToken>,
    next_id: AtomicU64,
    heartbeat: Duration,
}

/// Channel provider speaking the backend's realtime protocol.
#[derive(Clone)]
pub struct SocketProvider {
    inner: Arc<SocketInner>,
}

/// Websocket URL for a backend base URL (`https://` becomes `wss://`).
pub fn socket_endpoint(backend_url: &str, anon_key: &str) -> String {
    let base = backend_url.trim_end_matches('/');
    let base = if let Some(host) = base.strip_prefix("https://") {
        format!("wss://{}", host)
    } else if let Some(host) = base.strip_prefix("http://") {
        format!("ws://{}", host)
    } else {
        base.to_string()
    };
    format!(
        "{}/realtime/v1/websocket?apikey={}&vsn={}",
        base,
        urlencoding::encode(anon_key),
        PROTOCOL_VERSION
    )
}

fn topic(spec: &ChannelSpec) -> String {
    format!("realtime:{}", spec.name)
}

/// `phx_join` for a channel spec: one `postgres_changes` entry per kind.
fn join_message(spec: &ChannelSpec, access_token: &str) -> PhoenixMessage {
    let changes: Vec<serde_json::Value> = spec
        .kinds
        .iter()
        .map(|kind| {
            json!({
                "event": kind,
                "schema": "public",
                "table": spec.table,
                "filter": format!("{}=eq.{}", spec.filter.column, spec.filter.value),
            })
        })
        .collect();
    PhoenixMessage {
        topic: topic(spec),
        event: "phx_join".to_string(),
        payload: json!({
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": changes,
            },
            "access_token": access_token,
        }),
        msg_ref: Some(JOIN_REF.to_string()),
        join_ref: Some(JOIN_REF.to_string()),
    }
}

/// Map a server frame on `topic` to a channel message. Frames for other
/// topics, heartbeat replies and unknown events map to nothing.
fn decode(text: &str, topic: &str) -> Option<ChannelMessage> {
    let msg: PhoenixMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring unparseable realtime frame");
            return None;
        }
    };
    if msg.topic != topic {
        return None;
    }

    match msg.event.as_str() {
        "phx_reply" if msg.msg_ref.as_deref() == Some(JOIN_REF) => {
            let status = msg.payload["status"].as_str().unwrap_or_default();
            if status == "ok" {
                return Some(ChannelMessage::Status(ChannelStatus::Subscribed));
            }
            let reason = msg.payload["response"]["reason"]
                .as_str()
                .or_else(|| msg.payload["response"]["message"].as_str())
                .unwrap_or("join refused");
            Some(ChannelMessage::Status(ChannelStatus::ChannelError(
                reason.to_string(),
            )))
        }
        "postgres_changes" => {
            match serde_json::from_value::<RowChange>(msg.payload["data"].clone()) {
                Ok(change) => Some(ChannelMessage::Change(ChangeEvent::from(change))),
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring malformed postgres_changes payload");
                    None
                }
            }
        }
        "system" if msg.payload["status"] == "error" => {
            let message = msg.payload["message"].as_str().unwrap_or("system error");
            Some(ChannelMessage::Status(ChannelStatus::ChannelError(
                message.to_string(),
            )))
        }
        "phx_error" => Some(ChannelMessage::Status(ChannelStatus::ChannelError(
            "channel crashed".to_string(),
        ))),
        "phx_close" => Some(ChannelMessage::Status(ChannelStatus::Closed)),
        _ => None,
    }
}

impl SocketProvider {
    pub fn new(backend_url: &str, anon_key: &str) -> Self {
        Self::with_heartbeat(backend_url, anon_key, DEFAULT_HEARTBEAT)
    }

    pub fn with_heartbeat(backend_url: &str, anon_key: &str, heartbeat: Duration) -> Self {
        Self {
            inner: Arc::new(SocketInner {
                endpoint: socket_endpoint(backend_url, anon_key),
                anon_key: anon_key.to_string(),
                access_token: RwLock::new(None),
                channels: DashMap::new(),
                next_id: AtomicU64::new(1),
                heartbeat,
            }),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    pub fn active_channels(&self) -> usize {
        self.inner.channels.len()
    }

    /// Rider's token, or the anon key before login.
    fn join_token(&self) -> String {
        self.inner
            .access_token
            .read()
            .ok()
            .and_then(|t| t.clone())
            .unwrap_or_else(|| self.inner.anon_key.clone())
    }
}

#[async_trait]
impl ChannelProvider for SocketProvider {
    fn set_access_token(&self, token: Option<String>) {
        if let Ok(mut t) = self.inner.access_token.write() {
            *t = token;
        }
    }

    async fn subscribe(&self, spec: ChannelSpec) -> Result<Channel, RealtimeError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (ws, _) = tokio::time::timeout(
            CONNECT_TIMEOUT,
            tokio_tungstenite::connect_async(self.inner.endpoint.as_str()),
        )
        .await
        .map_err(|_| RealtimeError::Connect("timed out".to_string()))?
        .map_err(|e| RealtimeError::Connect(e.to_string()))?;

        let (mut sink, stream) = ws.split();
        sink.send(join_message(&spec, &self.join_token()).frame())
            .await
            .map_err(|e| RealtimeError::Connect(e.to_string()))?;

        let (tx, messages) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        self.inner.channels.insert(id, token.clone());
        tracing::debug!(channel = %spec.name, channel_id = id, "Joining realtime channel");

        let task = ChannelTask {
            id,
            topic: topic(&spec),
            sink,
            stream,
            tx,
            token,
            inner: self.inner.clone(),
        };
        tokio::spawn(task.run());
        Ok(Channel { id, messages })
    }

    fn unsubscribe(&self, id: ChannelId) {
        if let Some((_, token)) = self.inner.channels.remove(&id) {
            token.cancel();
            tracing::debug!(channel_id = id, "Leaving realtime channel");
        }
    }
}

/// Reads one socket until it closes or the channel is left.
struct ChannelTask {
    id: ChannelId,
    topic: String,
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
    tx: mpsc::UnboundedSender<ChannelMessage>,
    token: CancellationToken,
    inner: Arc<SocketInner>,
}

impl ChannelTask {
    async fn run(mut self) {
        let period = self.inner.heartbeat;
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        let mut next_ref: u64 = 2;

        loop {
            tokio::select! {
                _ = self.token.cancelled() => {
                    let leave = PhoenixMessage::new(&self.topic, "phx_leave", json!({}), next_ref);
                    let _ = self.sink.send(leave.frame()).await;
                    let _ = self.sink.close().await;
                    break;
                }
                _ = heartbeat.tick() => {
                    let beat = PhoenixMessage::new("phoenix", "heartbeat", json!({}), next_ref);
                    next_ref += 1;
                    if let Err(e) = self.sink.send(beat.frame()).await {
                        tracing::warn!(error = %e, channel_id = self.id, "Realtime heartbeat failed");
                        let _ = self.tx.send(ChannelMessage::Status(ChannelStatus::Closed));
                        break;
                    }
                }
                incoming = self.stream.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let Some(message) = decode(&text, &self.topic) else {
                            continue;
                        };
                        let terminal = matches!(
                            message,
                            ChannelMessage::Status(
                                ChannelStatus::ChannelError(_) | ChannelStatus::Closed
                            )
                        );
                        if self.tx.send(message).is_err() || terminal {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!(channel_id = self.id, "Realtime socket closed");
                        let _ = self.tx.send(ChannelMessage::Status(ChannelStatus::Closed));
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, channel_id = self.id, "Realtime socket error");
                        let _ = self.tx.send(ChannelMessage::Status(ChannelStatus::ChannelError(
                            e.to_string(),
                        )));
                        break;
                    }
                }
            }
        }
        self.inner.channels.remove(&self.id);
    }
}
