// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Realtime connection state and change-event payloads.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Status of the realtime subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Observable realtime connection state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    /// Connection attempts since the last successful subscription
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Row-level change type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A row change pushed by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub table: String,
    #[serde(default)]
    pub old: Option<serde_json::Value>,
    #[serde(default)]
    pub new: Option<serde_json::Value>,
}

impl ChangeEvent {
    pub fn insert(table: &str, new: serde_json::Value) -> Self {
        Self {
            kind: ChangeKind::Insert,
            table: table.to_string(),
            old: None,
            new: Some(new),
        }
    }

    pub fn update(table: &str, old: Option<serde_json::Value>, new: serde_json::Value) -> Self {
        Self {
            kind: ChangeKind::Update,
            table: table.to_string(),
            old,
            new: Some(new),
        }
    }

    pub fn delete(table: &str, old: serde_json::Value) -> Self {
        Self {
            kind: ChangeKind::Delete,
            table: table.to_string(),
            old: Some(old),
            new: None,
        }
    }

    /// Decode the new record, if present and well-formed.
    pub fn new_record<T: DeserializeOwned>(&self) -> Option<T> {
        self.new
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Decode the old record, if present and well-formed.
    pub fn old_record<T: DeserializeOwned>(&self) -> Option<T> {
        self.old
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// The record a filter should be evaluated against.
    fn filter_record(&self) -> Option<&serde_json::Value> {
        match self.kind {
            ChangeKind::Delete => self.old.as_ref(),
            _ => self.new.as_ref(),
        }
    }
}

/// Row change as the backend sends it, from database webhooks and from
/// `postgres_changes` messages on the realtime socket.
#[derive(Debug, Clone, Deserialize)]
pub struct RowChange {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub table: String,
    #[serde(default)]
    pub record: Option<serde_json::Value>,
    #[serde(default)]
    pub old_record: Option<serde_json::Value>,
}

impl From<RowChange> for ChangeEvent {
    fn from(change: RowChange) -> Self {
        ChangeEvent {
            kind: change.kind,
            table: change.table,
            old: change.old_record,
            new: change.record,
        }
    }
}

/// Equality filter on one column, e.g. `friend_id=eq.<id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnFilter {
    pub column: String,
    pub value: String,
}

impl ColumnFilter {
    pub fn eq(column: &str, value: &str) -> Self {
        Self {
            column: column.to_string(),
            value: value.to_string(),
        }
    }
}

/// What a channel listens to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    pub name: String,
    pub table: String,
    pub filter: ColumnFilter,
    pub kinds: Vec<ChangeKind>,
}

impl ChannelSpec {
    /// Whether an event should be delivered on this channel.
    ///
    /// Delete events whose old record lacks the filter column (primary-key
    /// only payloads) are delivered: the receiver matches them by id.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.table != self.table || !self.kinds.contains(&event.kind) {
            return false;
        }
        match event
            .filter_record()
            .and_then(|r| r.get(&self.filter.column))
        {
            Some(serde_json::Value::String(v)) => *v == self.filter.value,
            Some(other) => other.to_string() == self.filter.value,
            None => event.kind == ChangeKind::Delete,
        }
    }
}

/// Subscription lifecycle signal from the channel provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    Subscribed,
    ChannelError(String),
    Closed,
}

/// Everything a channel can deliver.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    Status(ChannelStatus),
    Change(ChangeEvent),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(kinds: Vec<ChangeKind>) -> ChannelSpec {
        ChannelSpec {
            name: "friend-requests".into(),
            table: "friendships".into(),
            filter: ColumnFilter::eq("friend_id", "me"),
            kinds,
        }
    }

    #[test]
    fn test_matches_filter_column() {
        let spec = spec(vec![ChangeKind::Insert]);
        let mine = ChangeEvent::insert("friendships", json!({"id": "1", "friend_id": "me"}));
        let theirs = ChangeEvent::insert("friendships", json!({"id": "2", "friend_id": "you"}));
        assert!(spec.matches(&mine));
        assert!(!spec.matches(&theirs));
    }

    #[test]
    fn test_rejects_other_tables_and_kinds() {
        let spec = spec(vec![ChangeKind::Insert]);
        let other_table = ChangeEvent::insert("routes", json!({"friend_id": "me"}));
        let update = ChangeEvent::update("friendships", None, json!({"friend_id": "me"}));
        assert!(!spec.matches(&other_table));
        assert!(!spec.matches(&update));
    }

    #[test]
    fn test_delete_with_key_only_payload_matches() {
        let spec = spec(vec![ChangeKind::Delete]);
        let event = ChangeEvent::delete("friendships", json!({"id": "9"}));
        assert!(spec.matches(&event));
    }

    #[test]
    fn test_numeric_filter_value() {
        let mut spec = spec(vec![ChangeKind::Update]);
        spec.filter = ColumnFilter::eq("user_id", "42");
        let event = ChangeEvent::update("friendships", None, json!({"user_id": 42}));
        assert!(spec.matches(&event));
    }
}
