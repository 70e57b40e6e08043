// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! User-facing notifications.
//!
//! Notifications are logged, broadcast to live listeners and kept in a small
//! backlog that the UI drains by polling `GET /api/notifications`.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

const BACKLOG_CAPACITY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum NotificationLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub message: String,
}

/// Shared notification sink.
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
    backlog: Arc<Mutex<VecDeque<Notification>>>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BACKLOG_CAPACITY);
        Self {
            tx,
            backlog: Arc::new(Mutex::new(VecDeque::with_capacity(BACKLOG_CAPACITY))),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn info(&self, title: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(title, message = %message, "Notification");
        self.publish(NotificationLevel::Info, title, message);
    }

    pub fn error(&self, title: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(title, message = %message, "Error notification");
        self.publish(NotificationLevel::Error, title, message);
    }

    /// Take all queued notifications, oldest first.
    pub fn drain(&self) -> Vec<Notification> {
        self.backlog
            .lock()
            .map(|mut q| q.drain(..).collect())
            .unwrap_or_default()
    }

    fn publish(&self, level: NotificationLevel, title: &str, message: String) {
        let notification = Notification {
            level,
            title: title.to_string(),
            message,
        };
        if let Ok(mut q) = self.backlog.lock() {
            if q.len() == BACKLOG_CAPACITY {
                q.pop_front();
            }
            q.push_back(notification.clone());
        }
        let _ = self.tx.send(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_returns_in_order_and_empties() {
        let notifier = Notifier::new();
        notifier.info("Tracking started", "Recording your ride");
        notifier.error("GPS error", "Position unavailable");

        let drained = notifier.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].level, NotificationLevel::Info);
        assert_eq!(drained[1].title, "GPS error");
        assert!(notifier.drain().is_empty());
    }

    #[test]
    fn test_backlog_is_bounded() {
        let notifier = Notifier::new();
        for i in 0..(BACKLOG_CAPACITY + 5) {
            notifier.info("n", format!("{}", i));
        }
        let drained = notifier.drain();
        assert_eq!(drained.len(), BACKLOG_CAPACITY);
        assert_eq!(drained[0].message, "5");
    }

    #[tokio::test]
    async fn test_subscribers_receive_live() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe();
        notifier.info("New friend request", "rider42 wants to be your friend!");
        assert_eq!(rx.recv().await.unwrap().title, "New friend request");
    }
}
