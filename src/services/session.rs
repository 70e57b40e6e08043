// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Tracking session state machine.
//!
//! ```text
//! Idle --start--> Active --pause--> Paused --resume--> Active
//!                   |                  |
//!                   +------stop--------+--stop--> Stopped --save/discard--> Idle
//! ```
//!
//! The machine is pure: callers pass the current instant into every
//! transition, so elapsed-time accounting is deterministic under test.

use crate::models::{Position, TrackPoint};
use crate::services::distance::Accumulator;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Lifecycle state of a tracking session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum TrackingState {
    #[default]
    Idle,
    Active,
    Paused,
    Stopped,
}

impl fmt::Display for TrackingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrackingState::Idle => "idle",
            TrackingState::Active => "active",
            TrackingState::Paused => "paused",
            TrackingState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Actions that drive the state machine (used in error reporting).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingAction {
    Start,
    Pause,
    Resume,
    Stop,
    Annotate,
    Save,
    Discard,
}

impl fmt::Display for TrackingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrackingAction::Start => "start",
            TrackingAction::Pause => "pause",
            TrackingAction::Resume => "resume",
            TrackingAction::Stop => "stop",
            TrackingAction::Annotate => "annotate",
            TrackingAction::Save => "save",
            TrackingAction::Discard => "discard",
        };
        f.write_str(s)
    }
}

/// Rejected tracking actions. The session is unchanged when one is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackingError {
    #[error("Cannot {action} a session that is {state}")]
    InvalidTransition {
        state: TrackingState,
        action: TrackingAction,
    },

    #[error("Session has no recorded point to annotate")]
    NoPoints,

    #[error("Last point already has a {0}")]
    AlreadyAnnotated(&'static str),
}

/// One ride from start to stop, pauses included.
#[derive(Debug, Clone, Default)]
pub struct TrackingSession {
    state: TrackingState,
    points: Vec<TrackPoint>,
    started_at: Option<DateTime<Utc>>,
    paused_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
    paused_seconds: f64,
    totals: Accumulator,
}

impl TrackingSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> TrackingState {
        self.state
    }

    pub fn points(&self) -> &[TrackPoint] {
        &self.points
    }

    pub fn last_point(&self) -> Option<&TrackPoint> {
        self.points.last()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn paused_seconds(&self) -> f64 {
        self.paused_seconds
    }

    pub fn distance_km(&self) -> f64 {
        self.totals.distance_km()
    }

    pub fn current_speed_kmh(&self) -> f64 {
        self.totals.current_speed_kmh()
    }

    pub fn max_speed_kmh(&self) -> f64 {
        self.totals.max_speed_kmh()
    }

    fn require(&self, state: TrackingState, action: TrackingAction) -> Result<(), TrackingError> {
        if self.state == state {
            Ok(())
        } else {
            Err(TrackingError::InvalidTransition {
                state: self.state,
                action,
            })
        }
    }

    /// Idle → Active, seeding the track with the initial fix.
    pub fn start(&mut self, first: TrackPoint, now: DateTime<Utc>) -> Result<(), TrackingError> {
        self.require(TrackingState::Idle, TrackingAction::Start)?;

        *self = Self {
            state: TrackingState::Active,
            started_at: Some(now),
            ..Self::default()
        };
        self.totals.push(&first);
        self.points.push(first);
        Ok(())
    }

    /// Append a sampled point. Points arriving outside `Active` are dropped.
    ///
    /// Returns whether the point was accepted.
    pub fn record(&mut self, point: TrackPoint) -> bool {
        if self.state != TrackingState::Active {
            return false;
        }
        self.totals.push(&point);
        self.points.push(point);
        true
    }

    /// Active → Paused.
    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<(), TrackingError> {
        self.require(TrackingState::Active, TrackingAction::Pause)?;
        self.paused_at = Some(now);
        self.state = TrackingState::Paused;
        Ok(())
    }

    /// Paused → Active, adding the pause length to the paused total.
    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<(), TrackingError> {
        self.require(TrackingState::Paused, TrackingAction::Resume)?;
        if let Some(paused_at) = self.paused_at.take() {
            self.paused_seconds += seconds_between(paused_at, now);
        }
        self.state = TrackingState::Active;
        Ok(())
    }

    /// Active or Paused → Stopped. Stopping while paused freezes the clock
    /// at the pause instant.
    pub fn stop(&mut self, now: DateTime<Utc>) -> Result<(), TrackingError> {
        match self.state {
            TrackingState::Active => self.stopped_at = Some(now),
            TrackingState::Paused => self.stopped_at = Some(self.paused_at.take().unwrap_or(now)),
            state => {
                return Err(TrackingError::InvalidTransition {
                    state,
                    action: TrackingAction::Stop,
                })
            }
        }
        self.state = TrackingState::Stopped;
        Ok(())
    }

    /// Check that a waypoint annotation would be accepted without applying it.
    pub fn check_annotation(&self, photo: bool, note: bool) -> Result<(), TrackingError> {
        self.require(TrackingState::Paused, TrackingAction::Annotate)?;
        let last = self.points.last().ok_or(TrackingError::NoPoints)?;
        if photo && last.photo_url.is_some() {
            return Err(TrackingError::AlreadyAnnotated("photo"));
        }
        if note && last.note.is_some() {
            return Err(TrackingError::AlreadyAnnotated("note"));
        }
        Ok(())
    }

    /// Attach a photo reference and/or note to the most recent point.
    ///
    /// Only allowed while paused; each field can be set once.
    pub fn annotate(
        &mut self,
        photo_url: Option<String>,
        note: Option<String>,
    ) -> Result<&TrackPoint, TrackingError> {
        self.check_annotation(photo_url.is_some(), note.is_some())?;
        let last = self.points.last_mut().ok_or(TrackingError::NoPoints)?;
        if photo_url.is_some() {
            last.photo_url = photo_url;
        }
        if note.is_some() {
            last.note = note;
        }
        Ok(last)
    }

    /// Borrow the finished session for export.
    pub fn finished(&self) -> Result<&Self, TrackingError> {
        self.require(TrackingState::Stopped, TrackingAction::Save)?;
        Ok(self)
    }

    /// Stopped → Idle without persisting anything.
    pub fn discard(&mut self) -> Result<(), TrackingError> {
        self.require(TrackingState::Stopped, TrackingAction::Discard)?;
        self.reset();
        Ok(())
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Riding time in seconds, excluding pauses.
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> f64 {
        let Some(started_at) = self.started_at else {
            return 0.0;
        };
        let end = match self.state {
            TrackingState::Idle => return 0.0,
            TrackingState::Active => now,
            TrackingState::Paused => self.paused_at.unwrap_or(now),
            TrackingState::Stopped => self.stopped_at.unwrap_or(now),
        };
        (seconds_between(started_at, end) - self.paused_seconds).max(0.0)
    }

    /// Average speed over riding time, or 0 before any time has elapsed.
    pub fn average_speed_kmh(&self, now: DateTime<Utc>) -> f64 {
        let elapsed = self.elapsed_seconds(now);
        if elapsed > 0.0 {
            self.distance_km() / (elapsed / 3600.0)
        } else {
            0.0
        }
    }

    /// Point-in-time summary for display.
    pub fn snapshot(&self, now: DateTime<Utc>) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            started_at: self.started_at,
            point_count: self.points.len(),
            last_point: self.points.last().cloned(),
            distance_km: self.distance_km(),
            current_speed_kmh: self.current_speed_kmh(),
            max_speed_kmh: self.max_speed_kmh(),
            paused_seconds: self.paused_seconds,
            elapsed_seconds: self.elapsed_seconds(now),
            average_speed_kmh: self.average_speed_kmh(now),
        }
    }
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    ((to - from).num_milliseconds() as f64 / 1000.0).max(0.0)
}

/// Session summary returned by the tracking API.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct SessionSnapshot {
    pub state: TrackingState,
    pub started_at: Option<DateTime<Utc>>,
    pub point_count: usize,
    pub last_point: Option<TrackPoint>,
    pub distance_km: f64,
    pub current_speed_kmh: f64,
    pub max_speed_kmh: f64,
    pub paused_seconds: f64,
    pub elapsed_seconds: f64,
    pub average_speed_kmh: f64,
}

/// Live map position carried alongside the session snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct TrackingSnapshot {
    #[serde(flatten)]
    pub session: SessionSnapshot,
    pub current_position: Option<Position>,
    pub last_error: Option<String>,
}
