// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! The rider's motorcycle, its document expirations and maintenance log.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;
use validator::Validate;

/// Days ahead of an expiration at which it starts to warn.
pub const EXPIRATION_WARNING_DAYS: i64 = 30;

/// The rider's motorcycle. At most one per rider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct Motorcycle {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Editable motorcycle fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct MotorcycleDetails {
    #[validate(length(max = 80, message = "Name must be at most 80 characters"))]
    pub name: Option<String>,
    pub photo_url: Option<String>,
}

/// Which document expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum ExpirationKind {
    #[serde(rename = "insurance")]
    Insurance,
    /// Scheduled service.
    #[serde(rename = "tagliando")]
    Service,
    /// Periodic roadworthiness inspection.
    #[serde(rename = "revisione")]
    Inspection,
}

/// Stored `expirations` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct Expiration {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: ExpirationKind,
    pub expiration_date: NaiveDate,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Insert or update payload for an expiration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ExpirationInput {
    #[serde(rename = "type")]
    pub kind: ExpirationKind,
    pub expiration_date: NaiveDate,
    #[serde(default)]
    #[validate(length(max = 1000, message = "Notes must be at most 1000 characters"))]
    pub notes: Option<String>,
}

/// How close an expiration is, relative to a given day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum ExpirationStatus {
    Expired,
    Today,
    Warning,
    Ok,
}

impl Expiration {
    /// Whole days from `today` until the expiration; negative once past.
    pub fn days_left(&self, today: NaiveDate) -> i64 {
        (self.expiration_date - today).num_days()
    }

    pub fn status(&self, today: NaiveDate) -> ExpirationStatus {
        match self.days_left(today) {
            d if d < 0 => ExpirationStatus::Expired,
            0 => ExpirationStatus::Today,
            d if d <= EXPIRATION_WARNING_DAYS => ExpirationStatus::Warning,
            _ => ExpirationStatus::Ok,
        }
    }
}

/// An expiration with its status as of the day it was listed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ExpirationView {
    #[serde(flatten)]
    pub expiration: Expiration,
    pub status: ExpirationStatus,
    pub days_left: i64,
}

impl ExpirationView {
    pub fn new(expiration: Expiration, today: NaiveDate) -> Self {
        Self {
            status: expiration.status(today),
            days_left: expiration.days_left(today),
            expiration,
        }
    }
}

/// Stored `maintenances` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct Maintenance {
    pub id: String,
    pub user_id: String,
    /// Free-form description of the work, e.g. "Oil change".
    #[serde(rename = "type")]
    pub kind: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub expiration_date: Option<NaiveDate>,
    #[serde(default)]
    pub mileage: Option<u32>,
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Insert or update payload for a maintenance record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct MaintenanceInput {
    #[serde(rename = "type")]
    #[validate(length(min = 1, max = 80, message = "Type must be 1 to 80 characters"))]
    pub kind: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub expiration_date: Option<NaiveDate>,
    #[serde(default)]
    pub mileage: Option<u32>,
    #[serde(default)]
    #[validate(range(min = 0.0, message = "Cost cannot be negative"))]
    pub cost: Option<f64>,
    #[serde(default)]
    #[validate(length(max = 1000, message = "Notes must be at most 1000 characters"))]
    pub notes: Option<String>,
}
