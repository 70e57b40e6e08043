// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Garage service: the rider's motorcycle, document expirations and
//! maintenance log.
//!
//! Writes go to the store first; local lists are then patched in place and
//! kept in the store's order (expirations soonest first, maintenance most
//! recent first).

use crate::db::DataStore;
use crate::error::AppError;
use crate::models::{
    Expiration, ExpirationInput, ExpirationKind, ExpirationView, Maintenance, MaintenanceInput,
    Motorcycle, MotorcycleDetails,
};
use crate::services::notify::Notifier;
use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use validator::Validate;

#[derive(Debug, Default, Clone)]
struct GarageState {
    user_id: Option<String>,
    motorcycle: Option<Motorcycle>,
    expirations: Vec<Expiration>,
    maintenances: Vec<Maintenance>,
}

impl GarageState {
    fn sort(&mut self) {
        // Stable sorts: equal dates keep insertion order.
        self.expirations.sort_by_key(|e| e.expiration_date);
        self.maintenances.sort_by_key(|m| std::cmp::Reverse(m.date));
    }
}

/// Garage view returned by the API.
#[derive(Debug, Clone, Serialize)]
pub struct GarageSnapshot {
    pub motorcycle: Option<Motorcycle>,
    pub expirations: Vec<ExpirationView>,
    pub maintenances: Vec<Maintenance>,
}

/// Shared handle to the rider's garage.
#[derive(Clone)]
pub struct GarageService {
    db: Arc<dyn DataStore>,
    notifier: Notifier,
    state: Arc<RwLock<GarageState>>,
}

/// Trim free text, treating blank as absent.
fn clean(text: Option<String>) -> Option<String> {
    text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}

fn check(input: &impl Validate) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))
}

impl GarageService {
    pub fn new(db: Arc<dyn DataStore>, notifier: Notifier) -> Self {
        Self {
            db,
            notifier,
            state: Arc::new(RwLock::new(GarageState::default())),
        }
    }

    pub async fn set_user(&self, user_id: &str) {
        *self.state.write().await = GarageState {
            user_id: Some(user_id.to_string()),
            ..GarageState::default()
        };
    }

    pub async fn clear(&self) {
        *self.state.write().await = GarageState::default();
    }

    /// Current view, with expiration status computed as of `today`.
    pub async fn snapshot(&self, today: NaiveDate) -> GarageSnapshot {
        let state = self.state.read().await;
        GarageSnapshot {
            motorcycle: state.motorcycle.clone(),
            expirations: state
                .expirations
                .iter()
                .cloned()
                .map(|e| ExpirationView::new(e, today))
                .collect(),
            maintenances: state.maintenances.clone(),
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

    /// Reload the motorcycle, expirations and maintenance log together.
    pub async fn refresh(&self) -> Result<(), AppError> {
        let me = self.me().await?;
        let loaded = tokio::try_join!(
            self.db.get_motorcycle(&me),
            self.db.list_expirations(&me),
            self.db.list_maintenances(&me),
        );
        let (motorcycle, expirations, maintenances) = match loaded {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::warn!(error = %e, "Garage refresh failed, keeping previous data");
                self.notifier.error("Error", "Failed to load garage");
                return Err(e);
            }
        };

        let mut state = self.state.write().await;
        if state.user_id.as_deref() != Some(me.as_str()) {
            return Ok(());
        }
        state.motorcycle = motorcycle;
        state.expirations = expirations;
        state.maintenances = maintenances;
        state.sort();
        Ok(())
    }

    // ─── Motorcycle ──────────────────────────────────────────────

    /// Save the motorcycle's details, creating the record on first save.
    pub async fn update_motorcycle(
        &self,
        details: MotorcycleDetails,
    ) -> Result<Motorcycle, AppError> {
        let me = self.me().await?;
        let details = MotorcycleDetails {
            name: clean(details.name),
            photo_url: clean(details.photo_url),
        };
        check(&details)?;

        let cached = self.state.read().await.motorcycle.clone();
        let existing = match cached {
            Some(m) => Some(m),
            None => self.db.get_motorcycle(&me).await?,
        };
        let updated = match existing {
            Some(m) => self.db.update_motorcycle(&m.id, &me, &details).await?,
            None => None,
        };
        let saved = match updated {
            Some(m) => m,
            None => self.db.insert_motorcycle(&me, &details).await?,
        };

        self.state.write().await.motorcycle = Some(saved.clone());
        tracing::info!(motorcycle_id = %saved.id, "Motorcycle saved");
        self.notifier.info("Saved", "Motorcycle details updated");
        Ok(saved)
    }

    // ─── Expirations ─────────────────────────────────────────────

    pub async fn add_expiration(&self, input: ExpirationInput) -> Result<Expiration, AppError> {
        let me = self.me().await?;
        let input = ExpirationInput {
            notes: clean(input.notes),
            ..input
        };
        check(&input)?;

        let row = self.db.insert_expiration(&me, &input).await?;
        let mut state = self.state.write().await;
        state.expirations.push(row.clone());
        state.sort();
        tracing::debug!(expiration_id = %row.id, kind = ?row.kind, "Expiration added");
        Ok(row)
    }

    pub async fn update_expiration(
        &self,
        id: &str,
        input: ExpirationInput,
    ) -> Result<Expiration, AppError> {
        let me = self.me().await?;
        let input = ExpirationInput {
            notes: clean(input.notes),
            ..input
        };
        check(&input)?;

        let row = self
            .db
            .update_expiration(id, &me, &input)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Expiration {}", id)))?;
        let mut state = self.state.write().await;
        state.expirations.retain(|e| e.id != id);
        state.expirations.push(row.clone());
        state.sort();
        Ok(row)
    }

    pub async fn delete_expiration(&self, id: &str) -> Result<(), AppError> {
        let me = self.me().await?;
        if !self.db.delete_expiration(id, &me).await? {
            return Err(AppError::NotFound(format!("Expiration {}", id)));
        }
        self.state.write().await.expirations.retain(|e| e.id != id);
        Ok(())
    }

    // ─── Maintenance ─────────────────────────────────────────────

    /// Log maintenance. When it sets a next-service date, a service
    /// expiration for that date is added too.
    pub async fn add_maintenance(&self, input: MaintenanceInput) -> Result<Maintenance, AppError> {
        let me = self.me().await?;
        let input = MaintenanceInput {
            kind: input.kind.trim().to_string(),
            notes: clean(input.notes),
            ..input
        };
        check(&input)?;

        let row = self.db.insert_maintenance(&me, &input).await?;
        {
            let mut state = self.state.write().await;
            state.maintenances.insert(0, row.clone());
            state.sort();
        }
        tracing::debug!(maintenance_id = %row.id, "Maintenance logged");

        if let Some(due) = row.expiration_date {
            let reminder = ExpirationInput {
                kind: ExpirationKind::Service,
                expiration_date: due,
                notes: row.notes.clone(),
            };
            if let Err(e) = self.add_expiration(reminder).await {
                tracing::warn!(
                    error = %e,
                    maintenance_id = %row.id,
                    "Failed to add service reminder"
                );
                self.notifier.error(
                    "Error",
                    "Maintenance saved, but the next service reminder could not be added",
                );
            }
        }
        Ok(row)
    }

    pub async fn update_maintenance(
        &self,
        id: &str,
        input: MaintenanceInput,
    ) -> Result<Maintenance, AppError> {
        let me = self.me().await?;
        let input = MaintenanceInput {
            kind: input.kind.trim().to_string(),
            notes: clean(input.notes),
            ..input
        };
        check(&input)?;

        let row = self
            .db
            .update_maintenance(id, &me, &input)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Maintenance {}", id)))?;
        let mut state = self.state.write().await;
        state.maintenances.retain(|m| m.id != id);
        state.maintenances.insert(0, row.clone());
        state.sort();
        Ok(row)
    }

    pub async fn delete_maintenance(&self, id: &str) -> Result<(), AppError> {
        let me = self.me().await?;
        if !self.db.delete_maintenance(id, &me).await? {
            return Err(AppError::NotFound(format!("Maintenance {}", id)));
        }
        self.state.write().await.maintenances.retain(|m| m.id != id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::ExpirationStatus;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn maintenance(kind: &str, on: NaiveDate) -> MaintenanceInput {
        MaintenanceInput {
            kind: kind.into(),
            date: on,
            expiration_date: None,
            mileage: None,
            cost: None,
            notes: None,
        }
    }

    async fn setup() -> (GarageService, MemoryStore) {
        let store = MemoryStore::new();
        let service = GarageService::new(Arc::new(store.clone()), Notifier::new());
        service.set_user("me").await;
        (service, store)
    }

    #[tokio::test]
    async fn test_motorcycle_created_then_updated() {
        let (service, store) = setup().await;

        let first = service
            .update_motorcycle(MotorcycleDetails {
                name: Some("  Tenere 700 ".into()),
                photo_url: None,
            })
            .await
            .unwrap();
        assert_eq!(first.name.as_deref(), Some("Tenere 700"));

        let second = service
            .update_motorcycle(MotorcycleDetails {
                name: Some("   ".into()),
                photo_url: Some("https://cdn.example/bike.jpg".into()),
            })
            .await
            .unwrap();
        assert_eq!(second.id, first.id);
        assert!(second.name.is_none());

        let stored = store.get_motorcycle("me").await.unwrap().unwrap();
        assert_eq!(stored.photo_url.as_deref(), Some("https://cdn.example/bike.jpg"));
    }

    #[tokio::test]
    async fn test_existing_motorcycle_found_before_first_load() {
        let (service, store) = setup().await;
        store
            .insert_motorcycle("me", &MotorcycleDetails::default())
            .await
            .unwrap();

        let saved = service
            .update_motorcycle(MotorcycleDetails {
                name: Some("Africa Twin".into()),
                photo_url: None,
            })
            .await
            .unwrap();
        assert_eq!(saved.name.as_deref(), Some("Africa Twin"));
    }

    #[tokio::test]
    async fn test_expirations_sorted_with_status() {
        let (service, _store) = setup().await;
        let today = date(2026, 5, 10);
        for (kind, on) in [
            (ExpirationKind::Inspection, date(2026, 12, 1)),
            (ExpirationKind::Insurance, date(2026, 5, 20)),
            (ExpirationKind::Service, date(2026, 5, 1)),
        ] {
            service
                .add_expiration(ExpirationInput {
                    kind,
                    expiration_date: on,
                    notes: Some("  ".into()),
                })
                .await
                .unwrap();
        }

        let view = service.snapshot(today).await;
        let statuses: Vec<ExpirationStatus> = view.expirations.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![
                ExpirationStatus::Expired,
                ExpirationStatus::Warning,
                ExpirationStatus::Ok
            ]
        );
        assert_eq!(view.expirations[1].days_left, 10);
        assert!(view.expirations[0].expiration.notes.is_none());
    }

    #[tokio::test]
    async fn test_update_and_delete_expiration() {
        let (service, _store) = setup().await;
        let row = service
            .add_expiration(ExpirationInput {
                kind: ExpirationKind::Insurance,
                expiration_date: date(2026, 6, 1),
                notes: None,
            })
            .await
            .unwrap();

        let updated = service
            .update_expiration(
                &row.id,
                ExpirationInput {
                    kind: ExpirationKind::Insurance,
                    expiration_date: date(2027, 6, 1),
                    notes: Some("Renewed".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.expiration_date, date(2027, 6, 1));

        service.delete_expiration(&row.id).await.unwrap();
        assert!(service.snapshot(date(2026, 5, 1)).await.expirations.is_empty());
        assert!(matches!(
            service.delete_expiration(&row.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_maintenance_with_next_service_adds_reminder() {
        let (service, store) = setup().await;
        let input = MaintenanceInput {
            expiration_date: Some(date(2027, 4, 1)),
            mileage: Some(15_000),
            cost: Some(180.0),
            notes: Some("Oil and filters".into()),
            ..maintenance("Service", date(2026, 4, 1))
        };
        service.add_maintenance(input).await.unwrap();

        let reminders = store.list_expirations("me").await.unwrap();
        assert_eq!(reminders.len(), 1);
        assert_eq!(reminders[0].kind, ExpirationKind::Service);
        assert_eq!(reminders[0].expiration_date, date(2027, 4, 1));
        assert_eq!(reminders[0].notes.as_deref(), Some("Oil and filters"));
        assert_eq!(service.snapshot(date(2026, 5, 1)).await.expirations.len(), 1);
    }

    #[tokio::test]
    async fn test_maintenance_log_most_recent_first() {
        let (service, _store) = setup().await;
        service
            .add_maintenance(maintenance("Chain", date(2026, 3, 1)))
            .await
            .unwrap();
        service
            .add_maintenance(maintenance("Tyres", date(2026, 4, 1)))
            .await
            .unwrap();
        let older = service
            .add_maintenance(maintenance("Brake pads", date(2026, 1, 15)))
            .await
            .unwrap();

        let kinds: Vec<String> = service
            .snapshot(date(2026, 5, 1))
            .await
            .maintenances
            .into_iter()
            .map(|m| m.kind)
            .collect();
        assert_eq!(kinds, vec!["Tyres", "Chain", "Brake pads"]);

        service
            .update_maintenance(&older.id, maintenance("Brake pads", date(2026, 5, 1)))
            .await
            .unwrap();
        let first = service.snapshot(date(2026, 5, 1)).await.maintenances[0].clone();
        assert_eq!(first.id, older.id);

        assert!(matches!(
            service.add_maintenance(maintenance("   ", date(2026, 5, 1))).await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_reads_store() {
        let (service, store) = setup().await;
        store
            .insert_maintenance("me", &maintenance("Chain", date(2026, 3, 1)))
            .await
            .unwrap();
        store
            .insert_maintenance("someone", &maintenance("Tyres", date(2026, 3, 1)))
            .await
            .unwrap();

        service.refresh().await.unwrap();
        let view = service.snapshot(date(2026, 5, 1)).await;
        assert_eq!(view.maintenances.len(), 1);
        assert!(view.motorcycle.is_none());

        store.set_failing(true);
        assert!(service.refresh().await.is_err());
        assert_eq!(service.snapshot(date(2026, 5, 1)).await.maintenances.len(), 1);
    }
}
