//! Action service - eco action logging
//!
//! Every write runs as one IMMEDIATE transaction covering the action row and
//! its leaderboard delta.

use std::sync::Arc;

use crate::db::actions::{self, ActionQuery, CreateActionInput, UpdateActionInput};
use crate::db::models::EcoAction;
use crate::db::LedgerDb;
use crate::error::StorageError;

use super::events::{EventBus, LedgerEvent};

/// Action service for business logic
pub struct ActionService {
    db: Arc<LedgerDb>,
    events: Arc<EventBus>,
}

impl ActionService {
    /// Create a new action service
    pub fn new(db: Arc<LedgerDb>, events: Arc<EventBus>) -> Self {
        Self { db, events }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    /// Get action by ID
    pub fn get(&self, id: i32) -> Result<Option<EcoAction>, StorageError> {
        self.db.with_conn(|conn| actions::get_action(conn, id))
    }

    /// List actions with filters, newest first
    pub fn list(&self, query: &ActionQuery) -> Result<Vec<EcoAction>, StorageError> {
        self.db.with_conn(|conn| actions::list_actions(conn, query))
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Log an action and credit its challenge
    pub fn create(&self, input: CreateActionInput) -> Result<EcoAction, StorageError> {
        let action = self.db.transaction(|conn| actions::create_action(conn, input))?;

        self.events.emit(LedgerEvent::ActionLogged {
            id: action.id,
            user_id: action.user_id,
            challenge_id: action.challenge_id,
            points: action.points,
        });

        Ok(action)
    }

    /// Apply a partial update, moving points between challenges as needed
    pub fn update(&self, id: i32, input: UpdateActionInput) -> Result<EcoAction, StorageError> {
        let action = self.db.transaction(|conn| actions::update_action(conn, id, input))?;

        self.events.emit(LedgerEvent::ActionUpdated {
            id: action.id,
            user_id: action.user_id,
            challenge_id: action.challenge_id,
            points: action.points,
        });

        Ok(action)
    }

    /// Delete an action and debit its points
    pub fn delete(&self, id: i32) -> Result<bool, StorageError> {
        let deleted = self.db.transaction(|conn| actions::delete_action(conn, id))?;

        match deleted {
            Some(action) => {
                self.events.emit(LedgerEvent::ActionDeleted { id, user_id: action.user_id });
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
