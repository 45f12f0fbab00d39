//! Eco action CRUD operations using Diesel
//!
//! Every write runs in a transaction together with the matching ledger call,
//! so an action and its leaderboard effect commit or roll back as one unit.
//! When called inside an outer transaction these become savepoints.

use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde::{Deserialize, Deserializer};

use super::challenges;
use super::models::{action_types, current_date, current_timestamp, EcoAction, EcoActionChanges, NewEcoAction};
use super::schema::eco_actions;
use crate::error::StorageError;
use crate::ledger;

const MAX_DESCRIPTION_LEN: usize = 255;

// ============================================================================
// Query Types
// ============================================================================

/// Input for logging an action
#[derive(Debug, Clone, Deserialize)]
pub struct CreateActionInput {
    pub user_id: i32,
    pub action_type: String,
    pub description: String,
    #[serde(default)]
    pub points: i32,
    #[serde(default)]
    pub challenge_id: Option<i32>,
}

/// Partial update of an action
///
/// An explicit `"challenge_id": null` detaches the action from its challenge;
/// omitting the field leaves it unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateActionInput {
    #[serde(default)]
    pub action_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub points: Option<i32>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub challenge_id: Option<Option<i32>>,
}

fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Query parameters for listing actions
#[derive(Debug, Clone, Deserialize)]
pub struct ActionQuery {
    #[serde(default)]
    pub user_id: Option<i32>,
    #[serde(default)]
    pub challenge_id: Option<i32>,
    #[serde(default)]
    pub action_type: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    100
}

impl Default for ActionQuery {
    fn default() -> Self {
        Self {
            user_id: None,
            challenge_id: None,
            action_type: None,
            limit: default_limit(),
            offset: 0,
        }
    }
}

// ============================================================================
// Validation
// ============================================================================

fn validate_action_type(action_type: &str) -> Result<(), StorageError> {
    if !action_types::is_valid(action_type) {
        return Err(StorageError::InvalidInput(format!(
            "Invalid action type: {}. Valid types: {:?}",
            action_type,
            action_types::ALL
        )));
    }
    Ok(())
}

fn validate_description(description: &str) -> Result<(), StorageError> {
    if description.trim().is_empty() {
        return Err(StorageError::InvalidInput("Description is required".into()));
    }
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(StorageError::InvalidInput(format!(
            "Description exceeds {} characters",
            MAX_DESCRIPTION_LEN
        )));
    }
    Ok(())
}

fn validate_challenge(conn: &mut SqliteConnection, challenge_id: Option<i32>) -> Result<(), StorageError> {
    if let Some(id) = challenge_id {
        if challenges::get_challenge(conn, id)?.is_none() {
            return Err(StorageError::InvalidInput(format!("Challenge {} does not exist", id)));
        }
    }
    Ok(())
}

/// Map a write failure, surfacing the one-action-per-day rule as a conflict
fn write_error(e: DieselError, op: &str) -> StorageError {
    match e {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => StorageError::Conflict(
            "An action of this type was already logged by this user today".into(),
        ),
        other => StorageError::Internal(format!("{} failed: {}", op, other)),
    }
}

// ============================================================================
// Read Operations
// ============================================================================

/// Get action by ID
pub fn get_action(conn: &mut SqliteConnection, id: i32) -> Result<Option<EcoAction>, StorageError> {
    eco_actions::table
        .find(id)
        .select(EcoAction::as_select())
        .first(conn)
        .optional()
        .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))
}

/// List actions with filtering, most recent first
pub fn list_actions(conn: &mut SqliteConnection, query: &ActionQuery) -> Result<Vec<EcoAction>, StorageError> {
    let mut base_query = eco_actions::table.select(EcoAction::as_select()).into_boxed();

    if let Some(user_id) = query.user_id {
        base_query = base_query.filter(eco_actions::user_id.eq(user_id));
    }

    if let Some(challenge_id) = query.challenge_id {
        base_query = base_query.filter(eco_actions::challenge_id.eq(challenge_id));
    }

    if let Some(ref action_type) = query.action_type {
        base_query = base_query.filter(eco_actions::action_type.eq(action_type));
    }

    base_query
        .order((eco_actions::performed_on.desc(), eco_actions::id.desc()))
        .limit(query.limit.max(0))
        .offset(query.offset.max(0))
        .load(conn)
        .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))
}

// ============================================================================
// Write Operations
// ============================================================================

/// Log an action performed today (UTC)
pub fn create_action(conn: &mut SqliteConnection, input: CreateActionInput) -> Result<EcoAction, StorageError> {
    create_action_on(conn, input, &current_date())
}

/// Log an action performed on the given `YYYY-MM-DD` date
pub fn create_action_on(
    conn: &mut SqliteConnection,
    input: CreateActionInput,
    performed_on: &str,
) -> Result<EcoAction, StorageError> {
    validate_action_type(&input.action_type)?;
    validate_description(&input.description)?;
    challenges::parse_date(performed_on)?;

    conn.transaction(|conn| {
        validate_challenge(conn, input.challenge_id)?;

        let now = current_timestamp();
        let new_action = NewEcoAction {
            user_id: input.user_id,
            action_type: &input.action_type,
            description: &input.description,
            points: input.points,
            challenge_id: input.challenge_id,
            performed_on,
            created_at: &now,
            updated_at: &now,
        };

        diesel::insert_into(eco_actions::table)
            .values(&new_action)
            .execute(conn)
            .map_err(|e| write_error(e, "Insert"))?;

        let action: EcoAction = eco_actions::table
            .filter(eco_actions::user_id.eq(input.user_id))
            .filter(eco_actions::action_type.eq(&input.action_type))
            .filter(eco_actions::performed_on.eq(performed_on))
            .select(EcoAction::as_select())
            .first(conn)
            .map_err(|e| StorageError::Internal(format!("Failed to retrieve created action: {}", e)))?;

        ledger::on_action_created(conn, &action.snapshot())?;

        Ok(action)
    })
}

/// Apply a partial update and reconcile the ledger against the prior state
pub fn update_action(
    conn: &mut SqliteConnection,
    id: i32,
    input: UpdateActionInput,
) -> Result<EcoAction, StorageError> {
    if let Some(ref action_type) = input.action_type {
        validate_action_type(action_type)?;
    }
    if let Some(ref description) = input.description {
        validate_description(description)?;
    }

    conn.transaction(|conn| {
        let previous = get_action(conn, id)?
            .ok_or_else(|| StorageError::NotFound(format!("Action {} not found", id)))?;

        if let Some(challenge_id) = input.challenge_id {
            validate_challenge(conn, challenge_id)?;
        }

        let now = current_timestamp();
        let changes = EcoActionChanges {
            action_type: input.action_type.as_deref(),
            description: input.description.as_deref(),
            points: input.points,
            challenge_id: input.challenge_id,
            updated_at: &now,
        };

        diesel::update(eco_actions::table.find(id))
            .set(&changes)
            .execute(conn)
            .map_err(|e| write_error(e, "Update"))?;

        let current = get_action(conn, id)?
            .ok_or_else(|| StorageError::Internal("Failed to retrieve updated action".into()))?;

        ledger::on_action_updated(conn, Some(&previous.snapshot()), &current.snapshot())?;

        Ok(current)
    })
}

/// Delete an action and debit its points, returning the deleted row
pub fn delete_action(conn: &mut SqliteConnection, id: i32) -> Result<Option<EcoAction>, StorageError> {
    conn.transaction(|conn| {
        let Some(action) = get_action(conn, id)? else {
            return Ok(None);
        };

        diesel::delete(eco_actions::table.find(id))
            .execute(conn)
            .map_err(|e| StorageError::Internal(format!("Delete failed: {}", e)))?;

        ledger::on_action_deleted(conn, &action.snapshot())?;

        Ok(Some(action))
    })
}
