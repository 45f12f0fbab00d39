//! Challenge CRUD operations using Diesel
//!
//! Participants are not stored separately: a user takes part in a challenge
//! exactly when they hold a leaderboard entry for it.

use chrono::NaiveDate;
use diesel::prelude::*;
use serde::Deserialize;

use super::models::{current_timestamp, Challenge, ChallengeChanges, NewChallenge, DATE_FORMAT};
use super::schema::{challenges, leaderboard_entries};
use crate::error::StorageError;

const MAX_TITLE_LEN: usize = 100;

/// Input for creating a challenge
#[derive(Debug, Clone, Deserialize)]
pub struct CreateChallengeInput {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub start_date: String,
    pub end_date: String,
}

/// Partial update of a challenge; omitted fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateChallengeInput {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
}

/// Parse a `YYYY-MM-DD` column value
pub fn parse_date(value: &str) -> Result<NaiveDate, StorageError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|e| StorageError::InvalidInput(format!("Invalid date '{}': {}", value, e)))
}

// ============================================================================
// Read Operations
// ============================================================================

/// Get challenge by ID
pub fn get_challenge(
    conn: &mut SqliteConnection,
    id: i32,
) -> Result<Option<Challenge>, StorageError> {
    challenges::table
        .find(id)
        .select(Challenge::as_select())
        .first(conn)
        .optional()
        .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))
}

/// Get challenge by ID, failing with `NotFound` if it does not exist
pub fn require_challenge(conn: &mut SqliteConnection, id: i32) -> Result<Challenge, StorageError> {
    get_challenge(conn, id)?
        .ok_or_else(|| StorageError::NotFound(format!("Challenge {} not found", id)))
}

/// List challenges, soonest ending first
pub fn list_challenges(conn: &mut SqliteConnection) -> Result<Vec<Challenge>, StorageError> {
    challenges::table
        .select(Challenge::as_select())
        .order((challenges::end_date.asc(), challenges::id.asc()))
        .load(conn)
        .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))
}

/// User IDs taking part in a challenge
pub fn participants(conn: &mut SqliteConnection, challenge_id: i32) -> Result<Vec<i32>, StorageError> {
    leaderboard_entries::table
        .filter(leaderboard_entries::challenge_id.eq(challenge_id))
        .select(leaderboard_entries::user_id)
        .order(leaderboard_entries::id.asc())
        .load(conn)
        .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))
}

// ============================================================================
// Write Operations
// ============================================================================

/// Create a challenge
pub fn create_challenge(
    conn: &mut SqliteConnection,
    input: CreateChallengeInput,
) -> Result<Challenge, StorageError> {
    let title = validate_title(&input.title)?;
    let start = parse_date(&input.start_date)?;
    let end = parse_date(&input.end_date)?;
    validate_range(start, end)?;

    let now = current_timestamp();
    let start_date = start.format(DATE_FORMAT).to_string();
    let end_date = end.format(DATE_FORMAT).to_string();

    let new_challenge = NewChallenge {
        title,
        description: &input.description,
        start_date: &start_date,
        end_date: &end_date,
        created_at: &now,
        updated_at: &now,
    };

    diesel::insert_into(challenges::table)
        .values(&new_challenge)
        .execute(conn)
        .map_err(|e| StorageError::Internal(format!("Insert failed: {}", e)))?;

    let id: i32 = diesel::select(diesel::dsl::sql::<diesel::sql_types::Integer>("last_insert_rowid()"))
        .get_result(conn)
        .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))?;

    get_challenge(conn, id)?
        .ok_or_else(|| StorageError::Internal("Failed to retrieve created challenge".into()))
}

/// Apply a partial update, re-validating the title and the date range
/// against the merged result
pub fn update_challenge(
    conn: &mut SqliteConnection,
    id: i32,
    input: UpdateChallengeInput,
) -> Result<Challenge, StorageError> {
    let title = input.title.as_deref().map(validate_title).transpose()?;

    conn.transaction(|conn| {
        let existing = require_challenge(conn, id)?;

        let start = parse_date(input.start_date.as_deref().unwrap_or(existing.start_date.as_str()))?;
        let end = parse_date(input.end_date.as_deref().unwrap_or(existing.end_date.as_str()))?;
        validate_range(start, end)?;

        let start_date = input.start_date.as_ref().map(|_| start.format(DATE_FORMAT).to_string());
        let end_date = input.end_date.as_ref().map(|_| end.format(DATE_FORMAT).to_string());
        let now = current_timestamp();

        let changes = ChallengeChanges {
            title,
            description: input.description.as_deref(),
            start_date: start_date.as_deref(),
            end_date: end_date.as_deref(),
            updated_at: &now,
        };

        diesel::update(challenges::table.find(id))
            .set(&changes)
            .execute(conn)
            .map_err(|e| StorageError::Internal(format!("Update failed: {}", e)))?;

        require_challenge(conn, id)
    })
}

/// Delete a challenge.
///
/// Its leaderboard entries are removed by cascade and its actions are
/// detached (challenge set to NULL) by the foreign key.
pub fn delete_challenge(conn: &mut SqliteConnection, id: i32) -> Result<bool, StorageError> {
    let deleted = diesel::delete(challenges::table.find(id))
        .execute(conn)
        .map_err(|e| StorageError::Internal(format!("Delete failed: {}", e)))?;

    Ok(deleted > 0)
}

fn validate_title(title: &str) -> Result<&str, StorageError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(StorageError::InvalidInput("Challenge title is required".into()));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(StorageError::InvalidInput(format!(
            "Challenge title exceeds {} characters",
            MAX_TITLE_LEN
        )));
    }
    Ok(title)
}

fn validate_range(start: NaiveDate, end: NaiveDate) -> Result<(), StorageError> {
    if end < start {
        return Err(StorageError::InvalidInput(format!(
            "Challenge ends ({}) before it starts ({})",
            end, start
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::setup_test_db;

    fn input(title: &str, start: &str, end: &str) -> CreateChallengeInput {
        CreateChallengeInput {
            title: title.to_string(),
            description: "Cycle or take the bus".to_string(),
            start_date: start.to_string(),
            end_date: end.to_string(),
        }
    }

    #[test]
    fn test_create_and_get() {
        let mut conn = setup_test_db();

        let created = create_challenge(&mut conn, input("  Car-free May ", "2025-05-01", "2025-05-31")).unwrap();
        assert_eq!(created.title, "Car-free May");
        assert_eq!(created.end_date, "2025-05-31");

        let fetched = get_challenge(&mut conn, created.id).unwrap().unwrap();
        assert_eq!(fetched.id, created.id);
        assert!(get_challenge(&mut conn, created.id + 1).unwrap().is_none());
    }

    #[test]
    fn test_create_rejects_bad_input() {
        let mut conn = setup_test_db();

        let err = create_challenge(&mut conn, input("", "2025-05-01", "2025-05-31")).unwrap_err();
        assert!(matches!(err, StorageError::InvalidInput(_)));

        let err = create_challenge(&mut conn, input("Backwards", "2025-06-01", "2025-05-01")).unwrap_err();
        assert!(matches!(err, StorageError::InvalidInput(_)));

        let err = create_challenge(&mut conn, input("Bad date", "May 1st", "2025-05-01")).unwrap_err();
        assert!(matches!(err, StorageError::InvalidInput(_)));

        let long_title = "x".repeat(MAX_TITLE_LEN + 1);
        let err = create_challenge(&mut conn, input(&long_title, "2025-05-01", "2025-05-31")).unwrap_err();
        assert!(matches!(err, StorageError::InvalidInput(_)));
    }

    #[test]
    fn test_list_orders_by_end_date() {
        let mut conn = setup_test_db();
        let later = create_challenge(&mut conn, input("Later", "2025-01-01", "2025-12-31")).unwrap();
        let sooner = create_challenge(&mut conn, input("Sooner", "2025-01-01", "2025-02-01")).unwrap();

        let ids: Vec<i32> = list_challenges(&mut conn).unwrap().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![sooner.id, later.id]);
    }

    #[test]
    fn test_update_is_partial() {
        let mut conn = setup_test_db();
        let created = create_challenge(&mut conn, input("Car-free May", "2025-05-01", "2025-05-31")).unwrap();

        let updated = update_challenge(
            &mut conn,
            created.id,
            UpdateChallengeInput {
                title: Some(" Car-free spring ".to_string()),
                end_date: Some("2025-06-30".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(updated.title, "Car-free spring");
        assert_eq!(updated.description, created.description);
        assert_eq!(updated.start_date, "2025-05-01");
        assert_eq!(updated.end_date, "2025-06-30");
    }

    #[test]
    fn test_update_validates_merged_range() {
        let mut conn = setup_test_db();
        let created = create_challenge(&mut conn, input("Car-free May", "2025-05-01", "2025-05-31")).unwrap();

        // Start moved past the stored end
        let err = update_challenge(
            &mut conn,
            created.id,
            UpdateChallengeInput { start_date: Some("2025-06-15".to_string()), ..Default::default() },
        )
        .unwrap_err();
        assert!(matches!(err, StorageError::InvalidInput(_)));

        let err = update_challenge(
            &mut conn,
            created.id,
            UpdateChallengeInput { title: Some("x".repeat(MAX_TITLE_LEN + 1)), ..Default::default() },
        )
        .unwrap_err();
        assert!(matches!(err, StorageError::InvalidInput(_)));

        let err = update_challenge(
            &mut conn,
            created.id,
            UpdateChallengeInput { title: Some("   ".to_string()), ..Default::default() },
        )
        .unwrap_err();
        assert!(matches!(err, StorageError::InvalidInput(_)));

        let unchanged = get_challenge(&mut conn, created.id).unwrap().unwrap();
        assert_eq!(unchanged.title, "Car-free May");
        assert_eq!(unchanged.start_date, "2025-05-01");
    }

    #[test]
    fn test_update_missing_challenge() {
        let mut conn = setup_test_db();
        let err = update_challenge(&mut conn, 42, UpdateChallengeInput::default()).unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[test]
    fn test_delete_missing_challenge() {
        let mut conn = setup_test_db();
        assert!(!delete_challenge(&mut conn, 42).unwrap());
    }
}
