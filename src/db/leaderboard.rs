//! Leaderboard entry storage
//!
//! Row-level helpers behind the ledger: entry lookup/creation, the atomic
//! score delta, removal, and the ranking read path. Score is only ever
//! changed through [`apply_delta`], which the ledger calls.

use diesel::prelude::*;
use serde::Deserialize;
use tracing::{debug, warn};

use super::models::{LeaderboardEntry, NewLeaderboardEntry, RankedEntry};
use super::schema::leaderboard_entries;
use crate::error::StorageError;

/// Query parameters for a challenge leaderboard
#[derive(Debug, Clone, Deserialize)]
pub struct RankingQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    100
}

impl Default for RankingQuery {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            offset: 0,
        }
    }
}

// ============================================================================
// Read Operations
// ============================================================================

/// Get the entry for a (user, challenge) pair
pub fn get_entry(
    conn: &mut SqliteConnection,
    user_id: i32,
    challenge_id: i32,
) -> Result<Option<LeaderboardEntry>, StorageError> {
    leaderboard_entries::table
        .filter(leaderboard_entries::user_id.eq(user_id))
        .filter(leaderboard_entries::challenge_id.eq(challenge_id))
        .select(LeaderboardEntry::as_select())
        .first(conn)
        .optional()
        .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))
}

/// Ranked entries for a challenge: score descending, ties by entry id ascending
pub fn ranking(
    conn: &mut SqliteConnection,
    challenge_id: i32,
    query: &RankingQuery,
) -> Result<Vec<RankedEntry>, StorageError> {
    let limit = query.limit.max(0);
    let offset = query.offset.max(0);

    let entries: Vec<LeaderboardEntry> = leaderboard_entries::table
        .filter(leaderboard_entries::challenge_id.eq(challenge_id))
        .select(LeaderboardEntry::as_select())
        .order((leaderboard_entries::score.desc(), leaderboard_entries::id.asc()))
        .limit(limit)
        .offset(offset)
        .load(conn)
        .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))?;

    Ok(entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| RankedEntry {
            rank: offset + i as i64 + 1,
            entry,
        })
        .collect())
}

/// All entries held by a user, highest score first
pub fn entries_for_user(
    conn: &mut SqliteConnection,
    user_id: i32,
) -> Result<Vec<LeaderboardEntry>, StorageError> {
    leaderboard_entries::table
        .filter(leaderboard_entries::user_id.eq(user_id))
        .select(LeaderboardEntry::as_select())
        .order((leaderboard_entries::score.desc(), leaderboard_entries::id.asc()))
        .load(conn)
        .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))
}

/// Every entry, in id order
pub fn all_entries(conn: &mut SqliteConnection) -> Result<Vec<LeaderboardEntry>, StorageError> {
    leaderboard_entries::table
        .select(LeaderboardEntry::as_select())
        .order(leaderboard_entries::id.asc())
        .load(conn)
        .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))
}

// ============================================================================
// Write Operations
// ============================================================================

/// Get the entry for a pair, creating it with score 0 if absent.
///
/// Returns the entry and whether this call created it. Two concurrent
/// creators race on the UNIQUE(user_id, challenge_id) constraint; the loser's
/// insert is a no-op and it reads back the winner's row.
pub fn get_or_create_entry(
    conn: &mut SqliteConnection,
    user_id: i32,
    challenge_id: i32,
) -> Result<(LeaderboardEntry, bool), StorageError> {
    let inserted = diesel::insert_into(leaderboard_entries::table)
        .values(&NewLeaderboardEntry {
            user_id,
            challenge_id,
            score: 0,
        })
        .on_conflict((leaderboard_entries::user_id, leaderboard_entries::challenge_id))
        .do_nothing()
        .execute(conn)
        .map_err(|e| StorageError::Internal(format!("Insert failed: {}", e)))?;

    let entry = get_entry(conn, user_id, challenge_id)?
        .ok_or_else(|| StorageError::Internal("Failed to retrieve leaderboard entry".into()))?;

    if inserted > 0 {
        debug!(user_id, challenge_id, entry_id = entry.id, "Created leaderboard entry");
    }

    Ok((entry, inserted > 0))
}

/// Ensure an entry exists for a pair.
///
/// A missing user or challenge makes this a no-op returning `None`; nothing
/// is recorded for that pair.
pub fn ensure_entry(
    conn: &mut SqliteConnection,
    user_id: Option<i32>,
    challenge_id: Option<i32>,
) -> Result<Option<LeaderboardEntry>, StorageError> {
    match (user_id, challenge_id) {
        (Some(user_id), Some(challenge_id)) => {
            get_or_create_entry(conn, user_id, challenge_id).map(|(entry, _)| Some(entry))
        }
        _ => {
            warn!(
                user_id = ?user_id,
                challenge_id = ?challenge_id,
                "Missing reference for leaderboard entry, points not recorded"
            );
            Ok(None)
        }
    }
}

/// Add a signed delta to an entry's score in one UPDATE statement
pub fn apply_delta(conn: &mut SqliteConnection, entry_id: i32, delta: i64) -> Result<(), StorageError> {
    let updated = diesel::update(leaderboard_entries::table.find(entry_id))
        .set(leaderboard_entries::score.eq(leaderboard_entries::score + delta))
        .execute(conn)
        .map_err(|e| StorageError::Internal(format!("Update failed: {}", e)))?;

    if updated == 0 {
        return Err(StorageError::NotFound(format!("Leaderboard entry {} not found", entry_id)));
    }

    debug!(entry_id, delta, "Applied score delta");
    Ok(())
}

/// Delete the entry for a pair, returning whether one existed
pub fn delete_entry(
    conn: &mut SqliteConnection,
    user_id: i32,
    challenge_id: i32,
) -> Result<bool, StorageError> {
    let deleted = diesel::delete(
        leaderboard_entries::table
            .filter(leaderboard_entries::user_id.eq(user_id))
            .filter(leaderboard_entries::challenge_id.eq(challenge_id)),
    )
    .execute(conn)
    .map_err(|e| StorageError::Internal(format!("Delete failed: {}", e)))?;

    Ok(deleted > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{insert_challenge, setup_test_db};

    #[test]
    fn test_ensure_entry_is_idempotent() {
        let mut conn = setup_test_db();
        let challenge = insert_challenge(&mut conn, "Plastic-free week");

        let first = ensure_entry(&mut conn, Some(1), Some(challenge)).unwrap().unwrap();
        let second = ensure_entry(&mut conn, Some(1), Some(challenge)).unwrap().unwrap();

        assert_eq!(first, second);
        assert_eq!(second.score, 0);
        assert_eq!(all_entries(&mut conn).unwrap().len(), 1);
    }

    #[test]
    fn test_get_or_create_reports_creation() {
        let mut conn = setup_test_db();
        let challenge = insert_challenge(&mut conn, "Meatless Mondays");

        let (_, created) = get_or_create_entry(&mut conn, 5, challenge).unwrap();
        assert!(created);
        let (_, created) = get_or_create_entry(&mut conn, 5, challenge).unwrap();
        assert!(!created);
    }

    #[test]
    fn test_ensure_entry_missing_reference_is_noop() {
        let mut conn = setup_test_db();
        let challenge = insert_challenge(&mut conn, "Water watch");

        assert!(ensure_entry(&mut conn, None, Some(challenge)).unwrap().is_none());
        assert!(ensure_entry(&mut conn, Some(1), None).unwrap().is_none());
        assert!(all_entries(&mut conn).unwrap().is_empty());
    }

    #[test]
    fn test_apply_delta_allows_negative_scores() {
        let mut conn = setup_test_db();
        let challenge = insert_challenge(&mut conn, "Energy saver");
        let (entry, _) = get_or_create_entry(&mut conn, 1, challenge).unwrap();

        apply_delta(&mut conn, entry.id, 5).unwrap();
        apply_delta(&mut conn, entry.id, -8).unwrap();

        let entry = get_entry(&mut conn, 1, challenge).unwrap().unwrap();
        assert_eq!(entry.score, -3);
    }

    #[test]
    fn test_apply_delta_unknown_entry() {
        let mut conn = setup_test_db();
        let err = apply_delta(&mut conn, 99, 1).unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[test]
    fn test_ranking_orders_by_score_then_id() {
        let mut conn = setup_test_db();
        let challenge = insert_challenge(&mut conn, "Commute green");

        let (a, _) = get_or_create_entry(&mut conn, 10, challenge).unwrap();
        let (b, _) = get_or_create_entry(&mut conn, 11, challenge).unwrap();
        let (c, _) = get_or_create_entry(&mut conn, 12, challenge).unwrap();
        apply_delta(&mut conn, a.id, 20).unwrap();
        apply_delta(&mut conn, b.id, 50).unwrap();
        apply_delta(&mut conn, c.id, 20).unwrap();

        let ranked = ranking(&mut conn, challenge, &RankingQuery::default()).unwrap();
        let order: Vec<(i64, i32)> = ranked.iter().map(|r| (r.rank, r.entry.user_id)).collect();
        assert_eq!(order, vec![(1, 11), (2, 10), (3, 12)]);

        let page = ranking(&mut conn, challenge, &RankingQuery { limit: 1, offset: 1 }).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].rank, 2);
        assert_eq!(page[0].entry.user_id, 10);
    }

    #[test]
    fn test_ranking_is_scoped_to_challenge() {
        let mut conn = setup_test_db();
        let first = insert_challenge(&mut conn, "First");
        let second = insert_challenge(&mut conn, "Second");
        get_or_create_entry(&mut conn, 1, first).unwrap();
        get_or_create_entry(&mut conn, 1, second).unwrap();
        get_or_create_entry(&mut conn, 2, second).unwrap();

        assert_eq!(ranking(&mut conn, first, &RankingQuery::default()).unwrap().len(), 1);
        assert_eq!(ranking(&mut conn, second, &RankingQuery::default()).unwrap().len(), 2);
        assert_eq!(entries_for_user(&mut conn, 1).unwrap().len(), 2);
    }

    #[test]
    fn test_delete_entry() {
        let mut conn = setup_test_db();
        let challenge = insert_challenge(&mut conn, "Leave me");
        get_or_create_entry(&mut conn, 3, challenge).unwrap();

        assert!(delete_entry(&mut conn, 3, challenge).unwrap());
        assert!(!delete_entry(&mut conn, 3, challenge).unwrap());
        assert!(get_entry(&mut conn, 3, challenge).unwrap().is_none());
    }
}
