//! Leaderboard ledger
//!
//! Keeps each (user, challenge) leaderboard entry equal to the sum of points
//! of the actions currently attributed to that pair. Callers invoke these
//! functions on the connection of the transaction that writes the action or
//! membership change, so the ledger write commits or rolls back with it.
//!
//! ## Delta protocol
//!
//! | Event | Effect |
//! |-------|--------|
//! | action created | `+points` on (user, challenge) |
//! | points edited, same challenge | `+(new - old)` |
//! | challenge reassigned | `-old` on old pair, `+new` on new pair |
//! | action deleted | `-points` |
//! | challenge joined | entry ensured at 0 |
//! | challenge left | entry deleted, score discarded |
//!
//! Scores are not clamped and points are not required to be non-negative.

use std::collections::HashMap;

use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use ts_rs::TS;

use crate::db::leaderboard;
use crate::db::models::LeaderboardEntry;
use crate::db::schema::eco_actions;
use crate::error::StorageError;

/// The fields of an action that affect the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionSnapshot {
    pub user_id: i32,
    pub challenge_id: Option<i32>,
    pub points: i32,
}

/// An entry whose score disagrees with its attributed actions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ScoreDiscrepancy {
    pub entry_id: i32,
    pub user_id: i32,
    pub challenge_id: i32,
    pub score: i64,
    pub expected: i64,
}

/// Ensure an entry exists for a pair; `None` if either reference is missing
pub fn ensure_entry(
    conn: &mut SqliteConnection,
    user_id: Option<i32>,
    challenge_id: Option<i32>,
) -> Result<Option<LeaderboardEntry>, StorageError> {
    leaderboard::ensure_entry(conn, user_id, challenge_id)
}

fn add_points(
    conn: &mut SqliteConnection,
    user_id: i32,
    challenge_id: i32,
    delta: i64,
) -> Result<(), StorageError> {
    if let Some(entry) = ensure_entry(conn, Some(user_id), Some(challenge_id))? {
        if delta != 0 {
            leaderboard::apply_delta(conn, entry.id, delta)?;
        }
    }
    Ok(())
}

/// Credit a newly created action to its challenge entry
pub fn on_action_created(
    conn: &mut SqliteConnection,
    action: &ActionSnapshot,
) -> Result<(), StorageError> {
    let Some(challenge_id) = action.challenge_id else {
        return Ok(());
    };

    debug!(user_id = action.user_id, challenge_id, points = action.points, "Crediting new action");
    add_points(conn, action.user_id, challenge_id, i64::from(action.points))
}

/// Reconcile entries after an action changed.
///
/// `previous` is the action as it was before the update (absent if it did
/// not exist). When the challenge changes, the old entry loses the old points
/// and the new entry gains the full new points, so each entry stays an exact
/// sum over the actions attributed to it.
pub fn on_action_updated(
    conn: &mut SqliteConnection,
    previous: Option<&ActionSnapshot>,
    current: &ActionSnapshot,
) -> Result<(), StorageError> {
    // i64 holds the difference of any two i32 point values
    let prev_points = previous.map(|p| i64::from(p.points)).unwrap_or(0);
    let points = i64::from(current.points);
    let prev_challenge = previous.and_then(|p| p.challenge_id);
    let user_id = current.user_id;

    match (prev_challenge, current.challenge_id) {
        (Some(old), Some(new)) if old == new => {
            let delta = points - prev_points;
            debug!(user_id, challenge_id = new, delta, "Applying points edit");
            add_points(conn, user_id, new, delta)
        }
        (Some(old), new) => {
            debug!(
                user_id,
                from = old,
                to = ?new,
                "Moving action between challenges"
            );
            add_points(conn, user_id, old, -prev_points)?;
            match new {
                Some(new) => add_points(conn, user_id, new, points),
                None => Ok(()),
            }
        }
        (None, Some(new)) => {
            debug!(user_id, challenge_id = new, points, "Attaching action to challenge");
            add_points(conn, user_id, new, points)
        }
        (None, None) => Ok(()),
    }
}

/// Remove a deleted action's points from its challenge entry
pub fn on_action_deleted(
    conn: &mut SqliteConnection,
    action: &ActionSnapshot,
) -> Result<(), StorageError> {
    let Some(challenge_id) = action.challenge_id else {
        return Ok(());
    };
    if action.points == 0 {
        return Ok(());
    }

    let (entry, created) = leaderboard::get_or_create_entry(conn, action.user_id, challenge_id)?;
    if created {
        warn!(
            user_id = action.user_id,
            challenge_id,
            "Deleted action had no leaderboard entry, ledger was inconsistent"
        );
    }

    debug!(user_id = action.user_id, challenge_id, points = action.points, "Debiting deleted action");
    leaderboard::apply_delta(conn, entry.id, -i64::from(action.points))
}

/// Ensure an entry for a joining user, reporting whether it was created
pub fn on_challenge_joined(
    conn: &mut SqliteConnection,
    user_id: i32,
    challenge_id: i32,
) -> Result<(LeaderboardEntry, bool), StorageError> {
    leaderboard::get_or_create_entry(conn, user_id, challenge_id)
}

/// Drop a leaving user's entry and its accumulated score
pub fn on_challenge_left(
    conn: &mut SqliteConnection,
    user_id: i32,
    challenge_id: i32,
) -> Result<bool, StorageError> {
    leaderboard::delete_entry(conn, user_id, challenge_id)
}

/// Compare every entry against the sum of its attributed actions' points
pub fn audit(conn: &mut SqliteConnection) -> Result<Vec<ScoreDiscrepancy>, StorageError> {
    let sums: Vec<(i32, Option<i32>, Option<i64>)> = eco_actions::table
        .filter(eco_actions::challenge_id.is_not_null())
        .group_by((eco_actions::user_id, eco_actions::challenge_id))
        .select((
            eco_actions::user_id,
            eco_actions::challenge_id,
            diesel::dsl::sum(eco_actions::points),
        ))
        .load(conn)
        .map_err(|e| StorageError::Internal(format!("Audit query failed: {}", e)))?;

    let expected: HashMap<(i32, i32), i64> = sums
        .into_iter()
        .filter_map(|(user, challenge, total)| challenge.map(|c| ((user, c), total.unwrap_or(0))))
        .collect();

    let discrepancies: Vec<ScoreDiscrepancy> = leaderboard::all_entries(conn)?
        .into_iter()
        .filter_map(|entry| {
            let expected = expected
                .get(&(entry.user_id, entry.challenge_id))
                .copied()
                .unwrap_or(0);
            (entry.score != expected).then(|| ScoreDiscrepancy {
                entry_id: entry.id,
                user_id: entry.user_id,
                challenge_id: entry.challenge_id,
                score: entry.score,
                expected,
            })
        })
        .collect();

    if !discrepancies.is_empty() {
        warn!(count = discrepancies.len(), "Leaderboard audit found inconsistent entries");
    }

    Ok(discrepancies)
}
