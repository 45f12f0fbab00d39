//! Diesel model definitions for database tables
//!
//! - Queryable structs: for SELECT queries (reading data)
//! - Insertable structs: for INSERT queries (writing data)
//!
//! TypeScript types for the web client are generated via ts-rs. Run:
//!   cargo test export_bindings

use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use super::schema::*;
use crate::ledger::ActionSnapshot;

// ============================================================================
// Timestamp Helpers (SQLite stores timestamps as TEXT)
// ============================================================================

/// Get current UTC timestamp as ISO 8601 string for SQLite TEXT columns
pub fn current_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Today's UTC calendar date as stored in `performed_on`
pub fn current_date() -> String {
    chrono::Utc::now().date_naive().format(DATE_FORMAT).to_string()
}

/// Calendar date format for DATE-like TEXT columns
pub const DATE_FORMAT: &str = "%Y-%m-%d";

// ============================================================================
// Challenge Models
// ============================================================================

/// Challenge row from SELECT query
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize, TS)]
#[diesel(table_name = challenges)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[ts(export)]
pub struct Challenge {
    pub id: i32,
    pub title: String,
    pub description: String,
    pub start_date: String,
    pub end_date: String,
    pub created_at: String,
    pub updated_at: String,
}

/// New challenge for INSERT
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = challenges)]
pub struct NewChallenge<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub start_date: &'a str,
    pub end_date: &'a str,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

/// Partial update for a challenge
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = challenges)]
pub struct ChallengeChanges<'a> {
    pub title: Option<&'a str>,
    pub description: Option<&'a str>,
    pub start_date: Option<&'a str>,
    pub end_date: Option<&'a str>,
    pub updated_at: &'a str,
}

// ============================================================================
// Eco Action Models
// ============================================================================

/// Eco action row from SELECT query
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize, TS)]
#[diesel(table_name = eco_actions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[ts(export)]
pub struct EcoAction {
    pub id: i32,
    pub user_id: i32,
    pub action_type: String,
    pub description: String,
    pub points: i32,
    pub challenge_id: Option<i32>,
    pub performed_on: String,
    pub created_at: String,
    pub updated_at: String,
}

impl EcoAction {
    /// The point-bearing fields the ledger reasons about
    pub fn snapshot(&self) -> ActionSnapshot {
        ActionSnapshot {
            user_id: self.user_id,
            challenge_id: self.challenge_id,
            points: self.points,
        }
    }
}

/// New eco action for INSERT
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = eco_actions)]
pub struct NewEcoAction<'a> {
    pub user_id: i32,
    pub action_type: &'a str,
    pub description: &'a str,
    pub points: i32,
    pub challenge_id: Option<i32>,
    pub performed_on: &'a str,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

/// Partial update for an eco action.
///
/// `challenge_id: Some(None)` detaches the action from its challenge.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = eco_actions)]
pub struct EcoActionChanges<'a> {
    pub action_type: Option<&'a str>,
    pub description: Option<&'a str>,
    pub points: Option<i32>,
    pub challenge_id: Option<Option<i32>>,
    pub updated_at: &'a str,
}

// ============================================================================
// Leaderboard Models
// ============================================================================

/// Leaderboard entry row from SELECT query
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Serialize, Deserialize, TS)]
#[diesel(table_name = leaderboard_entries)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[ts(export)]
pub struct LeaderboardEntry {
    pub id: i32,
    pub user_id: i32,
    pub challenge_id: i32,
    pub score: i64,
}

/// New leaderboard entry for INSERT
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = leaderboard_entries)]
pub struct NewLeaderboardEntry {
    pub user_id: i32,
    pub challenge_id: i32,
    pub score: i64,
}

/// Entry with its 1-based position on the challenge leaderboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RankedEntry {
    pub rank: i64,
    #[serde(flatten)]
    pub entry: LeaderboardEntry,
}

// ============================================================================
// Enumerations
// ============================================================================

/// An action type with its display label, as listed to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
pub struct ActionTypeOption {
    pub value: String,
    pub label: String,
}

/// Eco action categories
pub mod action_types {
    pub const TRANSPORT: &str = "transport";
    pub const PLASTIC: &str = "plastic";
    pub const VEGETARIAN: &str = "vegetarian";
    pub const ENERGY: &str = "energy";
    pub const WATER: &str = "water";

    /// All supported action types
    pub const ALL: [&str; 5] = [TRANSPORT, PLASTIC, VEGETARIAN, ENERGY, WATER];

    /// Check if an action type is valid
    pub fn is_valid(action_type: &str) -> bool {
        ALL.contains(&action_type)
    }

    /// Human-readable label
    pub fn label(action_type: &str) -> Option<&'static str> {
        match action_type {
            TRANSPORT => Some("Public Transport"),
            PLASTIC => Some("Avoided Plastic"),
            VEGETARIAN => Some("Vegetarian Meal"),
            ENERGY => Some("Energy Saving"),
            WATER => Some("Water Saving"),
            _ => None,
        }
    }

    /// Every action type paired with its label, in declaration order
    pub fn options() -> Vec<super::ActionTypeOption> {
        ALL.iter()
            .filter_map(|value| {
                label(value).map(|label| super::ActionTypeOption {
                    value: value.to_string(),
                    label: label.to_string(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_types() {
        assert!(action_types::is_valid("transport"));
        assert!(action_types::is_valid("water"));
        assert!(!action_types::is_valid("Transport"));
        assert!(!action_types::is_valid("recycling"));
        assert_eq!(action_types::label("vegetarian"), Some("Vegetarian Meal"));
        assert_eq!(action_types::label("unknown"), None);
    }

    #[test]
    fn test_action_type_options_cover_all() {
        let options = action_types::options();
        assert_eq!(options.len(), action_types::ALL.len());
        assert_eq!(
            options[0],
            ActionTypeOption { value: "transport".to_string(), label: "Public Transport".to_string() }
        );
        assert!(options.iter().all(|o| action_types::is_valid(&o.value)));
    }

    #[test]
    fn test_ranked_entry_serializes_flat() {
        let ranked = RankedEntry {
            rank: 1,
            entry: LeaderboardEntry { id: 7, user_id: 3, challenge_id: 2, score: 40 },
        };
        let json = serde_json::to_value(&ranked).unwrap();
        assert_eq!(json["rank"], 1);
        assert_eq!(json["user_id"], 3);
        assert_eq!(json["score"], 40);
    }
}
