//! Database schema definitions
//!
//! Diesel table declarations plus the DDL used to create them. Dates are
//! stored as `YYYY-MM-DD` TEXT and timestamps as ISO 8601 TEXT.

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use tracing::info;

use crate::error::StorageError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

diesel::table! {
    challenges (id) {
        id -> Integer,
        title -> Text,
        description -> Text,
        start_date -> Text,
        end_date -> Text,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    eco_actions (id) {
        id -> Integer,
        user_id -> Integer,
        action_type -> Text,
        description -> Text,
        points -> Integer,
        challenge_id -> Nullable<Integer>,
        performed_on -> Text,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    leaderboard_entries (id) {
        id -> Integer,
        user_id -> Integer,
        challenge_id -> Integer,
        score -> BigInt,
    }
}

diesel::table! {
    schema_version (version) {
        version -> Integer,
    }
}

diesel::joinable!(eco_actions -> challenges (challenge_id));
diesel::joinable!(leaderboard_entries -> challenges (challenge_id));

diesel::allow_tables_to_appear_in_same_query!(challenges, eco_actions, leaderboard_entries);

/// Initialize the database schema
pub fn init_schema(conn: &mut SqliteConnection) -> Result<(), StorageError> {
    conn.batch_execute("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
        .map_err(|e| StorageError::Internal(format!("Failed to create schema_version table: {}", e)))?;

    let current_version: i32 = schema_version::table
        .select(schema_version::version)
        .first(conn)
        .optional()
        .map_err(|e| StorageError::Internal(format!("Failed to read schema_version: {}", e)))?
        .unwrap_or(0);

    if current_version >= SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    info!("Creating database schema v{}", SCHEMA_VERSION);
    conn.batch_execute(TABLES_SCHEMA)
        .map_err(|e| StorageError::Internal(format!("Failed to create tables: {}", e)))?;
    conn.batch_execute(INDEXES_SCHEMA)
        .map_err(|e| StorageError::Internal(format!("Failed to create indexes: {}", e)))?;

    diesel::delete(schema_version::table)
        .execute(conn)
        .map_err(|e| StorageError::Internal(format!("Failed to clear schema_version: {}", e)))?;
    diesel::insert_into(schema_version::table)
        .values(schema_version::version.eq(SCHEMA_VERSION))
        .execute(conn)
        .map_err(|e| StorageError::Internal(format!("Failed to set schema_version: {}", e)))?;

    Ok(())
}

const TABLES_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS challenges (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);

-- One action per user, category and day
CREATE TABLE IF NOT EXISTS eco_actions (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    user_id INTEGER NOT NULL,
    action_type TEXT NOT NULL,
    description TEXT NOT NULL,
    points INTEGER NOT NULL DEFAULT 0,
    challenge_id INTEGER,
    performed_on TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    UNIQUE (user_id, action_type, performed_on),
    FOREIGN KEY (challenge_id) REFERENCES challenges(id) ON DELETE SET NULL
);

-- Running score per (user, challenge)
CREATE TABLE IF NOT EXISTS leaderboard_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    user_id INTEGER NOT NULL,
    challenge_id INTEGER NOT NULL,
    score INTEGER NOT NULL DEFAULT 0,
    UNIQUE (user_id, challenge_id),
    FOREIGN KEY (challenge_id) REFERENCES challenges(id) ON DELETE CASCADE
);
"#;

const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_eco_actions_user ON eco_actions(user_id);
CREATE INDEX IF NOT EXISTS idx_eco_actions_challenge ON eco_actions(challenge_id);
CREATE INDEX IF NOT EXISTS idx_eco_actions_performed_on ON eco_actions(performed_on);
CREATE INDEX IF NOT EXISTS idx_leaderboard_challenge_score ON leaderboard_entries(challenge_id, score DESC, id);
CREATE INDEX IF NOT EXISTS idx_leaderboard_user ON leaderboard_entries(user_id);
"#;
