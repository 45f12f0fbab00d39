//! SQLite database module for eco actions, challenges and the leaderboard
//!
//! ## Tables
//!
//! - `challenges` - Challenges users can join
//! - `eco_actions` - Logged point-bearing actions, optionally attributed to a challenge
//! - `leaderboard_entries` - Running score per (user, challenge)
//!
//! All connections come from an r2d2 pool. Every pooled connection has
//! foreign keys enabled and a busy timeout, so concurrent writers queue on
//! SQLite's lock instead of failing immediately.

pub mod actions;
pub mod challenges;
pub mod leaderboard;
pub mod models;
pub mod schema;

use std::path::Path;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use tracing::{debug, info};

use crate::error::StorageError;

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type PooledConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Per-connection SQLite settings applied when the pool hands out a connection
#[derive(Debug, Clone, Copy)]
struct ConnectionOptions {
    busy_timeout_ms: u32,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA busy_timeout = {}; PRAGMA foreign_keys = ON;",
            self.busy_timeout_ms
        ))
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Pooled SQLite database holding the ledger and its collaborators' tables
#[derive(Clone)]
pub struct LedgerDb {
    pool: DbPool,
}

impl LedgerDb {
    /// Open or create the database file
    pub fn open(db_path: &Path, pool_size: u32, busy_timeout_ms: u32) -> Result<Self, StorageError> {
        info!("Opening SQLite database at {:?}", db_path);

        let manager = ConnectionManager::<SqliteConnection>::new(db_path.to_string_lossy());
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .connection_customizer(Box::new(ConnectionOptions { busy_timeout_ms }))
            .build(manager)?;

        let db = Self { pool };

        // WAL lets readers proceed while a writer holds the lock
        db.conn()?
            .batch_execute("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| StorageError::Internal(format!("Failed to set PRAGMA: {}", e)))?;

        db.init_schema()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing)
    ///
    /// Each SQLite in-memory connection is its own database, so the pool is
    /// pinned to a single connection.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        debug!("Opening in-memory SQLite database");

        let manager = ConnectionManager::<SqliteConnection>::new(":memory:");
        let pool = Pool::builder()
            .max_size(1)
            .connection_customizer(Box::new(ConnectionOptions { busy_timeout_ms: 0 }))
            .build(manager)?;

        let db = Self { pool };
        db.init_schema()?;

        Ok(db)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        let mut conn = self.conn()?;
        schema::init_schema(&mut conn)
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<PooledConn, StorageError> {
        Ok(self.pool.get()?)
    }

    /// Run a read operation on a pooled connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, StorageError>,
    {
        let mut conn = self.conn()?;
        f(&mut conn)
    }

    /// Run a unit of work inside one write transaction.
    ///
    /// The transaction is opened with `BEGIN IMMEDIATE`, taking SQLite's
    /// write lock up front. Any error rolls back every write made by `f`.
    pub fn transaction<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, StorageError>,
    {
        let mut conn = self.conn()?;
        conn.immediate_transaction(f)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, StorageError> {
        self.with_conn(|conn| {
            let challenge_count: i64 = schema::challenges::table
                .count()
                .get_result(conn)
                .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))?;

            let action_count: i64 = schema::eco_actions::table
                .count()
                .get_result(conn)
                .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))?;

            let entry_count: i64 = schema::leaderboard_entries::table
                .count()
                .get_result(conn)
                .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))?;

            Ok(DbStats {
                challenge_count: challenge_count as u64,
                action_count: action_count as u64,
                entry_count: entry_count as u64,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub challenge_count: u64,
    pub action_count: u64,
    pub entry_count: u64,
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Fresh in-memory schema on a plain connection
    pub fn setup_test_db() -> SqliteConnection {
        let mut conn = SqliteConnection::establish(":memory:")
            .expect("Failed to create in-memory database");
        conn.batch_execute("PRAGMA foreign_keys = ON;")
            .expect("Failed to enable foreign keys");
        schema::init_schema(&mut conn).expect("Failed to create schema");
        conn
    }

    /// Insert a challenge running from 2024-01-01 to 2999-12-31
    pub fn insert_challenge(conn: &mut SqliteConnection, title: &str) -> i32 {
        challenges::create_challenge(
            conn,
            challenges::CreateChallengeInput {
                title: title.to_string(),
                description: String::new(),
                start_date: "2024-01-01".to_string(),
                end_date: "2999-12-31".to_string(),
            },
        )
        .expect("Failed to create challenge")
        .id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_stats() {
        let db = LedgerDb::open_in_memory().unwrap();
        let stats = db.stats().unwrap();
        assert_eq!(stats.challenge_count, 0);
        assert_eq!(stats.action_count, 0);
        assert_eq!(stats.entry_count, 0);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = LedgerDb::open_in_memory().unwrap();

        let result: Result<(), StorageError> = db.transaction(|conn| {
            test_support::insert_challenge(conn, "Doomed");
            Err(StorageError::Internal("abort".into()))
        });
        assert!(result.is_err());

        assert_eq!(db.stats().unwrap().challenge_count, 0);
    }
}
