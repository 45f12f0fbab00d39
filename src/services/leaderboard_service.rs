//! Leaderboard service - read path over the ledger

use std::sync::Arc;

use tracing::warn;

use crate::db::challenges;
use crate::db::leaderboard::{self, RankingQuery};
use crate::db::models::{LeaderboardEntry, RankedEntry};
use crate::db::LedgerDb;
use crate::error::StorageError;
use crate::ledger::{self, ScoreDiscrepancy};

pub struct LeaderboardService {
    db: Arc<LedgerDb>,
}

impl LeaderboardService {
    pub fn new(db: Arc<LedgerDb>) -> Self {
        Self { db }
    }

    /// Ranked entries for a challenge
    pub fn ranking(&self, challenge_id: i32, query: &RankingQuery) -> Result<Vec<RankedEntry>, StorageError> {
        self.db.with_conn(|conn| {
            challenges::require_challenge(conn, challenge_id)?;
            leaderboard::ranking(conn, challenge_id, query)
        })
    }

    /// Every challenge score held by a user
    pub fn scores_for_user(&self, user_id: i32) -> Result<Vec<LeaderboardEntry>, StorageError> {
        self.db.with_conn(|conn| leaderboard::entries_for_user(conn, user_id))
    }

    /// Entries whose score disagrees with their attributed actions
    pub fn audit(&self) -> Result<Vec<ScoreDiscrepancy>, StorageError> {
        let discrepancies = self.db.with_conn(ledger::audit)?;
        if !discrepancies.is_empty() {
            warn!(count = discrepancies.len(), "Leaderboard audit found discrepancies");
        }
        Ok(discrepancies)
    }
}
