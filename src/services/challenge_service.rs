//! Challenge service - challenge records and membership
//!
//! Joining creates the user's leaderboard entry; leaving deletes it along
//! with the accumulated score.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};

use crate::db::challenges::{self, CreateChallengeInput, UpdateChallengeInput};
use crate::db::models::{Challenge, LeaderboardEntry};
use crate::db::LedgerDb;
use crate::error::StorageError;
use crate::ledger;

use super::events::{EventBus, LedgerEvent};

/// Challenge service for business logic
pub struct ChallengeService {
    db: Arc<LedgerDb>,
    events: Arc<EventBus>,
}

impl ChallengeService {
    /// Create a new challenge service
    pub fn new(db: Arc<LedgerDb>, events: Arc<EventBus>) -> Self {
        Self { db, events }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    pub fn get(&self, id: i32) -> Result<Option<Challenge>, StorageError> {
        self.db.with_conn(|conn| challenges::get_challenge(conn, id))
    }

    pub fn list(&self) -> Result<Vec<Challenge>, StorageError> {
        self.db.with_conn(challenges::list_challenges)
    }

    /// User ids holding an entry for the challenge
    pub fn participants(&self, challenge_id: i32) -> Result<Vec<i32>, StorageError> {
        self.db.with_conn(|conn| {
            challenges::require_challenge(conn, challenge_id)?;
            challenges::participants(conn, challenge_id)
        })
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    pub fn create(&self, input: CreateChallengeInput) -> Result<Challenge, StorageError> {
        let challenge = self.db.transaction(|conn| challenges::create_challenge(conn, input))?;

        self.events.emit(LedgerEvent::ChallengeCreated {
            id: challenge.id,
            title: challenge.title.clone(),
        });

        Ok(challenge)
    }

    /// Edit title, description or dates; the merged range must stay valid
    pub fn update(&self, id: i32, input: UpdateChallengeInput) -> Result<Challenge, StorageError> {
        let challenge = self.db.transaction(|conn| challenges::update_challenge(conn, id, input))?;

        self.events.emit(LedgerEvent::ChallengeUpdated {
            id: challenge.id,
            title: challenge.title.clone(),
        });

        Ok(challenge)
    }

    /// Delete a challenge; its entries cascade and its actions detach
    pub fn delete(&self, id: i32) -> Result<bool, StorageError> {
        let deleted = self.db.transaction(|conn| challenges::delete_challenge(conn, id))?;

        if deleted {
            self.events.emit(LedgerEvent::ChallengeDeleted { id });
        }

        Ok(deleted)
    }

    /// Join a challenge as of today (UTC)
    pub fn join(&self, user_id: i32, challenge_id: i32) -> Result<(LeaderboardEntry, bool), StorageError> {
        self.join_on(user_id, challenge_id, Utc::now().date_naive())
    }

    /// Join a challenge as of `today`.
    ///
    /// Returns the entry and whether it was newly created. Rejoining while
    /// already a member returns the existing entry untouched.
    pub fn join_on(
        &self,
        user_id: i32,
        challenge_id: i32,
        today: NaiveDate,
    ) -> Result<(LeaderboardEntry, bool), StorageError> {
        let (entry, created) = self.db.transaction(|conn| {
            let challenge = challenges::require_challenge(conn, challenge_id)?;
            let end_date = challenges::parse_date(&challenge.end_date)?;
            if end_date < today {
                return Err(StorageError::Conflict(format!(
                    "Challenge {} ended on {}",
                    challenge_id, challenge.end_date
                )));
            }
            ledger::on_challenge_joined(conn, user_id, challenge_id)
        })?;

        if created {
            self.events.emit(LedgerEvent::ChallengeJoined { user_id, challenge_id });
        }

        Ok((entry, created))
    }

    /// Leave a challenge, returning whether the user was a member
    pub fn leave(&self, user_id: i32, challenge_id: i32) -> Result<bool, StorageError> {
        let left = self.db.transaction(|conn| {
            challenges::require_challenge(conn, challenge_id)?;
            ledger::on_challenge_left(conn, user_id, challenge_id)
        })?;

        if left {
            self.events.emit(LedgerEvent::ChallengeLeft { user_id, challenge_id });
        }

        Ok(left)
    }
}
