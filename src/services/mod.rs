//! Service layer for eco-ledger
//!
//! Services sit between HTTP handlers and repositories. Each service wraps
//! database operations with:
//! - Transaction boundaries (one IMMEDIATE transaction per write)
//! - Membership rules
//! - Event emission for audit/notifications
//!
//! ## Architecture
//!
//! ```text
//! HTTP Handlers (thin)
//!     ↓
//! Service Layer (business logic)
//!     ↓
//! Ledger + Repository Layer (ledger.rs, db/*.rs)
//!     ↓
//! SQLite Database
//! ```

pub mod action_service;
pub mod challenge_service;
pub mod events;
pub mod leaderboard_service;
pub mod response;

// Re-exports
pub use action_service::ActionService;
pub use challenge_service::ChallengeService;
pub use events::{spawn_logging_listener, EventBus, EventListener, LedgerEvent};
pub use leaderboard_service::LeaderboardService;

use crate::db::LedgerDb;
use std::sync::Arc;

/// Service container for dependency injection
///
/// Holds all services with a shared database pool.
/// Pass this to HttpServer for handler access.
pub struct Services {
    pub actions: Arc<ActionService>,
    pub challenges: Arc<ChallengeService>,
    pub leaderboard: Arc<LeaderboardService>,
    pub events: Arc<EventBus>,
    pub db: Arc<LedgerDb>,
}

impl Services {
    /// Create all services with shared database
    pub fn new(db: Arc<LedgerDb>) -> Self {
        let events = Arc::new(EventBus::new());

        Self {
            actions: Arc::new(ActionService::new(db.clone(), events.clone())),
            challenges: Arc::new(ChallengeService::new(db.clone(), events.clone())),
            leaderboard: Arc::new(LeaderboardService::new(db.clone())),
            events,
            db,
        }
    }
}
