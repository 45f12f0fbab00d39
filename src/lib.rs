//! Eco Ledger - eco-actions backend with per-challenge leaderboards
//!
//! Users log environmental actions worth points, join time-boxed challenges,
//! and see their score tallied on each challenge's leaderboard.
//!
//! ## Architecture
//!
//! - **Ledger** (`ledger`): the only writer of leaderboard scores. Each
//!   action create/update/delete and each join/leave maps to one ledger call.
//! - **Repositories** (`db`): Diesel queries over SQLite for challenges,
//!   actions and leaderboard entries.
//! - **Services** (`services`): one IMMEDIATE transaction per write, pairing
//!   the row change with its ledger call, then an event on the bus.
//! - **HTTP** (`http`): thin JSON handlers over the services.
//!
//! ## Invariant
//!
//! For every (user, challenge) entry, `score` equals the sum of `points` over
//! that user's actions attributed to that challenge since they last joined.
//! `GET /leaderboard/audit` reports entries where this does not hold.
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/eco-ledger/
//! ├── ledger.db        # SQLite database (WAL mode)
//! └── config.toml      # Configuration
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod ledger;
pub mod services;

pub use config::Config;
pub use db::LedgerDb;
pub use error::StorageError;
pub use http::HttpServer;
pub use ledger::{ActionSnapshot, ScoreDiscrepancy};
pub use services::{EventBus, LedgerEvent, Services};
