//! End-to-end scenarios through the service layer
//!
//! Each scenario drives the public services and checks the ledger against
//! the audit, which recomputes every score from the actions table.

use eco_ledger::db::actions::{ActionQuery, CreateActionInput, UpdateActionInput};
use eco_ledger::db::challenges::CreateChallengeInput;
use eco_ledger::db::leaderboard::RankingQuery;
use eco_ledger::db::models::action_types;
use eco_ledger::services::events::LedgerEvent;
use eco_ledger::{LedgerDb, Services, StorageError};
use std::sync::Arc;
use tempfile::TempDir;

/// Helper to build services over a temporary on-disk database
fn create_services() -> (Services, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db = LedgerDb::open(&temp_dir.path().join("ledger.db"), 4, 5_000).unwrap();
    (Services::new(Arc::new(db)), temp_dir)
}

fn challenge(services: &Services, title: &str) -> i32 {
    services
        .challenges
        .create(CreateChallengeInput {
            title: title.to_string(),
            description: format!("{} challenge", title),
            start_date: "2024-01-01".to_string(),
            end_date: "2999-12-31".to_string(),
        })
        .unwrap()
        .id
}

fn log(services: &Services, user_id: i32, action_type: &str, points: i32, challenge_id: Option<i32>) -> i32 {
    services
        .actions
        .create(CreateActionInput {
            user_id,
            action_type: action_type.to_string(),
            description: format!("{} action", action_type),
            points,
            challenge_id,
        })
        .unwrap()
        .id
}

fn score(services: &Services, user_id: i32, challenge_id: i32) -> Option<i64> {
    services
        .leaderboard
        .scores_for_user(user_id)
        .unwrap()
        .into_iter()
        .find(|e| e.challenge_id == challenge_id)
        .map(|e| e.score)
}

/// Join, log, edit, move and delete actions; the audit stays clean throughout
#[test]
fn test_action_lifecycle_keeps_ledger_consistent() {
    let (services, _temp) = create_services();
    let c = challenge(&services, "Green commute");
    let d = challenge(&services, "Plastic free");

    let (entry, created) = services.challenges.join(1, c).unwrap();
    assert!(created);
    assert_eq!(entry.score, 0);

    let a1 = log(&services, 1, action_types::TRANSPORT, 10, Some(c));
    assert_eq!(score(&services, 1, c), Some(10));

    let a2 = log(&services, 1, action_types::WATER, 5, Some(c));
    assert_eq!(score(&services, 1, c), Some(15));

    services
        .actions
        .update(a1, UpdateActionInput { points: Some(4), ..Default::default() })
        .unwrap();
    assert_eq!(score(&services, 1, c), Some(9));

    // Moving to a challenge the user never joined creates the entry
    services
        .actions
        .update(a2, UpdateActionInput { challenge_id: Some(Some(d)), ..Default::default() })
        .unwrap();
    assert_eq!(score(&services, 1, c), Some(4));
    assert_eq!(score(&services, 1, d), Some(5));

    assert!(services.actions.delete(a1).unwrap());
    assert_eq!(score(&services, 1, c), Some(0));

    assert!(services.leaderboard.audit().unwrap().is_empty());
}

/// Actions without a challenge never touch the ledger
#[test]
fn test_unattributed_actions_do_not_score() {
    let (services, _temp) = create_services();
    let c = challenge(&services, "Energy saver");

    let id = log(&services, 2, action_types::ENERGY, 8, None);
    assert!(services.leaderboard.scores_for_user(2).unwrap().is_empty());

    services
        .actions
        .update(id, UpdateActionInput { points: Some(20), ..Default::default() })
        .unwrap();
    assert!(services.leaderboard.scores_for_user(2).unwrap().is_empty());

    // Attaching later credits the full points
    services
        .actions
        .update(id, UpdateActionInput { challenge_id: Some(Some(c)), ..Default::default() })
        .unwrap();
    assert_eq!(score(&services, 2, c), Some(20));

    let listed = services
        .actions
        .list(&ActionQuery { challenge_id: Some(c), ..Default::default() })
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert!(services.leaderboard.audit().unwrap().is_empty());
}

/// Leaving discards the score and rejoining starts from zero
#[test]
fn test_leave_and_rejoin_resets_score() {
    let (services, _temp) = create_services();
    let c = challenge(&services, "Meatless month");

    services.challenges.join(3, c).unwrap();
    log(&services, 3, action_types::VEGETARIAN, 12, Some(c));
    assert_eq!(score(&services, 3, c), Some(12));

    assert!(services.challenges.leave(3, c).unwrap());
    assert_eq!(score(&services, 3, c), None);
    assert!(!services.challenges.leave(3, c).unwrap());

    let (entry, created) = services.challenges.join(3, c).unwrap();
    assert!(created);
    assert_eq!(entry.score, 0);

    // The earlier action still references the challenge, so the audit flags it
    let discrepancies = services.leaderboard.audit().unwrap();
    assert_eq!(discrepancies.len(), 1);
    assert_eq!(discrepancies[0].score, 0);
    assert_eq!(discrepancies[0].expected, 12);
}

/// Ranking orders by score with stable tie-breaks
#[test]
fn test_challenge_ranking() {
    let (services, _temp) = create_services();
    let c = challenge(&services, "Water watch");

    for user in [10, 11, 12] {
        services.challenges.join(user, c).unwrap();
    }
    log(&services, 10, action_types::WATER, 7, Some(c));
    log(&services, 11, action_types::WATER, 15, Some(c));
    log(&services, 12, action_types::WATER, 7, Some(c));

    let ranked = services.leaderboard.ranking(c, &RankingQuery::default()).unwrap();
    let order: Vec<(i64, i32, i64)> = ranked
        .iter()
        .map(|r| (r.rank, r.entry.user_id, r.entry.score))
        .collect();
    assert_eq!(order, vec![(1, 11, 15), (2, 10, 7), (3, 12, 7)]);
}

/// Deleting a challenge drops its leaderboard and detaches its actions
#[test]
fn test_delete_challenge_detaches_actions() {
    let (services, _temp) = create_services();
    let c = challenge(&services, "Short lived");

    let id = log(&services, 4, action_types::PLASTIC, 6, Some(c));
    assert!(services.challenges.delete(c).unwrap());

    let action = services.actions.get(id).unwrap().unwrap();
    assert_eq!(action.challenge_id, None);
    assert!(services.leaderboard.scores_for_user(4).unwrap().is_empty());
    assert!(services.leaderboard.audit().unwrap().is_empty());

    let err = services.leaderboard.ranking(c, &RankingQuery::default()).unwrap_err();
    assert!(matches!(err, StorageError::NotFound(_)));
}

/// A rejected write leaves both the actions table and the ledger untouched
#[test]
fn test_rejected_write_changes_nothing() {
    let (services, _temp) = create_services();
    let c = challenge(&services, "Duplicates");

    log(&services, 5, action_types::TRANSPORT, 3, Some(c));

    let err = services
        .actions
        .create(CreateActionInput {
            user_id: 5,
            action_type: action_types::TRANSPORT.to_string(),
            description: "Again today".to_string(),
            points: 50,
            challenge_id: Some(c),
        })
        .unwrap_err();
    assert!(matches!(err, StorageError::Conflict(_)));
    assert_eq!(score(&services, 5, c), Some(3));

    let err = services
        .actions
        .create(CreateActionInput {
            user_id: 5,
            action_type: "teleport".to_string(),
            description: "Not a thing".to_string(),
            points: 50,
            challenge_id: Some(c),
        })
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidInput(_)));

    let listed = services
        .actions
        .list(&ActionQuery { user_id: Some(5), ..Default::default() })
        .unwrap();
    assert_eq!(listed.len(), 1);
}

/// Committed writes are published on the event bus
#[test]
fn test_events_follow_writes() {
    let (services, _temp) = create_services();
    let mut receiver = services.events.subscribe();

    let c = challenge(&services, "Eventful");
    services.challenges.join(6, c).unwrap();
    // Second join is a no-op and emits nothing
    services.challenges.join(6, c).unwrap();
    services.challenges.leave(6, c).unwrap();

    let events: Vec<LedgerEvent> = std::iter::from_fn(|| receiver.try_recv().ok()).collect();
    assert_eq!(
        events,
        vec![
            LedgerEvent::ChallengeCreated { id: c, title: "Eventful".to_string() },
            LedgerEvent::ChallengeJoined { user_id: 6, challenge_id: c },
            LedgerEvent::ChallengeLeft { user_id: 6, challenge_id: c },
        ]
    );
}
