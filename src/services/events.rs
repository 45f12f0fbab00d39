//! Event system for ledger operations
//!
//! Services emit an event after each committed write. Useful for:
//! - Audit logging
//! - Real-time leaderboard refresh
//! - Notifications (delivered elsewhere)

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

/// Events emitted by services after a unit of work commits
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    // Action events
    ActionLogged {
        id: i32,
        user_id: i32,
        challenge_id: Option<i32>,
        points: i32,
    },
    ActionUpdated {
        id: i32,
        user_id: i32,
        challenge_id: Option<i32>,
        points: i32,
    },
    ActionDeleted {
        id: i32,
        user_id: i32,
    },

    // Challenge events
    ChallengeCreated {
        id: i32,
        title: String,
    },
    ChallengeUpdated {
        id: i32,
        title: String,
    },
    ChallengeDeleted {
        id: i32,
    },

    // Membership events
    ChallengeJoined {
        user_id: i32,
        challenge_id: i32,
    },
    ChallengeLeft {
        user_id: i32,
        challenge_id: i32,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    /// Handle an event
    fn on_event(&self, event: &LedgerEvent);
}

/// Event bus for broadcasting ledger events
pub struct EventBus {
    sender: broadcast::Sender<LedgerEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a new event bus with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: LedgerEvent) {
        trace!(event = ?event, "Emitting ledger event");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging event listener for audit trails
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &LedgerEvent) {
        match event {
            LedgerEvent::ActionLogged { id, user_id, challenge_id, points } => {
                info!(id, user_id, challenge_id = ?challenge_id, points, "Action logged");
            }
            LedgerEvent::ChallengeJoined { user_id, challenge_id } => {
                info!(user_id, challenge_id, "Challenge joined");
            }
            LedgerEvent::ChallengeLeft { user_id, challenge_id } => {
                info!(user_id, challenge_id, "Challenge left, score discarded");
            }
            _ => {
                debug!(event = ?event, "Ledger event");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_event_bus_emit_receive() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        bus.emit(LedgerEvent::ChallengeJoined { user_id: 1, challenge_id: 2 });

        let event = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .expect("timeout")
            .expect("receive error");

        assert_eq!(event, LedgerEvent::ChallengeJoined { user_id: 1, challenge_id: 2 });
    }

    #[test]
    fn test_event_bus_no_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        bus.emit(LedgerEvent::ActionDeleted { id: 1, user_id: 1 });
    }
}
