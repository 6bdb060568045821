//! Event types for the advisory event system
//!
//! Every advisory session publishes its lifecycle on the shared [`EventBus`];
//! the SSE endpoint forwards these to connected front ends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Advisory feature slot
///
/// At most one session is active per slot at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureSlot {
    /// Profile strength analysis
    Analysis,
    /// University recommendations
    Recommendations,
    /// Cost-of-attendance estimate
    CostEstimate,
    /// Flashcard generation
    Flashcards,
}

impl FeatureSlot {
    pub const ALL: [FeatureSlot; 4] = [
        FeatureSlot::Analysis,
        FeatureSlot::Recommendations,
        FeatureSlot::CostEstimate,
        FeatureSlot::Flashcards,
    ];

    /// Stable lowercase name used in URLs and logs
    pub fn as_str(self) -> &'static str {
        match self {
            FeatureSlot::Analysis => "analysis",
            FeatureSlot::Recommendations => "recommendations",
            FeatureSlot::CostEstimate => "cost_estimate",
            FeatureSlot::Flashcards => "flashcards",
        }
    }

    /// Parse a slot name as produced by [`FeatureSlot::as_str`]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|slot| slot.as_str() == name)
    }
}

/// Advisory session state
///
/// Success path: IDLE → STREAMING → EXTRACTING → DONE.
/// Terminal alternatives: FAILED, CANCELLED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionState {
    /// Created, transport not yet opened
    Idle,
    /// Receiving fragments from the backend
    Streaming,
    /// Final fragment received, structured extraction running
    Extracting,
    /// Result delivered
    Done,
    /// Transport error or unrecoverable extraction failure
    Failed,
    /// Aborted by the user or superseded by a newer session
    Cancelled,
}

impl SessionState {
    /// Terminal states never transition again
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Done | SessionState::Failed | SessionState::Cancelled
        )
    }
}

/// Advisory event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AdvisoryEvent {
    /// A session was created for a slot
    SessionStarted {
        session_id: Uuid,
        slot: FeatureSlot,
        timestamp: DateTime<Utc>,
    },

    /// Session moved between states
    StateChanged {
        session_id: Uuid,
        slot: FeatureSlot,
        old_state: SessionState,
        new_state: SessionState,
        timestamp: DateTime<Utc>,
    },

    /// Live buffer snapshot after an accepted fragment
    Progress {
        session_id: Uuid,
        slot: FeatureSlot,
        fragment_count: u64,
        /// Full accumulated text so far
        text: String,
    },

    /// Session finished with a result
    SessionCompleted {
        session_id: Uuid,
        slot: FeatureSlot,
        /// True when defaults or fallback scoring contributed to the result
        degraded: bool,
        timestamp: DateTime<Utc>,
    },

    /// Session could not complete
    SessionFailed {
        session_id: Uuid,
        slot: FeatureSlot,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Session aborted before completion
    SessionCancelled {
        session_id: Uuid,
        slot: FeatureSlot,
        timestamp: DateTime<Utc>,
    },

    /// Entitlement gate refused to count the completed session
    QuotaDenied {
        session_id: Uuid,
        user_id: String,
        message: String,
    },
}

impl AdvisoryEvent {
    /// SSE event name
    pub fn event_type(&self) -> &'static str {
        match self {
            AdvisoryEvent::SessionStarted { .. } => "SessionStarted",
            AdvisoryEvent::StateChanged { .. } => "StateChanged",
            AdvisoryEvent::Progress { .. } => "Progress",
            AdvisoryEvent::SessionCompleted { .. } => "SessionCompleted",
            AdvisoryEvent::SessionFailed { .. } => "SessionFailed",
            AdvisoryEvent::SessionCancelled { .. } => "SessionCancelled",
            AdvisoryEvent::QuotaDenied { .. } => "QuotaDenied",
        }
    }

    /// Session the event belongs to
    pub fn session_id(&self) -> Uuid {
        match self {
            AdvisoryEvent::SessionStarted { session_id, .. }
            | AdvisoryEvent::StateChanged { session_id, .. }
            | AdvisoryEvent::Progress { session_id, .. }
            | AdvisoryEvent::SessionCompleted { session_id, .. }
            | AdvisoryEvent::SessionFailed { session_id, .. }
            | AdvisoryEvent::SessionCancelled { session_id, .. }
            | AdvisoryEvent::QuotaDenied { session_id, .. } => *session_id,
        }
    }
}

/// Central event distribution bus
///
/// Thin wrapper over a tokio broadcast channel. Cloning shares the channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AdvisoryEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lag and lose the oldest events once `capacity` is
    /// exceeded. A zero capacity is raised to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<AdvisoryEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: AdvisoryEvent,
    ) -> Result<usize, broadcast::error::SendError<AdvisoryEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: AdvisoryEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_names_round_trip() {
        for slot in FeatureSlot::ALL {
            assert_eq!(FeatureSlot::parse(slot.as_str()), Some(slot));
        }
        assert_eq!(FeatureSlot::parse("unknown"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!SessionState::Idle.is_terminal());
        assert!(!SessionState::Streaming.is_terminal());
        assert!(!SessionState::Extracting.is_terminal());
        assert!(SessionState::Done.is_terminal());
        assert!(SessionState::Failed.is_terminal());
        assert!(SessionState::Cancelled.is_terminal());
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = AdvisoryEvent::SessionCancelled {
            session_id: Uuid::nil(),
            slot: FeatureSlot::CostEstimate,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "SessionCancelled");
        assert_eq!(json["slot"], "cost_estimate");
        assert_eq!(event.event_type(), "SessionCancelled");
    }

    #[tokio::test]
    async fn test_emit_reaches_subscriber() {
        let bus = EventBus::new(8);
        assert!(bus.emit(AdvisoryEvent::QuotaDenied {
            session_id: Uuid::nil(),
            user_id: "u1".to_string(),
            message: "limit".to_string(),
        })
        .is_err());

        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        bus.emit_lossy(AdvisoryEvent::SessionStarted {
            session_id: Uuid::nil(),
            slot: FeatureSlot::Analysis,
            timestamp: Utc::now(),
        });
        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type(), "SessionStarted");
        assert_eq!(bus.capacity(), 8);
    }
}
