//! Run event types and broadcast bus
//!
//! The orchestrator narrates every run through [`RunEvent`]s. Consumers (a
//! daemon's progress stream, a review UI, test assertions) subscribe to the
//! [`EventBus`]; emission never blocks and never fails the run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events emitted during a product run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// Pipeline run started for a product
    RunStarted {
        run_id: Uuid,
        product_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Orchestrator moved between FSM states
    StateChanged {
        run_id: Uuid,
        old_state: String,
        new_state: String,
        timestamp: DateTime<Utc>,
    },

    /// A source fetch attempt started
    SourceFetchStarted {
        run_id: Uuid,
        round: u32,
        source_id: String,
        attempt: u32,
    },

    /// A source fetch attempt failed
    SourceFetchFailed {
        run_id: Uuid,
        round: u32,
        source_id: String,
        attempt: u32,
        error: String,
    },

    /// A source was excluded for the rest of the run
    SourceExcluded {
        run_id: Uuid,
        round: u32,
        source_id: String,
        reason: String,
    },

    /// A fetched source contributed candidates
    SourceProcessed {
        run_id: Uuid,
        round: u32,
        source_id: String,
        candidates: usize,
        pages: usize,
    },

    /// Per-field decision after validation
    FieldDecision {
        run_id: Uuid,
        round: u32,
        field_key: String,
        decision: String,
        confidence: Option<f64>,
    },

    /// A round ended
    RoundCompleted {
        run_id: Uuid,
        round: u32,
        newly_filled: usize,
        coverage: f64,
    },

    /// The run hit its wall-clock guard
    MaxRunSecondsReached {
        run_id: Uuid,
        elapsed_secs: u64,
    },

    /// Run finished and the record was produced
    RunCompleted {
        run_id: Uuid,
        product_id: String,
        status: String,
        coverage: f64,
        rounds_used: u32,
        timestamp: DateTime<Utc>,
    },
}

impl RunEvent {
    /// Event type string (matches the serde tag)
    pub fn event_type(&self) -> &'static str {
        match self {
            RunEvent::RunStarted { .. } => "run_started",
            RunEvent::StateChanged { .. } => "state_changed",
            RunEvent::SourceFetchStarted { .. } => "source_fetch_started",
            RunEvent::SourceFetchFailed { .. } => "source_fetch_failed",
            RunEvent::SourceExcluded { .. } => "source_excluded",
            RunEvent::SourceProcessed { .. } => "source_processed",
            RunEvent::FieldDecision { .. } => "field_decision",
            RunEvent::RoundCompleted { .. } => "round_completed",
            RunEvent::MaxRunSecondsReached { .. } => "max_run_seconds_reached",
            RunEvent::RunCompleted { .. } => "run_completed",
        }
    }
}

/// Broadcast bus for [`RunEvent`]s
///
/// Cloning the bus shares the underlying channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RunEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: RunEvent) -> Result<usize, broadcast::error::SendError<RunEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: RunEvent) {
        if let Err(e) = self.tx.send(event) {
            tracing::trace!("No subscribers for event: {}", e.0.event_type());
        }
    }

    /// Current number of subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
