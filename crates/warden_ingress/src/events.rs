//! Lifecycle event stream.
//!
//! Events for one run are published in strict order (accepted, started,
//! syscalls, finished or error); there is no cross-run ordering
//! guarantee. Subscribers get a broadcast receiver; slow subscribers may
//! observe gaps, never reordering.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use warden_core::{EventId, RunId, Timestamp};

/// Lifecycle event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunEventKind {
    /// Request validated and recorded
    Accepted,
    /// Execution began (or, for dry-run, would have begun)
    Started,
    /// One syscall was dispatched
    Syscall,
    /// Terminal success
    Finished,
    /// Terminal failure
    Error,
}

/// One lifecycle event on the stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    /// Event identifier
    pub event_id: EventId,
    /// The run this event belongs to
    pub run_id: RunId,
    /// Event kind
    pub kind: RunEventKind,
    /// Emission timestamp
    pub at: Timestamp,
    /// Kind-specific detail (mode, syscall kind, error reason)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl RunEvent {
    /// Create an event for a run
    #[must_use]
    pub fn new(run_id: RunId, kind: RunEventKind, detail: Option<serde_json::Value>) -> Self {
        Self {
            event_id: EventId::new(),
            run_id,
            kind,
            at: Timestamp::now(),
            detail,
        }
    }
}

/// Broadcast fan-out for lifecycle events
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<RunEvent>,
}

impl EventBroadcaster {
    /// Create a broadcaster with the given per-subscriber buffer
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event; delivery to zero subscribers is not an error
    pub fn publish(&self, event: RunEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to the stream from this point on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
