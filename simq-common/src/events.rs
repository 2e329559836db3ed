//! Query change events and the EventBus
//!
//! The query service announces lifecycle changes through an [`EventBus`]; observers
//! react by re-reading the published result views.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Change notification emitted by the query service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum QueryChange {
    /// A session was acknowledged by the far end (or a snapshot was loaded)
    Started {
        query_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Processing of a session ended
    ///
    /// Also emitted by a local clear of a running session.
    Ended {
        query_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The far end reported an error; partial results stay available
    Error {
        query_id: String,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// New fragments were merged into the current results
    Updated {
        query_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Results were cleared and released
    Clear {
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl QueryChange {
    /// Event name, e.g. for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            QueryChange::Started { .. } => "Started",
            QueryChange::Ended { .. } => "Ended",
            QueryChange::Error { .. } => "Error",
            QueryChange::Updated { .. } => "Updated",
            QueryChange::Clear { .. } => "Clear",
        }
    }

    /// Session the event refers to (`None` for `Clear`)
    pub fn query_id(&self) -> Option<&str> {
        match self {
            QueryChange::Started { query_id, .. }
            | QueryChange::Ended { query_id, .. }
            | QueryChange::Error { query_id, .. }
            | QueryChange::Updated { query_id, .. } => Some(query_id),
            QueryChange::Clear { .. } => None,
        }
    }
}

/// Broadcast bus for [`QueryChange`] events
///
/// Backed by `tokio::sync::broadcast`:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged subscribers are told how many events they missed
///
/// # Examples
///
/// ```
/// use simq_common::events::{EventBus, QueryChange};
///
/// let bus = EventBus::new(100);
/// let mut rx = bus.subscribe();
///
/// bus.emit_lossy(QueryChange::Clear { timestamp: chrono::Utc::now() });
///
/// let event = rx.try_recv().unwrap();
/// assert_eq!(event.event_type(), "Clear");
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<QueryChange>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<QueryChange> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: QueryChange,
    ) -> Result<usize, broadcast::error::SendError<QueryChange>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: QueryChange) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
