//! Query history
//!
//! Sessions that produced results are handed to a [`History`] as snapshots when
//! they end. [`InMemoryHistory`] keeps the most recent entries, newest first.

use crate::results::ResultsSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock};
use tracing::debug;
use uuid::Uuid;

/// Default number of sessions kept by [`InMemoryHistory`]
pub const DEFAULT_HISTORY_SIZE: usize = 50;

/// Sink for finished sessions
pub trait History: Send + Sync {
    fn append(&self, snapshot: ResultsSnapshot);
}

/// One finished session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub snapshot: ResultsSnapshot,
}

/// Bounded in-process history
#[derive(Debug)]
pub struct InMemoryHistory {
    capacity: usize,
    entries: RwLock<Vec<HistoryEntry>>,
}

impl InMemoryHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Entries, most recent first
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn latest(&self) -> Option<HistoryEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .first()
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for InMemoryHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE)
    }
}

impl History for InMemoryHistory {
    fn append(&self, snapshot: ResultsSnapshot) {
        let entry = HistoryEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            snapshot,
        };
        debug!(
            entry_id = %entry.id,
            query_id = %entry.snapshot.query_id,
            segments = entry.snapshot.segments.len(),
            "Appending session to history"
        );
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(0, entry);
        entries.truncate(self.capacity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(query_id: &str) -> ResultsSnapshot {
        ResultsSnapshot::from_json(&format!(r#"{{"queryId":"{query_id}"}}"#)).unwrap()
    }

    #[test]
    fn test_newest_first() {
        let history = InMemoryHistory::new(10);
        history.append(snapshot("q1"));
        history.append(snapshot("q2"));

        let ids: Vec<String> = history
            .entries()
            .into_iter()
            .map(|entry| entry.snapshot.query_id)
            .collect();
        assert_eq!(ids, vec!["q2", "q1"]);
        assert_eq!(history.latest().map(|e| e.snapshot.query_id), Some("q2".to_string()));
    }

    #[test]
    fn test_bounded() {
        let history = InMemoryHistory::new(2);
        for id in ["q1", "q2", "q3"] {
            history.append(snapshot(id));
        }
        assert_eq!(history.len(), 2);
        assert_eq!(history.entries()[1].snapshot.query_id, "q2");
    }

    #[test]
    fn test_empty() {
        let history = InMemoryHistory::default();
        assert!(history.is_empty());
        assert!(history.latest().is_none());
        assert_eq!(history.capacity(), DEFAULT_HISTORY_SIZE);
    }
}
