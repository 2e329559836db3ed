//! Available retrievers and the current selection

use serde::Serialize;

/// Retriever list reported by the far end plus the user's pick
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetrieverState {
    /// Sorted by name
    pub retrievers: Vec<String>,
    pub selected: Option<String>,
}

impl RetrieverState {
    /// Replace the list; a selection still offered survives, otherwise the first
    /// entry is selected
    pub fn update(&mut self, mut retrievers: Vec<String>) {
        retrievers.sort();
        retrievers.dedup();
        let keep = self
            .selected
            .as_ref()
            .is_some_and(|selected| retrievers.contains(selected));
        if !keep {
            self.selected = retrievers.first().cloned();
        }
        self.retrievers = retrievers;
    }

    /// Select an offered retriever; false if not offered
    pub fn select(&mut self, name: &str) -> bool {
        if !self.retrievers.iter().any(|r| r == name) {
            return false;
        }
        self.selected = Some(name.to_string());
        true
    }
}
