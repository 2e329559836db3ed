//! Arena registry keyed by string id
//!
//! Entities live in a `Vec` in first-reference order; a side index maps ids to
//! slots. The first reference creates the entity, later references reuse it.

use std::collections::HashMap;

/// Owning id → entity registry with stable indices
#[derive(Debug, Clone)]
pub struct Registry<T> {
    entries: Vec<T>,
    index: HashMap<String, usize>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot of `id`, creating the entity with `create` on first reference
    ///
    /// Returns the slot and whether the entity was created by this call.
    pub fn get_or_insert_with(&mut self, id: &str, create: impl FnOnce(usize) -> T) -> (usize, bool) {
        if let Some(&slot) = self.index.get(id) {
            return (slot, false);
        }
        let slot = self.entries.len();
        self.entries.push(create(slot));
        self.index.insert(id.to_string(), slot);
        (slot, true)
    }

    pub fn slot(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.slot(id).map(|slot| &self.entries[slot])
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut T> {
        let slot = self.slot(id)?;
        Some(&mut self.entries[slot])
    }

    pub fn at(&self, slot: usize) -> &T {
        &self.entries[slot]
    }

    pub fn at_mut(&mut self, slot: usize) -> &mut T {
        &mut self.entries[slot]
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.entries.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
