//! Dirty tracking for durable persistence
//!
//! Caches record which entries changed since the last commit. The durable
//! persistence facade drains these sets when a transaction commits and turns
//! them into one atomic backend write.

use std::collections::BTreeMap;

/// What happened to an entry since the last drain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// Entry was added or replaced; persist its current state
    Upsert,
    /// Entry was removed; delete its record
    Remove,
}

/// Set of keys changed since the last [`take`](Changes::take)
///
/// Only the final change per key is kept.
#[derive(Debug, Clone)]
pub struct Changes<K: Ord> {
    entries: BTreeMap<K, Change>,
}

impl<K: Ord> Default for Changes<K> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<K: Ord> Changes<K> {
    pub fn upsert(&mut self, key: K) {
        self.entries.insert(key, Change::Upsert);
    }

    pub fn remove(&mut self, key: K) {
        self.entries.insert(key, Change::Remove);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Drains the recorded changes in key order
    pub fn take(&mut self) -> Vec<(K, Change)> {
        std::mem::take(&mut self.entries).into_iter().collect()
    }
}
