//! Collection-parent index
//!
//! Maps a collection id to every parent path that has a collection with that
//! id, so collection-group queries can fan out into per-collection queries.

use crate::changes::{Change, Changes};
use docsync_core::ResourcePath;
use docsync_immutable::SortedSet;
use rustc_hash::FxHashMap;

/// Index of collection parents by collection id
#[derive(Debug, Default)]
pub struct IndexManager {
    parents: FxHashMap<String, SortedSet<ResourcePath>>,
    changes: Changes<(String, ResourcePath)>,
}

impl IndexManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the parent of `collection_path`. Returns true if the entry is new.
    ///
    /// # Panics
    /// If `collection_path` is empty or names a document.
    pub fn add_to_collection_parent_index(&mut self, collection_path: &ResourcePath) -> bool {
        assert!(
            collection_path.len() % 2 == 1,
            "expected a collection path, got {:?}",
            collection_path.canonical_string()
        );
        let Some(collection_id) = collection_path.last_segment() else {
            return false;
        };
        let parent = collection_path.pop_last();
        let existing = self.parents.entry(collection_id.to_owned()).or_default();
        if existing.contains(&parent) {
            return false;
        }
        *existing = existing.insert(parent.clone());
        self.changes.upsert((collection_id.to_owned(), parent));
        true
    }

    /// Parent paths of every collection with id `collection_id`, in order
    pub fn collection_parents(&self, collection_id: &str) -> Vec<ResourcePath> {
        self.parents
            .get(collection_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn take_changes(&mut self) -> Vec<((String, ResourcePath), Change)> {
        self.changes.take()
    }

    /// Installs a recovered entry without recording a change
    pub fn restore(&mut self, collection_id: String, parent: ResourcePath) {
        let existing = self.parents.entry(collection_id).or_default();
        *existing = existing.insert(parent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parents_are_recorded_once() {
        let mut index = IndexManager::new();
        assert!(index.add_to_collection_parent_index(&ResourcePath::parse("rooms/a/messages")));
        assert!(!index.add_to_collection_parent_index(&ResourcePath::parse("rooms/a/messages")));
        assert!(index.add_to_collection_parent_index(&ResourcePath::parse("messages")));
        assert_eq!(
            index.collection_parents("messages"),
            vec![ResourcePath::empty(), ResourcePath::parse("rooms/a")]
        );
        assert!(index.collection_parents("users").is_empty());
        assert_eq!(index.take_changes().len(), 2);
    }

    #[test]
    #[should_panic(expected = "expected a collection path")]
    fn test_document_path_panics() {
        IndexManager::new().add_to_collection_parent_index(&ResourcePath::parse("rooms/a"));
    }
}
