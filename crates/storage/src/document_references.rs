//! Document references keyed by an integer id
//!
//! A [`DocumentReferenceSet`] stores `(key, id)` pairs twice, once ordered by
//! key and once by id, so that both "is this key referenced by anything" and
//! "which keys does this id reference" are range scans. Ids are target ids
//! (target ↔ matching documents), batch ids (mutation queue index) or view
//! ids (local-view references).

use docsync_core::{DocumentKey, DocumentKeySet};
use docsync_immutable::SortedSet;

/// Bidirectional index of `(document key, id)` references
#[derive(Debug, Clone, Default)]
pub struct DocumentReferenceSet {
    by_key: SortedSet<(DocumentKey, i32)>,
    by_id: SortedSet<(i32, DocumentKey)>,
}

impl DocumentReferenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn add_reference(&mut self, key: &DocumentKey, id: i32) {
        self.by_key = self.by_key.insert((key.clone(), id));
        self.by_id = self.by_id.insert((id, key.clone()));
    }

    pub fn add_references(&mut self, keys: &DocumentKeySet, id: i32) {
        for key in keys {
            self.add_reference(key, id);
        }
    }

    pub fn remove_reference(&mut self, key: &DocumentKey, id: i32) {
        self.by_key = self.by_key.erase(&(key.clone(), id));
        self.by_id = self.by_id.erase(&(id, key.clone()));
    }

    pub fn remove_references(&mut self, keys: &DocumentKeySet, id: i32) {
        for key in keys {
            self.remove_reference(key, id);
        }
    }

    /// Removes every reference held by `id`, returning the keys it held
    pub fn remove_references_for_id(&mut self, id: i32) -> Vec<DocumentKey> {
        let keys: Vec<DocumentKey> = self.references_for_id(id).iter().cloned().collect();
        for key in &keys {
            self.remove_reference(key, id);
        }
        keys
    }

    /// Keys referenced by `id`
    pub fn references_for_id(&self, id: i32) -> DocumentKeySet {
        self.by_id
            .iter_from(&(id, DocumentKey::empty()))
            .take_while(|(ref_id, _)| *ref_id == id)
            .map(|(_, key)| key.clone())
            .collect()
    }

    /// Ids referencing `key`
    pub fn ids_for_key(&self, key: &DocumentKey) -> Vec<i32> {
        self.by_key
            .iter_from(&(key.clone(), i32::MIN))
            .take_while(|(ref_key, _)| ref_key == key)
            .map(|(_, id)| *id)
            .collect()
    }

    /// All references in key order
    pub fn iter(&self) -> impl Iterator<Item = (&DocumentKey, i32)> + '_ {
        self.by_key.iter().map(|(key, id)| (key, *id))
    }

    /// References in key order, starting at the first key not below `key`
    pub fn iter_from_key(&self, key: &DocumentKey) -> impl Iterator<Item = (&DocumentKey, i32)> + '_ {
        self.by_key
            .iter_from(&(key.clone(), i32::MIN))
            .map(|(key, id)| (key, *id))
    }

    pub fn contains_key(&self, key: &DocumentKey) -> bool {
        self.by_key
            .iter_from(&(key.clone(), i32::MIN))
            .next()
            .is_some_and(|(ref_key, _)| ref_key == key)
    }

    pub fn contains(&self, key: &DocumentKey, id: i32) -> bool {
        self.by_key.contains(&(key.clone(), id))
    }
}
