//! Remote document cache
//!
//! Documents live in a persistent sorted map, so [`DocumentCache::snapshot`]
//! is an `Arc` bump and readers can keep a snapshot while the cache moves on.

use crate::changes::{Change, Changes};
use docsync_core::{Document, DocumentKey, DocumentKeySet, Query};
use docsync_immutable::SortedMap;

/// Immutable map of every cached document
pub type DocumentMap = SortedMap<DocumentKey, Document>;

/// Cached documents keyed by document key
#[derive(Debug, Default)]
pub struct DocumentCache {
    docs: DocumentMap,
    changes: Changes<DocumentKey>,
}

impl DocumentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a document
    pub fn add(&mut self, document: Document) {
        let key = document.key().clone();
        self.docs = self.docs.insert(key.clone(), document);
        self.changes.upsert(key);
    }

    /// Removes a document. Returns true if it was cached.
    pub fn remove(&mut self, key: &DocumentKey) -> bool {
        if !self.docs.contains_key(key) {
            return false;
        }
        self.docs = self.docs.erase(key);
        self.changes.remove(key.clone());
        true
    }

    pub fn get(&self, key: &DocumentKey) -> Option<Document> {
        self.docs.get(key).cloned()
    }

    pub fn contains_key(&self, key: &DocumentKey) -> bool {
        self.docs.contains_key(key)
    }

    /// Cached documents for `keys`; missing keys are omitted
    pub fn get_all(&self, keys: &DocumentKeySet) -> DocumentMap {
        keys.iter()
            .filter_map(|k| self.docs.get(k).map(|d| (k.clone(), d.clone())))
            .collect()
    }

    /// Cached documents the query could match
    pub fn documents_matching(&self, query: &Query) -> DocumentMap {
        if query.is_document_query() {
            return match DocumentKey::from_path(query.path().clone()) {
                Ok(key) => self.get_all(&DocumentKeySet::new().insert(key)),
                Err(_) => DocumentMap::new(),
            };
        }
        if query.is_collection_group_query() {
            return self
                .docs
                .iter()
                .filter(|(k, _)| query.matches_key(k))
                .map(|(k, d)| (k.clone(), d.clone()))
                .collect();
        }

        // Keys of one collection are contiguous; children sort right after
        // the collection path itself.
        let start = match DocumentKey::from_path(query.path().append("")) {
            Ok(key) => key,
            Err(_) => DocumentKey::empty(),
        };
        let prefix = query.path();
        self.docs
            .iter_from(&start)
            .take_while(|(k, _)| prefix.is_prefix_of(k.path()))
            .filter(|(k, _)| query.matches_key(k))
            .map(|(k, d)| (k.clone(), d.clone()))
            .collect()
    }

    /// The whole cache as of now
    pub fn snapshot(&self) -> DocumentMap {
        self.docs.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DocumentKey, &Document)> + '_ {
        self.docs.iter()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Documents changed since the last call
    pub fn take_changes(&mut self) -> Vec<(DocumentKey, Change)> {
        self.changes.take()
    }

    /// Installs a recovered document without recording a change
    pub fn restore(&mut self, document: Document) {
        self.docs = self.docs.insert(document.key().clone(), document);
    }
}
