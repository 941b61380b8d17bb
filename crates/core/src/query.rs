//! Queries, reduced to the shape the persistence layer needs
//!
//! Filtering and ordering belong to the query engine. Here a query only
//! names the documents it could ever match: one document, the direct children
//! of one collection, or every collection sharing an id.

use crate::memoizer::ThreadSafeMemoizer;
use crate::types::{DocumentKey, ResourcePath};
use std::fmt;
use std::hash::{Hash, Hasher};

/// A query scoped to a path or collection group
#[derive(Clone)]
pub struct Query {
    path: ResourcePath,
    collection_group: Option<String>,
    canonical_id: ThreadSafeMemoizer<String>,
}

impl Query {
    /// Query at `path`: a document query if the path names a document,
    /// otherwise a query over the collection at `path`
    pub fn at_path(path: ResourcePath) -> Self {
        Self {
            path,
            collection_group: None,
            canonical_id: ThreadSafeMemoizer::new(),
        }
    }

    /// Query over every collection with id `collection_id`
    pub fn collection_group(collection_id: impl Into<String>) -> Self {
        Self {
            path: ResourcePath::empty(),
            collection_group: Some(collection_id.into()),
            canonical_id: ThreadSafeMemoizer::new(),
        }
    }

    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    /// Collection id of a collection-group query
    pub fn collection_group_id(&self) -> Option<&str> {
        self.collection_group.as_deref()
    }

    pub fn is_collection_group_query(&self) -> bool {
        self.collection_group.is_some()
    }

    /// True if the query names exactly one document
    pub fn is_document_query(&self) -> bool {
        self.collection_group.is_none() && !self.path.is_empty() && self.path.len() % 2 == 0
    }

    /// The same collection-group query restricted to one parent collection
    pub fn as_collection_query_at_path(&self, path: ResourcePath) -> Self {
        Self::at_path(path)
    }

    /// True if a document with `key` could belong to the result set
    pub fn matches_key(&self, key: &DocumentKey) -> bool {
        match &self.collection_group {
            Some(group) => key.collection_group() == group,
            None if self.is_document_query() => key.path() == &self.path,
            None => key.has_collection_path(&self.path),
        }
    }

    /// Stable string identifying this query, computed once
    pub fn canonical_id(&self) -> &str {
        self.canonical_id.memoize(|| match &self.collection_group {
            Some(group) => format!("{}|cg:{}", self.path, group),
            None => self.path.canonical_string(),
        })
    }
}

impl PartialEq for Query {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.collection_group == other.collection_group
    }
}

impl Eq for Query {}

impl Hash for Query {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
        self.collection_group.hash(state);
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Query({})", self.canonical_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(path: &str) -> DocumentKey {
        DocumentKey::parse(path).unwrap()
    }

    #[test]
    fn test_collection_query_matches_direct_children_only() {
        let query = Query::at_path(ResourcePath::parse("rooms"));
        assert!(!query.is_document_query());
        assert!(query.matches_key(&key("rooms/eros")));
        assert!(!query.matches_key(&key("rooms/eros/messages/1")));
        assert!(!query.matches_key(&key("other/eros")));
    }

    #[test]
    fn test_document_query() {
        let query = Query::at_path(ResourcePath::parse("rooms/eros"));
        assert!(query.is_document_query());
        assert!(query.matches_key(&key("rooms/eros")));
        assert!(!query.matches_key(&key("rooms/other")));
    }

    #[test]
    fn test_collection_group_query() {
        let query = Query::collection_group("messages");
        assert!(query.matches_key(&key("rooms/eros/messages/1")));
        assert!(query.matches_key(&key("messages/2")));
        assert!(!query.matches_key(&key("rooms/eros")));
        assert_eq!(query.canonical_id(), "|cg:messages");
    }

    #[test]
    fn test_canonical_id_is_stable() {
        let query = Query::at_path(ResourcePath::parse("rooms/eros/messages"));
        let first = query.canonical_id().as_ptr();
        assert_eq!(query.canonical_id(), "rooms/eros/messages");
        assert_eq!(query.canonical_id().as_ptr(), first);
    }
}
