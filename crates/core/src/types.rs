//! Core model types for docsync
//!
//! This module defines the identifiers shared by every layer:
//! - ResourcePath: slash-separated path, ordered segment by segment
//! - DocumentKey: path naming exactly one document (even segment count)
//! - User: identity owning a mutation queue
//! - BatchId / TargetId / ListenSequenceNumber: monotonically assigned ids
//! - SnapshotVersion: server read time of a cached document

use crate::error::{Error, Result};
use docsync_immutable::SortedSet;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a mutation batch, assigned by the mutation queue
pub type BatchId = i32;

/// Batch id meaning "before every batch"
pub const BATCH_ID_UNKNOWN: BatchId = -1;

/// Identifier of a watched query target
pub type TargetId = i32;

/// Stamp recording when a document or target was last used
pub type ListenSequenceNumber = i64;

/// Sequence number that no live document or target ever carries
pub const INVALID_SEQUENCE_NUMBER: ListenSequenceNumber = -1;

/// A path of non-empty segments
///
/// Ordering is segment-wise: `a/b` < `a/b/c` < `a/c`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct ResourcePath {
    segments: Vec<String>,
}

impl ResourcePath {
    /// The empty path
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a path from segments
    ///
    /// # Errors
    /// Returns `InvalidInput` if any segment is empty or contains `/`.
    pub fn from_segments<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if let Some(bad) = segments.iter().find(|s| s.is_empty() || s.contains('/')) {
            return Err(Error::InvalidInput(format!("invalid path segment {:?}", bad)));
        }
        Ok(Self { segments })
    }

    /// Parse a slash-separated path; empty segments are skipped
    pub fn parse(path: &str) -> Self {
        Self {
            segments: path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
        }
    }

    /// Number of segments
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// True for the root path
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// All segments
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Final segment, if any
    pub fn last_segment(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// A new path with `segment` appended
    pub fn append(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    /// A new path without the last segment
    pub fn pop_last(&self) -> Self {
        let end = self.segments.len().saturating_sub(1);
        Self {
            segments: self.segments[..end].to_vec(),
        }
    }

    /// True if every segment of `self` starts `other`
    pub fn is_prefix_of(&self, other: &ResourcePath) -> bool {
        other.segments.starts_with(&self.segments)
    }

    /// Slash-joined form, used as a stable storage key
    pub fn canonical_string(&self) -> String {
        self.segments.join("/")
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical_string())
    }
}

/// Key naming a single document: a collection path plus a document id
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentKey(ResourcePath);

impl DocumentKey {
    /// Wrap a path
    ///
    /// # Errors
    /// Returns `InvalidInput` if the path is empty or has an odd number of
    /// segments (that would name a collection).
    pub fn from_path(path: ResourcePath) -> Result<Self> {
        if path.is_empty() || path.len() % 2 != 0 {
            return Err(Error::InvalidInput(format!(
                "document keys need an even number of segments, got {:?}",
                path.canonical_string()
            )));
        }
        Ok(Self(path))
    }

    /// Parse a slash-separated document path
    pub fn parse(path: &str) -> Result<Self> {
        Self::from_path(ResourcePath::parse(path))
    }

    /// Sentinel that sorts before every real key, for range-scan bounds
    pub fn empty() -> Self {
        Self(ResourcePath::empty())
    }

    /// The full document path
    pub fn path(&self) -> &ResourcePath {
        &self.0
    }

    /// Path of the collection containing this document
    pub fn collection_path(&self) -> ResourcePath {
        self.0.pop_last()
    }

    /// Id of the collection containing this document
    pub fn collection_group(&self) -> &str {
        let segments = self.0.segments();
        &segments[segments.len() - 2]
    }

    /// True if the document lives directly in `collection`
    pub fn has_collection_path(&self, collection: &ResourcePath) -> bool {
        self.0.len() == collection.len() + 1 && collection.is_prefix_of(&self.0)
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ordered immutable set of document keys
pub type DocumentKeySet = SortedSet<DocumentKey>;

/// Identity a mutation queue belongs to
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum User {
    /// No signed-in user
    Unauthenticated,
    /// Signed-in user with a stable uid
    Authenticated(String),
}

impl User {
    /// Signed-in user
    pub fn new(uid: impl Into<String>) -> Self {
        User::Authenticated(uid.into())
    }

    /// Uid of an authenticated user
    pub fn uid(&self) -> Option<&str> {
        match self {
            User::Unauthenticated => None,
            User::Authenticated(uid) => Some(uid),
        }
    }

    /// True if the user is signed in
    pub fn is_authenticated(&self) -> bool {
        matches!(self, User::Authenticated(_))
    }
}

/// Server read time, in microseconds since the Unix epoch
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct SnapshotVersion(i64);

impl SnapshotVersion {
    /// Version of documents that were never read from the server
    pub const NONE: SnapshotVersion = SnapshotVersion(0);

    /// Create from microseconds
    pub fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    /// Microseconds since the epoch
    pub fn micros(&self) -> i64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_parse_skips_empty_segments() {
        let path = ResourcePath::parse("/rooms//eros/");
        assert_eq!(path.segments(), &["rooms".to_string(), "eros".to_string()]);
        assert_eq!(path.to_string(), "rooms/eros");
    }

    #[test]
    fn test_path_ordering_is_segment_wise() {
        let a = ResourcePath::parse("a/b");
        let ab = ResourcePath::parse("a/b/c");
        let c = ResourcePath::parse("a/c");
        let long = ResourcePath::parse("a/b-x");
        assert!(a < ab);
        assert!(ab < c);
        // Segment-wise, "a/b/c" still sorts before "a/b-x"
        assert!(ab < long);
    }

    #[test]
    fn test_path_prefix_and_pop() {
        let base = ResourcePath::parse("rooms/eros");
        let child = base.append("messages");
        assert!(base.is_prefix_of(&child));
        assert!(!child.is_prefix_of(&base));
        assert_eq!(child.pop_last(), base);
        assert_eq!(child.last_segment(), Some("messages"));
        assert_eq!(ResourcePath::empty().pop_last(), ResourcePath::empty());
    }

    #[test]
    fn test_from_segments_rejects_bad_segments() {
        assert!(ResourcePath::from_segments(["a", ""]).is_err());
        assert!(ResourcePath::from_segments(["a/b"]).is_err());
        assert!(ResourcePath::from_segments(["a", "b"]).is_ok());
    }

    #[test]
    fn test_document_key_requires_even_path() {
        assert!(DocumentKey::parse("rooms").is_err());
        assert!(DocumentKey::parse("").is_err());
        let key = DocumentKey::parse("rooms/eros/messages/1").unwrap();
        assert_eq!(key.collection_group(), "messages");
        assert_eq!(key.collection_path(), ResourcePath::parse("rooms/eros/messages"));
        assert!(key.has_collection_path(&ResourcePath::parse("rooms/eros/messages")));
        assert!(!key.has_collection_path(&ResourcePath::parse("rooms")));
    }

    #[test]
    fn test_user_uid() {
        assert_eq!(User::Unauthenticated.uid(), None);
        assert_eq!(User::new("alice").uid(), Some("alice"));
        assert!(User::new("alice").is_authenticated());
    }
}
