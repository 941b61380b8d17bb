//! Cached documents

use crate::types::{DocumentKey, SnapshotVersion};
use crate::value::ObjectValue;

/// A document as known to the local cache
///
/// A document either exists (`data` is `Some`) or is a tombstone recording
/// that the key was deleted as of `version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    key: DocumentKey,
    version: SnapshotVersion,
    data: Option<ObjectValue>,
    has_local_mutations: bool,
}

impl Document {
    /// An existing document
    pub fn found(key: DocumentKey, version: SnapshotVersion, data: ObjectValue) -> Self {
        Self {
            key,
            version,
            data: Some(data),
            has_local_mutations: false,
        }
    }

    /// A tombstone for a deleted document
    pub fn deleted(key: DocumentKey, version: SnapshotVersion) -> Self {
        Self {
            key,
            version,
            data: None,
            has_local_mutations: false,
        }
    }

    /// Mark the document as reflecting unacknowledged local writes
    pub fn with_local_mutations(mut self) -> Self {
        self.has_local_mutations = true;
        self
    }

    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    pub fn version(&self) -> SnapshotVersion {
        self.version
    }

    /// Field data, `None` for tombstones
    pub fn data(&self) -> Option<&ObjectValue> {
        self.data.as_ref()
    }

    pub fn is_found_document(&self) -> bool {
        self.data.is_some()
    }

    pub fn has_local_mutations(&self) -> bool {
        self.has_local_mutations
    }
}
