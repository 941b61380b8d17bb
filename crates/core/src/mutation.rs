//! Local writes and the batches they are grouped into
//!
//! A [`MutationBatch`] is created by the mutation queue when the user writes.
//! Its mutations never change afterwards; the only field that is ever updated
//! is the stream token recorded when the backend acknowledges the batch.

use crate::document::Document;
use crate::memoizer::ThreadSafeMemoizer;
use crate::types::{BatchId, DocumentKey, DocumentKeySet, SnapshotVersion};
use crate::value::{delete_field, get_field, set_field, FieldPath, ObjectValue};
use chrono::{DateTime, Utc};

/// A single write to one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Replace the whole document
    Set { key: DocumentKey, value: ObjectValue },
    /// Update the fields named in `mask`; masked fields absent from `value`
    /// are deleted. Only applies to documents that exist.
    Patch {
        key: DocumentKey,
        value: ObjectValue,
        mask: Vec<FieldPath>,
    },
    /// Delete the document
    Delete { key: DocumentKey },
}

impl Mutation {
    /// The document this mutation writes
    pub fn key(&self) -> &DocumentKey {
        match self {
            Mutation::Set { key, .. } | Mutation::Patch { key, .. } | Mutation::Delete { key } => {
                key
            }
        }
    }

    /// Applies the mutation to the locally visible state of its document
    ///
    /// `existing` is the current local view (cached document overlaid with
    /// earlier batches). Returns the new local view.
    pub fn apply_to_local_view(&self, existing: Option<Document>) -> Option<Document> {
        match self {
            Mutation::Set { key, value } => {
                let version = existing.map_or(SnapshotVersion::NONE, |d| d.version());
                Some(Document::found(key.clone(), version, value.clone()).with_local_mutations())
            }
            Mutation::Patch { key, value, mask } => {
                let doc = existing?;
                let Some(data) = doc.data() else {
                    return Some(doc);
                };
                let patched = mask.iter().fold(data.clone(), |acc, path| {
                    match get_field(value, path) {
                        Some(v) => set_field(&acc, path.segments(), v.clone()),
                        None => delete_field(&acc, path.segments()),
                    }
                });
                Some(Document::found(key.clone(), doc.version(), patched).with_local_mutations())
            }
            Mutation::Delete { key } => Some(Document::deleted(key.clone(), SnapshotVersion::NONE)),
        }
    }
}

/// An ordered group of mutations written together
#[derive(Debug, Clone)]
pub struct MutationBatch {
    batch_id: BatchId,
    local_write_time: DateTime<Utc>,
    mutations: Vec<Mutation>,
    stream_token: Option<Vec<u8>>,
    keys: ThreadSafeMemoizer<DocumentKeySet>,
}

impl MutationBatch {
    pub fn new(batch_id: BatchId, local_write_time: DateTime<Utc>, mutations: Vec<Mutation>) -> Self {
        Self {
            batch_id,
            local_write_time,
            mutations,
            stream_token: None,
            keys: ThreadSafeMemoizer::new(),
        }
    }

    pub fn batch_id(&self) -> BatchId {
        self.batch_id
    }

    pub fn local_write_time(&self) -> DateTime<Utc> {
        self.local_write_time
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    /// Token the backend returned when it acknowledged this batch
    pub fn stream_token(&self) -> Option<&[u8]> {
        self.stream_token.as_deref()
    }

    /// Records the acknowledgment token
    pub fn set_stream_token(&mut self, token: Vec<u8>) {
        self.stream_token = Some(token);
    }

    /// Every key written by this batch
    pub fn keys(&self) -> &DocumentKeySet {
        self.keys.memoize(|| {
            self.mutations
                .iter()
                .map(|m| m.key().clone())
                .collect()
        })
    }

    /// Applies every mutation of this batch that targets `key`
    pub fn apply_to_local_view(&self, key: &DocumentKey, existing: Option<Document>) -> Option<Document> {
        self.mutations
            .iter()
            .filter(|m| m.key() == key)
            .fold(existing, |doc, m| m.apply_to_local_view(doc))
    }
}

impl PartialEq for MutationBatch {
    fn eq(&self, other: &Self) -> bool {
        self.batch_id == other.batch_id
            && self.local_write_time == other.local_write_time
            && self.mutations == other.mutations
            && self.stream_token == other.stream_token
    }
}

impl Eq for MutationBatch {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::FieldValue;

    fn key(path: &str) -> DocumentKey {
        DocumentKey::parse(path).unwrap()
    }

    #[test]
    fn test_batch_keys_are_deduplicated() {
        let batch = MutationBatch::new(
            1,
            Utc::now(),
            vec![
                Mutation::Delete { key: key("rooms/b") },
                Mutation::Set {
                    key: key("rooms/a"),
                    value: ObjectValue::new(),
                },
                Mutation::Delete { key: key("rooms/a") },
            ],
        );
        let keys: Vec<String> = batch.keys().iter().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["rooms/a", "rooms/b"]);
    }

    #[test]
    fn test_patch_requires_existing_document() {
        let patch = Mutation::Patch {
            key: key("rooms/a"),
            value: FieldValue::object([("n", FieldValue::from(1i64))]),
            mask: vec![FieldPath::parse("n")],
        };
        assert!(patch.apply_to_local_view(None).is_none());

        let tombstone = Document::deleted(key("rooms/a"), SnapshotVersion::from_micros(5));
        let result = patch.apply_to_local_view(Some(tombstone.clone()));
        assert_eq!(result, Some(tombstone));
    }

    #[test]
    fn test_patch_sets_and_deletes_masked_fields() {
        let base = Document::found(
            key("rooms/a"),
            SnapshotVersion::from_micros(7),
            FieldValue::object([("keep", FieldValue::from(true)), ("drop", FieldValue::from(2i64))]),
        );
        let patch = Mutation::Patch {
            key: key("rooms/a"),
            value: FieldValue::object([("added", FieldValue::from("x"))]),
            mask: vec![FieldPath::parse("added"), FieldPath::parse("drop")],
        };
        let doc = patch.apply_to_local_view(Some(base)).unwrap();
        let data = doc.data().unwrap();
        assert_eq!(doc.version(), SnapshotVersion::from_micros(7));
        assert!(doc.has_local_mutations());
        assert!(data.contains_key(&"keep".to_string()));
        assert!(data.contains_key(&"added".to_string()));
        assert!(!data.contains_key(&"drop".to_string()));
    }

    #[test]
    fn test_batch_applies_only_its_key() {
        let batch = MutationBatch::new(
            3,
            Utc::now(),
            vec![
                Mutation::Set {
                    key: key("rooms/a"),
                    value: FieldValue::object([("v", FieldValue::from(1i64))]),
                },
                Mutation::Delete { key: key("rooms/b") },
            ],
        );
        let a = batch.apply_to_local_view(&key("rooms/a"), None).unwrap();
        assert!(a.is_found_document());
        let c = batch.apply_to_local_view(&key("rooms/c"), None);
        assert!(c.is_none());
    }
}
