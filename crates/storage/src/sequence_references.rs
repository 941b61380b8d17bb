//! Last-touch sequence numbers for LRU collection
//!
//! [`ReferenceSet`] maps each sequence number to the documents last touched
//! at it, and each document to its last-touch number. Stamping a document
//! moves it between buckets. The collector walks buckets in ascending order
//! to find eviction candidates without storing a reference count per
//! document.

use crate::changes::Changes;
use docsync_core::{DocumentKey, DocumentKeySet, ListenSequenceNumber};
use docsync_immutable::SortedMap;
use rustc_hash::FxHashMap;

/// Sequence number ↔ document key index
#[derive(Debug, Default)]
pub struct ReferenceSet {
    by_sequence: SortedMap<ListenSequenceNumber, DocumentKeySet>,
    by_key: FxHashMap<DocumentKey, ListenSequenceNumber>,
    changes: Changes<DocumentKey>,
}

impl ReferenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Records that `key` was touched at `sequence_number`
    pub fn stamp(&mut self, key: &DocumentKey, sequence_number: ListenSequenceNumber) {
        if let Some(previous) = self.by_key.insert(key.clone(), sequence_number) {
            if previous == sequence_number {
                return;
            }
            self.detach(key, previous);
        }
        let bucket = self
            .by_sequence
            .get(&sequence_number)
            .cloned()
            .unwrap_or_default()
            .insert(key.clone());
        self.by_sequence = self.by_sequence.insert(sequence_number, bucket);
        self.changes.upsert(key.clone());
    }

    /// Forgets `key`, returning its last-touch number
    pub fn remove(&mut self, key: &DocumentKey) -> Option<ListenSequenceNumber> {
        let previous = self.by_key.remove(key)?;
        self.detach(key, previous);
        self.changes.remove(key.clone());
        Some(previous)
    }

    fn detach(&mut self, key: &DocumentKey, sequence_number: ListenSequenceNumber) {
        let Some(bucket) = self.by_sequence.get(&sequence_number) else {
            return;
        };
        let bucket = bucket.erase(key);
        self.by_sequence = if bucket.is_empty() {
            self.by_sequence.erase(&sequence_number)
        } else {
            self.by_sequence.insert(sequence_number, bucket)
        };
    }

    pub fn sequence_number(&self, key: &DocumentKey) -> Option<ListenSequenceNumber> {
        self.by_key.get(key).copied()
    }

    /// `(key, sequence number)` pairs in ascending sequence order
    pub fn iter(&self) -> impl Iterator<Item = (&DocumentKey, ListenSequenceNumber)> + '_ {
        self.by_sequence
            .iter()
            .flat_map(|(seq, keys)| keys.iter().map(move |k| (k, *seq)))
    }

    /// Keys whose last touch is at or below `upper_bound`, ascending
    pub fn keys_at_or_below(&self, upper_bound: ListenSequenceNumber) -> Vec<DocumentKey> {
        self.iter()
            .take_while(|(_, seq)| *seq <= upper_bound)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Highest sequence number stamped on any document
    pub fn highest_sequence_number(&self) -> Option<ListenSequenceNumber> {
        self.by_sequence.last().map(|(seq, _)| *seq)
    }

    /// Stamps changed since the last call
    pub fn take_changes(&mut self) -> Vec<(DocumentKey, crate::changes::Change)> {
        self.changes.take()
    }
}
