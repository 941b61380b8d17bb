//! Per-user queue of pending local writes
//!
//! Batches are kept in ascending id order. Ids are handed out by the queue
//! and never reused while the queue holds batches. A rejected batch can be
//! removed from the middle of the queue; surviving batches keep their ids.
//!
//! Which batches touch which documents is indexed as `(key, batch_id)`
//! references, so lookups by key or by collection are range scans.

use crate::sizer::Sizer;
use chrono::{DateTime, Utc};
use docsync_core::{
    BatchId, DocumentKey, DocumentKeySet, Error, Mutation, MutationBatch, Query, Result,
    BATCH_ID_UNKNOWN,
};
use docsync_storage::{Change, Changes, DocumentReferenceSet};
use std::collections::BTreeSet;

/// Ordered queue of mutation batches for one user
#[derive(Debug)]
pub struct MutationQueue {
    queue: Vec<MutationBatch>,
    next_batch_id: BatchId,
    last_stream_token: Vec<u8>,
    batches_by_key: DocumentReferenceSet,
    changes: Changes<BatchId>,
    metadata_dirty: bool,
}

impl Default for MutationQueue {
    fn default() -> Self {
        Self {
            queue: Vec::new(),
            next_batch_id: 1,
            last_stream_token: Vec::new(),
            batches_by_key: DocumentReferenceSet::new(),
            changes: Changes::default(),
            metadata_dirty: false,
        }
    }
}

impl MutationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepares the queue for use
    ///
    /// A queue outlives sign-out and sign-in of its user. When it holds no
    /// batches, ids restart at 1.
    pub fn start(&mut self) {
        if self.queue.is_empty() {
            self.next_batch_id = 1;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Appends a batch with a freshly allocated id
    pub fn add_batch(&mut self, local_write_time: DateTime<Utc>, mutations: Vec<Mutation>) -> MutationBatch {
        assert!(!mutations.is_empty(), "mutation batches must contain at least one mutation");
        let batch_id = self.next_batch_id;
        self.next_batch_id += 1;
        if let Some(last) = self.queue.last() {
            assert!(
                last.batch_id() < batch_id,
                "mutation batch ids must be strictly increasing ({} after {})",
                batch_id,
                last.batch_id()
            );
        }

        let batch = MutationBatch::new(batch_id, local_write_time, mutations);
        for mutation in batch.mutations() {
            self.batches_by_key.add_reference(mutation.key(), batch_id);
        }
        self.queue.push(batch.clone());
        self.changes.upsert(batch_id);
        batch
    }

    /// Records the acknowledgment of the head batch
    ///
    /// # Panics
    /// If the queue is empty or `batch_id` is not the head of the queue.
    pub fn acknowledge_batch(&mut self, batch_id: BatchId, stream_token: Vec<u8>) {
        let Some(head) = self.queue.first_mut() else {
            panic!("cannot acknowledge batch {} of an empty mutation queue", batch_id);
        };
        assert!(
            head.batch_id() == batch_id,
            "can only acknowledge the first batch in the mutation queue (head is {}, got {})",
            head.batch_id(),
            batch_id
        );
        head.set_stream_token(stream_token.clone());
        self.last_stream_token = stream_token;
        self.changes.upsert(batch_id);
        self.metadata_dirty = true;
    }

    /// Removes a batch, either the acknowledged head or a rejected batch
    /// anywhere in the queue. Returns the removed batch.
    ///
    /// # Panics
    /// If no batch with `batch_id` is queued.
    pub fn remove_batch(&mut self, batch_id: BatchId) -> MutationBatch {
        let Some(index) = self.index_of(batch_id) else {
            panic!("mutation batch {} is not in the queue", batch_id);
        };
        let batch = self.queue.remove(index);
        for mutation in batch.mutations() {
            self.batches_by_key.remove_reference(mutation.key(), batch_id);
        }
        self.changes.remove(batch_id);
        batch
    }

    fn index_of(&self, batch_id: BatchId) -> Option<usize> {
        self.queue
            .binary_search_by_key(&batch_id, MutationBatch::batch_id)
            .ok()
    }

    pub fn lookup(&self, batch_id: BatchId) -> Option<&MutationBatch> {
        self.index_of(batch_id).map(|i| &self.queue[i])
    }

    /// First batch with an id greater than `batch_id`
    ///
    /// Pass [`BATCH_ID_UNKNOWN`] to get the head.
    pub fn next_batch_after(&self, batch_id: BatchId) -> Option<&MutationBatch> {
        let start = self.queue.partition_point(|b| b.batch_id() <= batch_id);
        self.queue.get(start)
    }

    pub fn all_batches(&self) -> &[MutationBatch] {
        &self.queue
    }

    /// Id of the newest batch, or [`BATCH_ID_UNKNOWN`] if the queue is empty
    pub fn highest_unacknowledged_batch_id(&self) -> BatchId {
        if self.queue.is_empty() {
            BATCH_ID_UNKNOWN
        } else {
            self.next_batch_id - 1
        }
    }

    pub fn last_stream_token(&self) -> &[u8] {
        &self.last_stream_token
    }

    pub fn set_last_stream_token(&mut self, token: Vec<u8>) {
        self.last_stream_token = token;
        self.metadata_dirty = true;
    }

    /// True if any queued batch writes `key`
    pub fn contains_key(&self, key: &DocumentKey) -> bool {
        self.batches_by_key.contains_key(key)
    }

    pub fn batches_affecting_key(&self, key: &DocumentKey) -> Vec<&MutationBatch> {
        let ids: BTreeSet<BatchId> = self.batches_by_key.ids_for_key(key).into_iter().collect();
        self.batches_for_ids(ids)
    }

    pub fn batches_affecting_keys(&self, keys: &DocumentKeySet) -> Vec<&MutationBatch> {
        let ids: BTreeSet<BatchId> = keys
            .iter()
            .flat_map(|key| self.batches_by_key.ids_for_key(key))
            .collect();
        self.batches_for_ids(ids)
    }

    /// Batches that could affect the results of a document or collection query
    ///
    /// # Panics
    /// On collection-group queries; those are expanded per parent collection
    /// by the caller.
    pub fn batches_affecting_query(&self, query: &Query) -> Vec<&MutationBatch> {
        assert!(
            !query.is_collection_group_query(),
            "collection-group queries must be expanded before reaching the mutation queue"
        );
        let prefix = query.path();
        let start_path = if query.is_document_query() {
            prefix.clone()
        } else {
            prefix.append("")
        };
        let start = DocumentKey::from_path(start_path).unwrap_or_else(|_| DocumentKey::empty());

        let ids: BTreeSet<BatchId> = self
            .batches_by_key
            .iter_from_key(&start)
            .take_while(|(key, _)| prefix.is_prefix_of(key.path()))
            .filter(|(key, _)| query.matches_key(key))
            .map(|(_, id)| id)
            .collect();
        self.batches_for_ids(ids)
    }

    fn batches_for_ids(&self, ids: BTreeSet<BatchId>) -> Vec<&MutationBatch> {
        ids.into_iter().filter_map(|id| self.lookup(id)).collect()
    }

    /// Bytes the queued batches occupy according to `sizer`
    pub fn byte_size(&self, sizer: &dyn Sizer) -> usize {
        self.queue.iter().map(|b| sizer.batch_size(b)).sum()
    }

    /// Validates the queue's internal invariants
    ///
    /// Diagnostic only; the queue is left untouched either way.
    pub fn perform_consistency_check(&self) -> Result<()> {
        for pair in self.queue.windows(2) {
            if pair[0].batch_id() >= pair[1].batch_id() {
                return Err(Error::Consistency(format!(
                    "batch ids out of order: {} before {}",
                    pair[0].batch_id(),
                    pair[1].batch_id()
                )));
            }
        }
        if let Some(last) = self.queue.last() {
            if last.batch_id() >= self.next_batch_id {
                return Err(Error::Consistency(format!(
                    "next batch id {} does not exceed queued batch {}",
                    self.next_batch_id,
                    last.batch_id()
                )));
            }
        } else if !self.batches_by_key.is_empty() {
            return Err(Error::Consistency(format!(
                "empty queue still indexes {} document references",
                self.batches_by_key.len()
            )));
        }
        for (key, batch_id) in self.batches_by_key.iter() {
            let live = self
                .lookup(batch_id)
                .is_some_and(|b| b.keys().contains(key));
            if !live {
                return Err(Error::Consistency(format!(
                    "index entry ({}, {}) does not match a queued batch",
                    key, batch_id
                )));
            }
        }
        for batch in &self.queue {
            if let Some(key) = batch.keys().iter().find(|k| !self.batches_by_key.contains(k, batch.batch_id())) {
                return Err(Error::Consistency(format!(
                    "batch {} writes {} but is not indexed under it",
                    batch.batch_id(),
                    key
                )));
            }
        }
        Ok(())
    }

    /// Batches changed since the last call
    pub fn take_changes(&mut self) -> Vec<(BatchId, Change)> {
        self.changes.take()
    }

    /// True once if the stream token changed since the last call
    pub fn take_metadata_dirty(&mut self) -> bool {
        std::mem::take(&mut self.metadata_dirty)
    }

    /// Rebuilds a queue from persisted batches without recording changes
    pub(crate) fn restore(batches: Vec<MutationBatch>, last_stream_token: Vec<u8>) -> Self {
        let mut queue = Self {
            last_stream_token,
            ..Self::default()
        };
        for batch in batches {
            for mutation in batch.mutations() {
                queue.batches_by_key.add_reference(mutation.key(), batch.batch_id());
            }
            queue.next_batch_id = queue.next_batch_id.max(batch.batch_id() + 1);
            queue.queue.push(batch);
        }
        queue.queue.sort_by_key(MutationBatch::batch_id);
        queue
    }
}
