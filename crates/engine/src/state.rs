//! Everything a persistence instance owns
//!
//! The reference delegate and the garbage collector never hold on to this
//! state; the transaction hands them a `&mut LocalState` for each call.

use crate::listen_sequence::ListenSequence;
use crate::mutation_queue::MutationQueue;
use docsync_core::{DocumentKey, User};
use docsync_storage::{DocumentCache, DocumentReferenceSet, GlobalsCache, IndexManager, TargetCache};
use std::collections::BTreeMap;

/// Caches, queues and counters guarded by the transaction lock
#[derive(Debug, Default)]
pub struct LocalState {
    pub(crate) document_cache: DocumentCache,
    pub(crate) target_cache: TargetCache,
    pub(crate) index_manager: IndexManager,
    pub(crate) globals_cache: GlobalsCache,
    pub(crate) mutation_queues: BTreeMap<User, MutationQueue>,
    /// Documents pinned by local views, keyed by view (target) id
    pub(crate) local_view_references: DocumentReferenceSet,
    pub(crate) listen_sequence: ListenSequence,
}

impl LocalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The queue of `user`, created and started on first use
    pub(crate) fn mutation_queue(&mut self, user: &User) -> &mut MutationQueue {
        self.mutation_queues.entry(user.clone()).or_insert_with(|| {
            let mut queue = MutationQueue::new();
            queue.start();
            queue
        })
    }

    /// True if any user's queue has a batch writing `key`
    pub fn mutation_queues_contain_key(&self, key: &DocumentKey) -> bool {
        self.mutation_queues.values().any(|q| q.contains_key(key))
    }

    /// True if a target, a pending write or a local view still needs `key`
    pub fn is_referenced(&self, key: &DocumentKey) -> bool {
        self.target_cache.contains_key(key)
            || self.mutation_queues_contain_key(key)
            || self.local_view_references.contains_key(key)
    }
}
