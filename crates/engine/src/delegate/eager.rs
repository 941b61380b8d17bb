use super::ReferenceDelegate;
use crate::state::LocalState;
use docsync_core::{DocumentKey, ListenSequenceNumber, TargetId, INVALID_SEQUENCE_NUMBER};
use std::collections::BTreeSet;
use tracing::debug;

/// Deletes unreferenced documents at the end of each transaction
///
/// Keys whose references drop during a transaction are collected as orphan
/// candidates. On commit every candidate that nothing references any more
/// (no target, no queued batch, no local view) is removed from the cache.
#[derive(Debug, Default)]
pub struct EagerReferenceDelegate {
    orphaned: BTreeSet<DocumentKey>,
}

impl EagerReferenceDelegate {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReferenceDelegate for EagerReferenceDelegate {
    fn add_reference(&mut self, _state: &mut LocalState, key: &DocumentKey) {
        self.orphaned.remove(key);
    }

    fn remove_reference(&mut self, _state: &mut LocalState, key: &DocumentKey) {
        self.orphaned.insert(key.clone());
    }

    fn remove_mutation_reference(&mut self, _state: &mut LocalState, key: &DocumentKey) {
        self.orphaned.insert(key.clone());
    }

    fn update_limbo_document(&mut self, _state: &mut LocalState, key: &DocumentKey) {
        self.orphaned.insert(key.clone());
    }

    fn remove_target(&mut self, state: &mut LocalState, target_id: TargetId) {
        let keys = state.target_cache.remove_target(target_id);
        self.orphaned.extend(keys);
    }

    fn current_sequence_number(&self) -> ListenSequenceNumber {
        INVALID_SEQUENCE_NUMBER
    }

    fn on_transaction_started(&mut self, _state: &mut LocalState, _label: &str) {
        self.orphaned.clear();
    }

    fn on_transaction_committed(&mut self, state: &mut LocalState) {
        let candidates = std::mem::take(&mut self.orphaned);
        let mut removed = 0usize;
        for key in &candidates {
            if !state.is_referenced(key) && state.document_cache.remove(key) {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(
                target: "docsync::gc",
                candidates = candidates.len(),
                removed,
                "Removed orphaned documents"
            );
        }
    }

    fn name(&self) -> &'static str {
        "eager"
    }
}
