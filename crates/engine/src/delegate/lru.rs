use super::ReferenceDelegate;
use crate::sizer::Sizer;
use crate::state::LocalState;
use docsync_core::{DocumentKey, ListenSequenceNumber, TargetId, INVALID_SEQUENCE_NUMBER};
use docsync_storage::{Change, ReferenceSet};
use rustc_hash::FxHashSet;
use std::collections::BTreeSet;
use std::fmt;

/// Stamps touched documents and leaves removal to the garbage collector
///
/// Each transaction takes the next listen sequence number. Any reference
/// change stamps the document with it; removed targets are re-stamped and
/// kept. A collection pass later deletes whatever was last touched at or
/// below its threshold and is not pinned.
pub struct LruReferenceDelegate {
    stamps: ReferenceSet,
    current_sequence_number: ListenSequenceNumber,
    sizer: Box<dyn Sizer>,
}

impl LruReferenceDelegate {
    pub fn new(sizer: Box<dyn Sizer>) -> Self {
        Self {
            stamps: ReferenceSet::new(),
            current_sequence_number: INVALID_SEQUENCE_NUMBER,
            sizer,
        }
    }

    /// Last-touch stamps by sequence number
    pub fn stamps(&self) -> &ReferenceSet {
        &self.stamps
    }

    fn stamp(&mut self, key: &DocumentKey) {
        let sequence_number = self.current_sequence_number();
        self.stamps.stamp(key, sequence_number);
    }

    /// Number of sequence numbers a collection pass can choose from: one
    /// per target and one per stamped document
    pub fn sequence_number_count(&self, state: &LocalState) -> usize {
        state.target_cache.len() + self.stamps.len()
    }

    /// Calls `f` with the sequence number of every target and stamped document
    pub fn for_each_sequence_number(&self, state: &LocalState, mut f: impl FnMut(ListenSequenceNumber)) {
        for target in state.target_cache.iter() {
            f(target.sequence_number);
        }
        for (_, sequence_number) in self.stamps.iter() {
            f(sequence_number);
        }
    }

    /// Removes inactive targets last used at or below `upper_bound`
    pub fn remove_targets(
        &mut self,
        state: &mut LocalState,
        upper_bound: ListenSequenceNumber,
        live_targets: &FxHashSet<TargetId>,
    ) -> usize {
        state.target_cache.remove_targets(upper_bound, live_targets)
    }

    /// Removes every document that is neither referenced nor touched after
    /// `upper_bound`. Returns the number of cached documents removed.
    pub fn remove_orphaned_documents(&mut self, state: &mut LocalState, upper_bound: ListenSequenceNumber) -> usize {
        let candidates: BTreeSet<DocumentKey> = state
            .document_cache
            .iter()
            .map(|(key, _)| key.clone())
            .chain(self.stamps.keys_at_or_below(upper_bound))
            .collect();

        let mut removed = 0;
        for key in candidates {
            if self.is_pinned(state, &key, upper_bound) {
                continue;
            }
            if state.document_cache.remove(&key) {
                removed += 1;
            }
            self.stamps.remove(&key);
        }
        removed
    }

    fn is_pinned(&self, state: &LocalState, key: &DocumentKey, upper_bound: ListenSequenceNumber) -> bool {
        state.is_referenced(key)
            || self
                .stamps
                .sequence_number(key)
                .is_some_and(|seq| seq > upper_bound)
    }

    /// Bytes held by cached documents, targets and queued batches
    pub fn byte_size(&self, state: &LocalState) -> usize {
        let sizer = self.sizer.as_ref();
        let documents: usize = state
            .document_cache
            .iter()
            .map(|(_, doc)| sizer.document_size(doc))
            .sum();
        let targets: usize = state.target_cache.iter().map(|t| sizer.target_size(t)).sum();
        let batches: usize = state.mutation_queues.values().map(|q| q.byte_size(sizer)).sum();
        documents + targets + batches
    }
}

impl ReferenceDelegate for LruReferenceDelegate {
    fn add_reference(&mut self, _state: &mut LocalState, key: &DocumentKey) {
        self.stamp(key);
    }

    fn remove_reference(&mut self, _state: &mut LocalState, key: &DocumentKey) {
        self.stamp(key);
    }

    fn remove_mutation_reference(&mut self, _state: &mut LocalState, key: &DocumentKey) {
        self.stamp(key);
    }

    fn update_limbo_document(&mut self, _state: &mut LocalState, key: &DocumentKey) {
        self.stamp(key);
    }

    fn remove_target(&mut self, state: &mut LocalState, target_id: TargetId) {
        let sequence_number = self.current_sequence_number();
        if let Some(target) = state.target_cache.target_by_id(target_id) {
            let updated = target.with_sequence_number(sequence_number);
            state.target_cache.update_target(updated);
        }
    }

    /// # Panics
    /// Outside of a transaction.
    fn current_sequence_number(&self) -> ListenSequenceNumber {
        assert!(
            self.current_sequence_number != INVALID_SEQUENCE_NUMBER,
            "sequence number requested outside of a transaction"
        );
        self.current_sequence_number
    }

    fn on_transaction_started(&mut self, state: &mut LocalState, _label: &str) {
        self.current_sequence_number = state.listen_sequence.next();
    }

    fn on_transaction_committed(&mut self, _state: &mut LocalState) {
        self.current_sequence_number = INVALID_SEQUENCE_NUMBER;
    }

    fn name(&self) -> &'static str {
        "lru"
    }

    fn as_lru(&mut self) -> Option<&mut LruReferenceDelegate> {
        Some(self)
    }

    fn take_stamp_changes(&mut self) -> Vec<(DocumentKey, Change, ListenSequenceNumber)> {
        self.stamps
            .take_changes()
            .into_iter()
            .map(|(key, change)| {
                let seq = self.stamps.sequence_number(&key).unwrap_or(INVALID_SEQUENCE_NUMBER);
                (key, change, seq)
            })
            .collect()
    }

    fn restore_stamp(&mut self, key: &DocumentKey, sequence_number: ListenSequenceNumber) {
        self.stamps.stamp(key, sequence_number);
        // Recovered stamps are already persisted
        self.stamps.take_changes();
    }
}

impl fmt::Debug for LruReferenceDelegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LruReferenceDelegate")
            .field("stamped", &self.stamps.len())
            .field("current_sequence_number", &self.current_sequence_number)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sizer::EncodedSizer;
    use docsync_core::{Document, ObjectValue, SnapshotVersion};

    fn key(path: &str) -> DocumentKey {
        DocumentKey::parse(path).unwrap()
    }

    fn touch(delegate: &mut LruReferenceDelegate, state: &mut LocalState, path: &str) {
        delegate.on_transaction_started(state, "touch");
        state
            .document_cache
            .add(Document::found(key(path), SnapshotVersion::NONE, ObjectValue::new()));
        delegate.add_reference(state, &key(path));
        delegate.remove_reference(state, &key(path));
        delegate.on_transaction_committed(state);
    }

    #[test]
    fn test_each_transaction_gets_next_sequence_number() {
        let mut state = LocalState::new();
        let mut delegate = LruReferenceDelegate::new(Box::new(EncodedSizer));
        touch(&mut delegate, &mut state, "rooms/a");
        touch(&mut delegate, &mut state, "rooms/b");
        assert_eq!(delegate.stamps().sequence_number(&key("rooms/a")), Some(1));
        assert_eq!(delegate.stamps().sequence_number(&key("rooms/b")), Some(2));
        assert_eq!(delegate.sequence_number_count(&state), 2);
    }

    #[test]
    fn test_documents_survive_until_collected() {
        let mut state = LocalState::new();
        let mut delegate = LruReferenceDelegate::new(Box::new(EncodedSizer));
        touch(&mut delegate, &mut state, "rooms/a");
        touch(&mut delegate, &mut state, "rooms/b");
        assert_eq!(state.document_cache.len(), 2);

        assert_eq!(delegate.remove_orphaned_documents(&mut state, 1), 1);
        assert!(!state.document_cache.contains_key(&key("rooms/a")));
        assert!(state.document_cache.contains_key(&key("rooms/b")));
        assert_eq!(delegate.stamps().len(), 1);
    }

    #[test]
    #[should_panic(expected = "outside of a transaction")]
    fn test_sequence_number_outside_transaction_panics() {
        LruReferenceDelegate::new(Box::new(EncodedSizer)).current_sequence_number();
    }
}
