//! Rebuilds local state from backend tables
//!
//! Every table is scanned once. Restored rows do not mark anything dirty, so
//! the first commit after recovery writes only what it changes.

use super::records::{
    decode, BatchRecord, CollectionParentRecord, DocumentRecord, QueueRecord, StampRecord,
    TargetDocumentRecord, TargetGlobalsRecord, TargetRecord, COLLECTION_PARENTS, DOCUMENTS, GLOBALS,
    LRU_STAMPS, MUTATIONS, MUTATION_QUEUES, SESSION_TOKEN_KEY, TARGETS, TARGET_DOCUMENTS,
    TARGET_GLOBALS, TARGET_GLOBALS_KEY,
};
use crate::delegate::ReferenceDelegate;
use crate::listen_sequence::ListenSequence;
use crate::mutation_queue::MutationQueue;
use crate::state::LocalState;
use docsync_core::{MutationBatch, Result, User};
use docsync_storage::KvBackend;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::info;

/// Loads every persisted component
///
/// # Errors
/// Returns the backend error, or `Serialization`/`Decode` for a record that
/// does not parse. A bad record fails the whole recovery.
pub(crate) fn recover(backend: &dyn KvBackend, delegate: &mut dyn ReferenceDelegate) -> Result<LocalState> {
    let start = Instant::now();
    let mut state = LocalState::new();

    let mut documents = 0usize;
    for (_, bytes) in backend.scan(DOCUMENTS)? {
        let document = decode::<DocumentRecord>(&bytes)?.into_document()?;
        state.document_cache.restore(document);
        documents += 1;
    }

    let mut tokens: BTreeMap<User, Vec<u8>> = BTreeMap::new();
    for (_, bytes) in backend.scan(MUTATION_QUEUES)? {
        let record: QueueRecord = decode(&bytes)?;
        tokens.insert(record.user, record.last_stream_token);
    }
    let mut batches: BTreeMap<User, Vec<MutationBatch>> = BTreeMap::new();
    let mut batch_count = 0usize;
    for (_, bytes) in backend.scan(MUTATIONS)? {
        let (user, batch) = decode::<BatchRecord>(&bytes)?.into_batch()?;
        batches.entry(user).or_default().push(batch);
        batch_count += 1;
    }
    // A queue with a stream token but no batches still exists
    for user in tokens.keys() {
        batches.entry(user.clone()).or_default();
    }
    for (user, user_batches) in batches {
        let token = tokens.remove(&user).unwrap_or_default();
        let mut queue = MutationQueue::restore(user_batches, token);
        queue.start();
        state.mutation_queues.insert(user, queue);
    }

    let mut highest_sequence_number = 0;
    let mut targets = 0usize;
    for (_, bytes) in backend.scan(TARGETS)? {
        let target = decode::<TargetRecord>(&bytes)?.into_target()?;
        highest_sequence_number = highest_sequence_number.max(target.sequence_number);
        state.target_cache.restore_target(target);
        targets += 1;
    }
    for (_, bytes) in backend.scan(TARGET_DOCUMENTS)? {
        let record: TargetDocumentRecord = decode(&bytes)?;
        let target_id = record.target_id;
        state.target_cache.restore_matching_key(&record.key()?, target_id);
    }
    if let Some(bytes) = backend.get(TARGET_GLOBALS, TARGET_GLOBALS_KEY)? {
        let globals = decode::<TargetGlobalsRecord>(&bytes)?.into_globals();
        highest_sequence_number = highest_sequence_number.max(globals.highest_listen_sequence_number);
        state.target_cache.restore_globals(globals);
    }

    for (_, bytes) in backend.scan(COLLECTION_PARENTS)? {
        let (collection_id, parent) = decode::<CollectionParentRecord>(&bytes)?.parent()?;
        state.index_manager.restore(collection_id, parent);
    }

    if let Some(token) = backend.get(GLOBALS, SESSION_TOKEN_KEY)? {
        state.globals_cache.restore_session_token(token);
    }

    let mut stamps = 0usize;
    for (_, bytes) in backend.scan(LRU_STAMPS)? {
        let record: StampRecord = decode(&bytes)?;
        highest_sequence_number = highest_sequence_number.max(record.sequence_number);
        delegate.restore_stamp(&record.key()?, record.sequence_number);
        stamps += 1;
    }

    state.listen_sequence = ListenSequence::new(highest_sequence_number);

    info!(
        target: "docsync::persistence",
        backend = backend.name(),
        documents,
        batches = batch_count,
        targets,
        stamps,
        listen_sequence = highest_sequence_number,
        elapsed_us = start.elapsed().as_micros() as u64,
        "Recovery complete"
    );
    Ok(state)
}
