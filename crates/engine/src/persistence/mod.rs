//! Persistence facade
//!
//! [`Persistence`] owns the local state, the reference delegate and, for LRU
//! collection, the garbage collector. All mutation goes through
//! [`Persistence::run_in_transaction`]:
//!
//! 1. the transaction lock is taken (one writer at a time)
//! 2. the delegate's start hook runs
//! 3. the body runs against a [`Transaction`] handle
//! 4. the delegate's commit hook runs, whatever the body returned, even if
//!    it panicked
//! 5. dirty state is handed to the durability mode as one batch
//! 6. the document snapshot for lock-free readers is republished
//!
//! Nesting a transaction on the same thread panics.

mod records;
mod recovery;

use crate::config::{EngineConfig, GcPolicy};
use crate::delegate::{EagerReferenceDelegate, LruReferenceDelegate, ReferenceDelegate};
use crate::durability::{BackendDurability, Durability, InMemoryDurability};
use crate::gc::{GcError, LruGarbageCollector, LruParams, LruResults};
use crate::mutation_queue::MutationQueue;
use crate::sizer::{EncodedSizer, Sizer};
use crate::state::LocalState;
use chrono::{DateTime, Utc};
use docsync_core::{
    BatchId, Document, DocumentKey, DocumentKeySet, Error, ListenSequenceNumber, Mutation,
    MutationBatch, Query, Result, TargetId, User,
};
use docsync_storage::{
    DocumentCache, DocumentMap, GlobalsCache, IndexManager, KvBackend, LogBackend, LogOptions,
    TargetCache, TargetData,
};
use docsync_wire::{ExistenceFilter, ExistenceFilterOutcome};
use parking_lot::{ReentrantMutex, RwLock};
use rustc_hash::FxHashSet;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Label of the transaction a collection pass runs in
pub const COLLECT_GARBAGE_LABEL: &str = "Collect garbage";

struct Inner {
    state: LocalState,
    delegate: Box<dyn ReferenceDelegate>,
    collector: Option<LruGarbageCollector>,
    started: bool,
}

/// Resets the collecting flag when a collection request ends, even by panic
struct CollectingGuard<'a>(&'a AtomicBool);

impl Drop for CollectingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Local cache of documents, targets and pending writes
///
/// `Persistence` is `Send + Sync`; any number of threads may share one
/// behind an `Arc`. Transactions are serialized by an internal lock.
pub struct Persistence {
    inner: ReentrantMutex<RefCell<Inner>>,
    durability: Box<dyn Durability>,
    records_enabled: bool,
    snapshot: RwLock<DocumentMap>,
    collecting: AtomicBool,
    installation_id: Uuid,
}

impl Persistence {
    /// In-memory persistence that deletes unreferenced documents at commit
    pub fn with_eager_gc() -> Self {
        Self::in_memory(Box::new(EagerReferenceDelegate::new()), None)
    }

    /// In-memory persistence with LRU garbage collection
    pub fn with_lru_gc(params: LruParams, sizer: Box<dyn Sizer>) -> Self {
        Self::in_memory(
            Box::new(LruReferenceDelegate::new(sizer)),
            Some(LruGarbageCollector::new(params)),
        )
    }

    fn in_memory(delegate: Box<dyn ReferenceDelegate>, collector: Option<LruGarbageCollector>) -> Self {
        let persistence = Self::assemble(
            LocalState::new(),
            delegate,
            collector,
            Box::new(InMemoryDurability),
            false,
            Uuid::new_v4(),
        );
        debug!(target: "docsync::persistence", mode = "InMemory", "Persistence started");
        persistence
    }

    /// Persistence that commits every transaction to `backend`
    ///
    /// Existing state in the backend is recovered first.
    ///
    /// # Errors
    /// Returns an error if recovery reads a record it cannot parse or the
    /// backend fails.
    pub fn open_durable(backend: Arc<dyn KvBackend>, policy: GcPolicy) -> Result<Self> {
        Self::open_backend(backend, policy, true)
    }

    /// Builds persistence from a config
    ///
    /// Memory mode ignores the storage path. Disk mode opens (or creates)
    /// the log in the configured directory.
    ///
    /// # Errors
    /// Returns `InvalidInput` for a bad config and I/O or backend errors
    /// from opening the log.
    pub fn open(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        let policy = config.gc_policy()?;
        match config.log_path() {
            Some(log_path) if config.storage.mode == "disk" => {
                if let Some(dir) = &config.storage.path {
                    std::fs::create_dir_all(dir)?;
                }
                let options = LogOptions {
                    sync_on_write: false,
                    compaction_threshold_bytes: config.storage.compaction_threshold_bytes,
                };
                let backend: Arc<dyn KvBackend> = Arc::new(LogBackend::open(&log_path, options)?);
                Self::open_backend(backend, policy, config.storage.sync_on_commit)
            }
            _ => Ok(match policy {
                GcPolicy::Eager => Self::with_eager_gc(),
                GcPolicy::Lru(params) => Self::with_lru_gc(params, Box::new(EncodedSizer)),
            }),
        }
    }

    fn open_backend(backend: Arc<dyn KvBackend>, policy: GcPolicy, sync_on_commit: bool) -> Result<Self> {
        let (mut delegate, collector): (Box<dyn ReferenceDelegate>, _) = match policy {
            GcPolicy::Eager => (Box::new(EagerReferenceDelegate::new()), None),
            GcPolicy::Lru(params) => (
                Box::new(LruReferenceDelegate::new(Box::new(EncodedSizer))),
                Some(LruGarbageCollector::new(params)),
            ),
        };
        let state = recovery::recover(backend.as_ref(), delegate.as_mut())?;
        let installation_id = load_installation_id(backend.as_ref())?;
        let durability = BackendDurability::new(Arc::clone(&backend), sync_on_commit);
        info!(
            target: "docsync::persistence",
            backend = backend.name(),
            delegate = delegate.name(),
            %installation_id,
            "Persistence opened"
        );
        Ok(Self::assemble(
            state,
            delegate,
            collector,
            Box::new(durability),
            true,
            installation_id,
        ))
    }

    fn assemble(
        state: LocalState,
        delegate: Box<dyn ReferenceDelegate>,
        collector: Option<LruGarbageCollector>,
        durability: Box<dyn Durability>,
        records_enabled: bool,
        installation_id: Uuid,
    ) -> Self {
        let snapshot = state.document_cache.snapshot();
        Self {
            inner: ReentrantMutex::new(RefCell::new(Inner {
                state,
                delegate,
                collector,
                started: true,
            })),
            durability,
            records_enabled,
            snapshot: RwLock::new(snapshot),
            collecting: AtomicBool::new(false),
            installation_id,
        }
    }

    /// Runs `body` as one transaction
    ///
    /// The delegate's commit hook runs and dirty state is persisted even if
    /// `body` returns an error; that error is then returned. A panic in
    /// `body` is resumed after the same commit steps.
    ///
    /// # Panics
    /// When called from inside another transaction on the same thread, after
    /// [`shutdown`](Self::shutdown), or when `body` panics.
    pub fn run_in_transaction<T, F>(&self, label: &str, body: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        self.transact(label, |state, delegate, _| {
            let mut txn = Transaction { state, delegate };
            body(&mut txn)
        })
    }

    fn transact<T, E, F>(&self, label: &str, body: F) -> std::result::Result<T, E>
    where
        E: From<Error>,
        F: FnOnce(&mut LocalState, &mut dyn ReferenceDelegate, Option<&LruGarbageCollector>) -> std::result::Result<T, E>,
    {
        let guard = self.inner.lock();
        let mut cell = guard
            .try_borrow_mut()
            .unwrap_or_else(|_| panic!("nested transaction '{}' is not supported", label));
        let inner = &mut *cell;
        assert!(inner.started, "transaction '{}' run on a persistence that is not started", label);

        let start = Instant::now();
        trace!(target: "docsync::persistence", label, "Transaction started");
        inner.delegate.on_transaction_started(&mut inner.state, label);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            body(&mut inner.state, inner.delegate.as_mut(), inner.collector.as_ref())
        }));
        inner.delegate.on_transaction_committed(&mut inner.state);
        let persisted = self.commit(inner);

        let result = match outcome {
            Ok(result) => result,
            Err(payload) => {
                warn!(target: "docsync::persistence", label, "Transaction body panicked");
                panic::resume_unwind(payload)
            }
        };
        let ops = persisted?;
        debug!(
            target: "docsync::persistence",
            label,
            ops,
            ok = result.is_ok(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "Transaction committed"
        );
        result
    }

    /// Hands dirty state to the durability mode and republishes the snapshot
    fn commit(&self, inner: &mut Inner) -> Result<usize> {
        let (ops, rejected) = if self.records_enabled {
            let collected = records::collect_changes(&mut inner.state, inner.delegate.as_mut())?;
            let ops = collected.batch.len();
            if !collected.batch.is_empty() {
                self.durability.persist(collected.batch)?;
            }
            (ops, collected.rejected)
        } else {
            records::discard_changes(&mut inner.state, inner.delegate.as_mut());
            (0, None)
        };
        *self.snapshot.write() = inner.state.document_cache.snapshot();
        match rejected {
            Some(e) => Err(e),
            None => Ok(ops),
        }
    }

    /// Stops the persistence and flushes the durability mode
    ///
    /// # Panics
    /// If already shut down.
    pub fn shutdown(&self) -> Result<()> {
        let guard = self.inner.lock();
        let mut inner = guard
            .try_borrow_mut()
            .unwrap_or_else(|_| panic!("shutdown called inside a transaction"));
        assert!(inner.started, "shutdown called on a persistence that is not started");
        inner.started = false;
        self.durability.shutdown()?;
        info!(target: "docsync::persistence", mode = self.durability.mode_name(), "Persistence shut down");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.inner.lock().borrow().started
    }

    /// Highest listen sequence number handed out so far
    pub fn current_sequence_number(&self) -> ListenSequenceNumber {
        self.inner.lock().borrow().state.listen_sequence.current()
    }

    /// Documents as of the last committed transaction
    ///
    /// Taking the snapshot never waits for a running transaction.
    pub fn document_snapshot(&self) -> DocumentMap {
        self.snapshot.read().clone()
    }

    /// Identifier of this installation, stable across reopen for durable
    /// persistence
    pub fn installation_id(&self) -> Uuid {
        self.installation_id
    }

    /// True if committed state survives a restart
    pub fn is_persistent(&self) -> bool {
        self.durability.is_persistent()
    }

    // ========================================================================
    // Garbage collection
    // ========================================================================

    /// Runs a collection pass if the cache is over its thresholds
    ///
    /// # Errors
    /// `AlreadyRunning` if another request is in progress, `Unavailable`
    /// with eager collection.
    pub fn collect_garbage(&self, live_targets: &FxHashSet<TargetId>) -> std::result::Result<LruResults, GcError> {
        let _collecting = self.begin_collecting()?;
        self.collect_pass(live_targets, false)
    }

    /// Runs a collection pass regardless of thresholds
    ///
    /// # Errors
    /// As [`collect_garbage`](Self::collect_garbage).
    pub fn run_garbage_collection(
        &self,
        live_targets: &FxHashSet<TargetId>,
    ) -> std::result::Result<LruResults, GcError> {
        let _collecting = self.begin_collecting()?;
        self.collect_pass(live_targets, true)
    }

    /// Collects until the cache is below its byte budget
    ///
    /// Returns the summed results of every pass that ran.
    ///
    /// # Errors
    /// `NoProgress` when a pass removes nothing and the cache is still over
    /// budget, plus the errors of [`collect_garbage`](Self::collect_garbage).
    pub fn collect_until_within_budget(
        &self,
        live_targets: &FxHashSet<TargetId>,
    ) -> std::result::Result<LruResults, GcError> {
        let _collecting = self.begin_collecting()?;
        let mut total = LruResults::did_not_run();
        loop {
            let results = self.collect_pass(live_targets, false)?;
            if !results.did_run {
                return Ok(total);
            }
            total.did_run = true;
            total.sequence_numbers_collected += results.sequence_numbers_collected;
            total.targets_removed += results.targets_removed;
            total.documents_removed += results.documents_removed;
            if !results.made_progress() {
                let (byte_size, threshold) = self.byte_budget()?;
                if byte_size as i64 >= threshold {
                    return Err(GcError::NoProgress { byte_size, threshold });
                }
                return Ok(total);
            }
        }
    }

    fn begin_collecting(&self) -> std::result::Result<CollectingGuard<'_>, GcError> {
        if self.collecting.swap(true, Ordering::AcqRel) {
            debug!(target: "docsync::gc", "Collection requested while one is running");
            return Err(GcError::AlreadyRunning);
        }
        Ok(CollectingGuard(&self.collecting))
    }

    fn collect_pass(
        &self,
        live_targets: &FxHashSet<TargetId>,
        force: bool,
    ) -> std::result::Result<LruResults, GcError> {
        self.transact(COLLECT_GARBAGE_LABEL, |state, delegate, collector| {
            let name = delegate.name();
            let (Some(lru), Some(collector)) = (delegate.as_lru(), collector) else {
                return Err(GcError::Unavailable(name));
            };
            Ok(if force {
                collector.run_garbage_collection(lru, state, live_targets)
            } else {
                collector.collect(lru, state, live_targets)
            })
        })
    }

    fn byte_budget(&self) -> std::result::Result<(usize, i64), GcError> {
        let guard = self.inner.lock();
        let mut cell = guard
            .try_borrow_mut()
            .unwrap_or_else(|_| panic!("garbage collection requested inside a transaction"));
        let inner = &mut *cell;
        let name = inner.delegate.name();
        match (inner.delegate.as_lru(), inner.collector.as_ref()) {
            (Some(lru), Some(collector)) => {
                Ok((lru.byte_size(&inner.state), collector.params().min_bytes_threshold))
            }
            _ => Err(GcError::Unavailable(name)),
        }
    }
}

impl std::fmt::Debug for Persistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persistence")
            .field("durability", &self.durability.mode_name())
            .field("installation_id", &self.installation_id)
            .field("collecting", &self.collecting.load(Ordering::Relaxed))
            .finish()
    }
}

fn load_installation_id(backend: &dyn KvBackend) -> Result<Uuid> {
    if let Some(bytes) = backend.get(records::GLOBALS, records::INSTALLATION_ID_KEY)? {
        return Uuid::from_slice(&bytes)
            .map_err(|e| Error::Corruption(format!("installation id: {}", e)));
    }
    let id = Uuid::new_v4();
    backend.put(records::GLOBALS, records::INSTALLATION_ID_KEY, id.as_bytes())?;
    backend.flush()?;
    Ok(id)
}

// ============================================================================
// Transaction
// ============================================================================

/// Handle passed to a transaction body
///
/// Reference changes made through this handle are reported to the reference
/// delegate. Components reached through the accessors are changed directly.
pub struct Transaction<'a> {
    state: &'a mut LocalState,
    delegate: &'a mut dyn ReferenceDelegate,
}

impl<'a> Transaction<'a> {
    pub fn document_cache(&mut self) -> &mut DocumentCache {
        &mut self.state.document_cache
    }

    pub fn target_cache(&mut self) -> &mut TargetCache {
        &mut self.state.target_cache
    }

    pub fn index_manager(&mut self) -> &mut IndexManager {
        &mut self.state.index_manager
    }

    pub fn globals_cache(&mut self) -> &mut GlobalsCache {
        &mut self.state.globals_cache
    }

    /// The queue of `user`, created on first use and kept for the lifetime
    /// of the persistence
    pub fn mutation_queue(&mut self, user: &User) -> &mut MutationQueue {
        self.state.mutation_queue(user)
    }

    /// Sequence number of this transaction; invalid under eager collection
    pub fn current_sequence_number(&self) -> ListenSequenceNumber {
        self.delegate.current_sequence_number()
    }

    /// Tells the delegate something started referencing `key`
    pub fn add_reference(&mut self, key: &DocumentKey) {
        self.delegate.add_reference(self.state, key);
    }

    /// Tells the delegate something stopped referencing `key`
    pub fn remove_reference(&mut self, key: &DocumentKey) {
        self.delegate.remove_reference(self.state, key);
    }

    /// Records that `target_id` matches `keys`
    pub fn add_matching_keys(&mut self, keys: &DocumentKeySet, target_id: TargetId) {
        self.state.target_cache.add_matching_keys(keys, target_id);
        for key in keys {
            self.delegate.add_reference(self.state, key);
        }
    }

    pub fn remove_matching_keys(&mut self, keys: &DocumentKeySet, target_id: TargetId) {
        self.state.target_cache.remove_matching_keys(keys, target_id);
        for key in keys {
            self.delegate.remove_reference(self.state, key);
        }
    }

    /// Pins `key` for the local view `view_id`
    pub fn add_local_view_reference(&mut self, key: &DocumentKey, view_id: TargetId) {
        self.state.local_view_references.add_reference(key, view_id);
        self.delegate.add_reference(self.state, key);
    }

    pub fn remove_local_view_reference(&mut self, key: &DocumentKey, view_id: TargetId) {
        self.state.local_view_references.remove_reference(key, view_id);
        self.delegate.remove_reference(self.state, key);
    }

    /// Queues a batch for `user` and indexes its collections
    pub fn add_mutation_batch(
        &mut self,
        user: &User,
        local_write_time: DateTime<Utc>,
        mutations: Vec<Mutation>,
    ) -> MutationBatch {
        let batch = self.state.mutation_queue(user).add_batch(local_write_time, mutations);
        for key in batch.keys() {
            self.state
                .index_manager
                .add_to_collection_parent_index(&key.collection_path());
        }
        batch
    }

    /// Drops a batch from `user`'s queue
    ///
    /// # Panics
    /// If the queue has no batch `batch_id`.
    pub fn remove_mutation_batch(&mut self, user: &User, batch_id: BatchId) -> MutationBatch {
        let batch = self.state.mutation_queue(user).remove_batch(batch_id);
        for key in batch.keys() {
            self.delegate.remove_mutation_reference(self.state, key);
        }
        batch
    }

    /// The target for `query`, allocating one if none is cached
    ///
    /// New target ids are even and increase by two.
    pub fn allocate_target(&mut self, query: Query) -> TargetData {
        if let Some(existing) = self.state.target_cache.target(&query) {
            return existing.clone();
        }
        let target_id = self.state.target_cache.highest_target_id() + 2;
        let data = TargetData::new(query, target_id, self.delegate.current_sequence_number());
        self.state.target_cache.add_target(data.clone());
        data
    }

    /// Stops listening to `target_id`
    ///
    /// Local view pins for the target are released first. What happens to
    /// the target itself depends on the delegate.
    pub fn remove_target(&mut self, target_id: TargetId) {
        for key in self.state.local_view_references.remove_references_for_id(target_id) {
            self.delegate.remove_reference(self.state, &key);
        }
        self.delegate.remove_target(self.state, target_id);
    }

    pub fn update_limbo_document(&mut self, key: &DocumentKey) {
        self.delegate.update_limbo_document(self.state, key);
    }

    /// The cached document with `user`'s pending writes applied
    pub fn local_document(&mut self, user: &User, key: &DocumentKey) -> Option<Document> {
        let cached = self.state.document_cache.get(key);
        let queue = self.state.mutation_queue(user);
        queue
            .batches_affecting_key(key)
            .into_iter()
            .fold(cached, |doc, batch| batch.apply_to_local_view(key, doc))
    }

    /// `user`'s batches that may affect `query`
    ///
    /// A collection group query is answered once per known parent of the
    /// group's collection.
    pub fn batches_affecting_query(&mut self, user: &User, query: &Query) -> Vec<MutationBatch> {
        let Some(group) = query.collection_group_id().map(str::to_owned) else {
            return self
                .state
                .mutation_queue(user)
                .batches_affecting_query(query)
                .into_iter()
                .cloned()
                .collect();
        };
        let parents = self.state.index_manager.collection_parents(&group);
        let queue = self.state.mutation_queue(user);
        let mut batches: Vec<MutationBatch> = Vec::new();
        for parent in parents {
            let collection_query = query.as_collection_query_at_path(parent.append(group.as_str()));
            for batch in queue.batches_affecting_query(&collection_query) {
                if !batches.iter().any(|b| b.batch_id() == batch.batch_id()) {
                    batches.push(batch.clone());
                }
            }
        }
        batches.sort_by_key(MutationBatch::batch_id);
        batches
    }

    /// Reconciles `target_id`'s matching keys with a server existence filter
    ///
    /// Keys the bloom filter rules out are removed from the target. A
    /// `Skipped` or `FalsePositive` outcome means the target must be
    /// listened to again.
    pub fn apply_existence_filter(
        &mut self,
        target_id: TargetId,
        filter: &ExistenceFilter,
    ) -> ExistenceFilterOutcome {
        let local = self.state.target_cache.matching_keys(target_id);
        let outcome = filter.check(&local);
        let removed: DocumentKeySet = outcome.removed_keys().iter().cloned().collect();
        if !removed.is_empty() {
            debug!(
                target: "docsync::persistence",
                target_id,
                removed = removed.len(),
                "Existence filter evicted keys"
            );
            self.remove_matching_keys(&removed, target_id);
        }
        outcome
    }
}
