//! Persistence facade tests
//!
//! Covers transaction serialization across threads, durable reopen through
//! the log backend, and collection requests that overlap.

use chrono::Utc;
use docsync_core::{
    Document, DocumentKey, DocumentKeySet, Error, FieldValue, Mutation, ObjectValue, Query, ResourcePath,
    SnapshotVersion, User,
};
use docsync_engine::{
    EncodedSizer, EngineConfig, GcError, GcPolicy, LruParams, Persistence, Sizer,
};
use docsync_storage::TargetData;
use rustc_hash::FxHashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;

fn key(path: &str) -> DocumentKey {
    DocumentKey::parse(path).unwrap()
}

fn doc(path: &str) -> Document {
    Document::found(key(path), SnapshotVersion::from_micros(1), ObjectValue::new())
}

/// Routes engine logs to the test harness; only the first call installs
fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn disk_config(dir: &TempDir, policy: &str) -> EngineConfig {
    init_tracing();
    let mut config = EngineConfig::default();
    config.garbage_collector = policy.to_string();
    config.storage.mode = "disk".to_string();
    config.storage.path = Some(dir.path().join("data"));
    config
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_concurrent_transactions_hand_out_unique_batch_ids() {
    let persistence = Arc::new(Persistence::with_eager_gc());
    let user = User::new("alice");
    let threads = 8;
    let per_thread = 50;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let persistence = Arc::clone(&persistence);
            let barrier = Arc::clone(&barrier);
            let user = user.clone();
            thread::spawn(move || {
                barrier.wait();
                let mut ids = Vec::new();
                for i in 0..per_thread {
                    let id = persistence
                        .run_in_transaction("Locally write mutations", |txn| {
                            let mutation = Mutation::Delete {
                                key: key(&format!("rooms/t{}-{}", t, i)),
                            };
                            Ok(txn.add_mutation_batch(&user, Utc::now(), vec![mutation]).batch_id())
                        })
                        .unwrap();
                    ids.push(id);
                }
                ids
            })
        })
        .collect();

    let mut all = Vec::new();
    for handle in handles {
        let ids = handle.join().unwrap();
        // Ids seen by one thread are increasing
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        all.extend(ids);
    }
    all.sort_unstable();
    let expected: Vec<i32> = (1..=(threads * per_thread) as i32).collect();
    assert_eq!(all, expected);

    let queued = persistence
        .run_in_transaction("Count", |txn| Ok(txn.mutation_queue(&user).len()))
        .unwrap();
    assert_eq!(queued, threads * per_thread);
}

#[test]
fn test_snapshot_readers_do_not_block_on_transactions() {
    let persistence = Arc::new(Persistence::with_eager_gc());
    let entered = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));

    let writer = {
        let persistence = Arc::clone(&persistence);
        let entered = Arc::clone(&entered);
        let release = Arc::clone(&release);
        thread::spawn(move || {
            persistence
                .run_in_transaction("Slow write", |txn| {
                    txn.document_cache().add(doc("rooms/a"));
                    entered.wait();
                    release.wait();
                    Ok(())
                })
                .unwrap();
        })
    };

    entered.wait();
    // The write is still open; readers see the last committed state
    assert!(persistence.document_snapshot().is_empty());
    release.wait();
    writer.join().unwrap();
    assert!(persistence.document_snapshot().contains_key(&key("rooms/a")));
}

#[test]
fn test_panicking_body_still_runs_commit_hook() {
    let persistence = Persistence::with_eager_gc();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        persistence.run_in_transaction("Panics", |txn| -> docsync_core::Result<()> {
            txn.document_cache().add(doc("rooms/a"));
            txn.add_reference(&key("rooms/a"));
            txn.remove_reference(&key("rooms/a"));
            panic!("body failed");
        })
    }));
    assert!(outcome.is_err());

    // The orphan was collected by the panicking transaction itself
    assert!(persistence.document_snapshot().is_empty());
    persistence.run_in_transaction("Next", |_| Ok(())).unwrap();
    assert!(persistence.document_snapshot().is_empty());
}

#[test]
fn test_panicking_body_persists_its_own_changes() {
    let backend: Arc<dyn docsync_storage::KvBackend> = Arc::new(docsync_storage::MemoryBackend::new());
    let persistence = Persistence::open_durable(Arc::clone(&backend), GcPolicy::Lru(LruParams::default())).unwrap();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        persistence.run_in_transaction("Panics", |txn| -> docsync_core::Result<()> {
            txn.document_cache().add(doc("rooms/a"));
            panic!("body failed");
        })
    }));
    assert!(outcome.is_err());
    assert!(persistence.document_snapshot().contains_key(&key("rooms/a")));

    let reopened = Persistence::open_durable(backend, GcPolicy::Eager).unwrap();
    assert!(reopened.document_snapshot().contains_key(&key("rooms/a")));
}

#[test]
fn test_too_deep_document_is_refused_and_reopen_still_works() {
    let backend: Arc<dyn docsync_storage::KvBackend> = Arc::new(docsync_storage::MemoryBackend::new());
    let persistence = Persistence::open_durable(Arc::clone(&backend), GcPolicy::Lru(LruParams::default())).unwrap();

    let mut value = FieldValue::Null;
    for _ in 0..=docsync_wire::MAX_NESTING_DEPTH {
        value = FieldValue::Array(vec![value]);
    }
    let deep = Document::found(
        key("rooms/deep"),
        SnapshotVersion::from_micros(1),
        FieldValue::object([("nested", value)]),
    );
    let result = persistence.run_in_transaction("Too deep", |txn| -> docsync_core::Result<()> {
        txn.document_cache().add(doc("rooms/a"));
        txn.document_cache().add(deep);
        Ok(())
    });
    assert!(matches!(result, Err(Error::InvalidInput(_))));

    let reopened = Persistence::open_durable(backend, GcPolicy::Lru(LruParams::default())).unwrap();
    let snapshot = reopened.document_snapshot();
    assert!(snapshot.contains_key(&key("rooms/a")));
    assert!(!snapshot.contains_key(&key("rooms/deep")));
}

// ============================================================================
// Garbage collection requests
// ============================================================================

/// Sizer that parks the first caller until the test releases it
struct BlockingSizer {
    blocked: AtomicBool,
    entered: Arc<Barrier>,
    release: Arc<Barrier>,
}

impl Sizer for BlockingSizer {
    fn document_size(&self, document: &Document) -> usize {
        if !self.blocked.swap(true, Ordering::SeqCst) {
            self.entered.wait();
            self.release.wait();
        }
        EncodedSizer.document_size(document)
    }

    fn target_size(&self, target: &TargetData) -> usize {
        EncodedSizer.target_size(target)
    }

    fn batch_size(&self, batch: &docsync_core::MutationBatch) -> usize {
        EncodedSizer.batch_size(batch)
    }
}

#[test]
fn test_overlapping_collection_returns_already_running() {
    let entered = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));
    let sizer = BlockingSizer {
        blocked: AtomicBool::new(false),
        entered: Arc::clone(&entered),
        release: Arc::clone(&release),
    };
    let persistence = Arc::new(Persistence::with_lru_gc(
        LruParams::with_cache_size(0),
        Box::new(sizer),
    ));
    persistence
        .run_in_transaction("Add document", |txn| {
            txn.document_cache().add(doc("rooms/a"));
            Ok(())
        })
        .unwrap();

    let collector = {
        let persistence = Arc::clone(&persistence);
        thread::spawn(move || persistence.collect_garbage(&FxHashSet::default()))
    };

    entered.wait();
    let live = FxHashSet::default();
    assert!(matches!(persistence.collect_garbage(&live), Err(GcError::AlreadyRunning)));
    assert!(matches!(persistence.run_garbage_collection(&live), Err(GcError::AlreadyRunning)));
    assert!(matches!(
        persistence.collect_until_within_budget(&live),
        Err(GcError::AlreadyRunning)
    ));
    release.wait();

    let results = collector.join().unwrap().unwrap();
    assert!(results.did_run);

    // Once the pass finished a new request is accepted
    assert!(persistence.run_garbage_collection(&live).is_ok());
}

#[test]
fn test_collect_until_within_budget_reports_no_progress() {
    let persistence = Persistence::with_lru_gc(LruParams::with_cache_size(1), Box::new(EncodedSizer));
    let user = User::new("alice");
    persistence
        .run_in_transaction("Pin with a pending write", |txn| {
            txn.document_cache().add(doc("rooms/a"));
            txn.add_mutation_batch(&user, Utc::now(), vec![Mutation::Delete { key: key("rooms/a") }]);
            Ok(())
        })
        .unwrap();

    let err = persistence
        .collect_until_within_budget(&FxHashSet::default())
        .unwrap_err();
    match err {
        GcError::NoProgress { byte_size, threshold } => {
            assert!(byte_size > 0);
            assert_eq!(threshold, 1);
        }
        other => panic!("expected NoProgress, got {:?}", other),
    }
    assert_eq!(persistence.document_snapshot().len(), 1);
}

#[test]
fn test_collect_until_within_budget_stops_below_threshold() {
    // Three sequence numbers per pass, so eight documents take three passes
    let params = LruParams {
        percentile_to_collect: 100,
        maximum_sequence_numbers_to_collect: 3,
        ..LruParams::with_cache_size(1)
    };
    let persistence = Persistence::with_lru_gc(params, Box::new(EncodedSizer));
    for i in 0..8 {
        persistence
            .run_in_transaction("Touch", |txn| {
                let k = key(&format!("rooms/r{}", i));
                txn.document_cache().add(doc(&format!("rooms/r{}", i)));
                txn.add_local_view_reference(&k, 1);
                txn.remove_local_view_reference(&k, 1);
                Ok(())
            })
            .unwrap();
    }

    let results = persistence
        .collect_until_within_budget(&FxHashSet::default())
        .unwrap();
    assert!(results.did_run);
    assert_eq!(results.documents_removed, 8);
    assert!(persistence.document_snapshot().is_empty());
}

// ============================================================================
// Durable reopen
// ============================================================================

#[test]
fn test_disk_state_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let mut config = disk_config(&dir, "lru");
    config.lru.percentile_to_collect = 100;
    let user = User::new("alice");

    let (sequence_number, installation_id, target_id) = {
        let persistence = Persistence::open(&config).unwrap();
        assert!(persistence.is_persistent());
        let target_id = persistence
            .run_in_transaction("Listen", |txn| {
                txn.document_cache().add(doc("rooms/a"));
                txn.document_cache().add(doc("rooms/b"));
                let target = txn.allocate_target(Query::at_path(ResourcePath::parse("rooms")));
                let keys: DocumentKeySet = [key("rooms/a")].into_iter().collect();
                txn.add_matching_keys(&keys, target.target_id);
                txn.add_reference(&key("rooms/b"));
                txn.add_mutation_batch(&user, Utc::now(), vec![Mutation::Delete { key: key("rooms/c") }]);
                Ok(target.target_id)
            })
            .unwrap();
        persistence.shutdown().unwrap();
        (persistence.current_sequence_number(), persistence.installation_id(), target_id)
    };

    let persistence = Persistence::open(&config).unwrap();
    assert_eq!(persistence.installation_id(), installation_id);
    assert_eq!(persistence.current_sequence_number(), sequence_number);
    assert_eq!(persistence.document_snapshot().len(), 2);

    let next = persistence
        .run_in_transaction("After reopen", |txn| {
            assert_eq!(txn.mutation_queue(&user).len(), 1);
            assert!(txn.target_cache().contains_key(&key("rooms/a")));
            Ok(txn.current_sequence_number())
        })
        .unwrap();
    assert!(next > sequence_number);

    // rooms/b is only stamped; rooms/a stays matched by the live target
    let live: FxHashSet<_> = [target_id].into_iter().collect();
    let results = persistence.run_garbage_collection(&live).unwrap();
    assert_eq!(results.documents_removed, 1);
    assert_eq!(results.targets_removed, 0);
    drop(persistence);

    let persistence = Persistence::open(&config).unwrap();
    let snapshot = persistence.document_snapshot();
    assert!(snapshot.contains_key(&key("rooms/a")));
    assert!(!snapshot.contains_key(&key("rooms/b")));
}

#[test]
fn test_second_open_of_same_directory_fails() {
    let dir = TempDir::new().unwrap();
    let config = disk_config(&dir, "eager");
    let _first = Persistence::open(&config).unwrap();
    let second = Persistence::open(&config);
    assert!(matches!(second, Err(Error::Backend(_))));
}

#[test]
fn test_memory_mode_config_is_not_persistent() {
    init_tracing();
    let mut config = EngineConfig::default();
    config.garbage_collector = "lru".to_string();
    let persistence = Persistence::open(&config).unwrap();
    assert!(!persistence.is_persistent());
    assert!(persistence.run_garbage_collection(&FxHashSet::default()).is_ok());
}

#[test]
fn test_open_durable_with_eager_policy_rejects_collection() {
    let backend = Arc::new(docsync_storage::MemoryBackend::new());
    let persistence = Persistence::open_durable(backend, GcPolicy::Eager).unwrap();
    assert!(matches!(
        persistence.collect_garbage(&FxHashSet::default()),
        Err(GcError::Unavailable("eager"))
    ));
}

#[test]
fn test_anonymous_and_empty_uid_queues_reload_separately() {
    let backend: Arc<dyn docsync_storage::KvBackend> = Arc::new(docsync_storage::MemoryBackend::new());
    let anonymous = User::Unauthenticated;
    let empty = User::new("");
    {
        let persistence = Persistence::open_durable(Arc::clone(&backend), GcPolicy::Eager).unwrap();
        persistence
            .run_in_transaction("Queue writes", |txn| {
                txn.add_mutation_batch(&anonymous, Utc::now(), vec![Mutation::Delete { key: key("rooms/a") }]);
                txn.add_mutation_batch(&empty, Utc::now(), vec![Mutation::Delete { key: key("rooms/b") }]);
                Ok(())
            })
            .unwrap();
    }

    let reopened = Persistence::open_durable(backend, GcPolicy::Eager).unwrap();
    let (anonymous_keys, empty_keys) = reopened
        .run_in_transaction("Inspect", |txn| {
            let a = txn.mutation_queue(&anonymous).contains_key(&key("rooms/a"));
            let b = txn.mutation_queue(&empty).contains_key(&key("rooms/b"));
            let crossed = txn.mutation_queue(&anonymous).contains_key(&key("rooms/b"));
            Ok((a && !crossed, b))
        })
        .unwrap();
    assert!(anonymous_keys);
    assert!(empty_keys);
}
