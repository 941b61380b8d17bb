//! End-to-end scenarios through the public `docsync` API
//!
//! Each test drives a persistence instance the way a sync client would:
//! listen to a query, receive documents, write locally, reconcile with the
//! server and collect garbage.

use chrono::Utc;
use docsync::{
    BloomFilter, BloomFilterParams, Document, DocumentKey, DocumentKeySet, ExistenceFilter,
    ExistenceFilterOutcome, FieldValue, LruParams, Mutation, ObjectValue, Persistence, Query,
    ResourcePath, SnapshotVersion, User, EncodedSizer,
};
use rustc_hash::FxHashSet;

fn key(path: &str) -> DocumentKey {
    DocumentKey::parse(path).unwrap()
}

fn doc(path: &str) -> Document {
    Document::found(
        key(path),
        SnapshotVersion::from_micros(1),
        FieldValue::object([("name", FieldValue::from(path))]),
    )
}

/// Adds `path` to the cache, pins it in a local view and releases it again
fn add_and_release(persistence: &Persistence, path: &str) {
    persistence
        .run_in_transaction("Add and release", |txn| {
            txn.document_cache().add(doc(path));
            txn.add_local_view_reference(&key(path), 1);
            txn.remove_local_view_reference(&key(path), 1);
            Ok(())
        })
        .unwrap();
}

// ============================================================================
// Eager vs LRU
// ============================================================================

#[test]
fn test_eager_drops_unreferenced_document_at_commit() {
    let persistence = Persistence::with_eager_gc();
    add_and_release(&persistence, "rooms/eros");
    assert!(!persistence.document_snapshot().contains_key(&key("rooms/eros")));
}

#[test]
fn test_lru_keeps_document_until_pass_crosses_its_stamp() {
    let params = LruParams {
        percentile_to_collect: 50,
        ..LruParams::default()
    };
    let persistence = Persistence::with_lru_gc(params, Box::new(EncodedSizer));
    add_and_release(&persistence, "rooms/a");
    add_and_release(&persistence, "rooms/b");
    assert_eq!(persistence.document_snapshot().len(), 2);

    // Half of two stamps: the pass stops at rooms/a's sequence number
    let results = persistence.run_garbage_collection(&FxHashSet::default()).unwrap();
    assert_eq!(results.sequence_numbers_collected, 1);
    assert_eq!(results.documents_removed, 1);
    let snapshot = persistence.document_snapshot();
    assert!(!snapshot.contains_key(&key("rooms/a")));
    assert!(snapshot.contains_key(&key("rooms/b")));
}

#[test]
fn test_lru_collects_lowest_tenth_of_hundred_stamps() {
    let persistence = Persistence::with_lru_gc(LruParams::default(), Box::new(EncodedSizer));
    let user = User::new("alice");
    for i in 1..=100 {
        let path = format!("docs/d{:03}", i);
        persistence
            .run_in_transaction("Touch", |txn| {
                txn.document_cache().add(doc(&path));
                txn.add_local_view_reference(&key(&path), 1);
                txn.remove_local_view_reference(&key(&path), 1);
                if i == 5 {
                    txn.add_mutation_batch(&user, Utc::now(), vec![Mutation::Delete { key: key(&path) }]);
                }
                Ok(())
            })
            .unwrap();
    }

    let results = persistence.run_garbage_collection(&FxHashSet::default()).unwrap();
    assert_eq!(results.sequence_numbers_collected, 10);
    // d005 is pinned by its pending write
    assert_eq!(results.documents_removed, 9);

    let snapshot = persistence.document_snapshot();
    for i in 1..=100 {
        let present = snapshot.contains_key(&key(&format!("docs/d{:03}", i)));
        assert_eq!(present, i == 5 || i > 10, "document {}", i);
    }
}

#[test]
fn test_threshold_gated_collection_skips_small_cache() {
    let persistence = Persistence::with_lru_gc(LruParams::default(), Box::new(EncodedSizer));
    add_and_release(&persistence, "rooms/a");
    let results = persistence.collect_garbage(&FxHashSet::default()).unwrap();
    assert!(!results.did_run);
    assert_eq!(persistence.document_snapshot().len(), 1);

    let disabled = Persistence::with_lru_gc(LruParams::disabled(), Box::new(EncodedSizer));
    add_and_release(&disabled, "rooms/a");
    assert!(!disabled.collect_garbage(&FxHashSet::default()).unwrap().did_run);
}

// ============================================================================
// Listening and reconciliation
// ============================================================================

#[test]
fn test_existence_filter_evicts_documents_server_no_longer_has() {
    let persistence = Persistence::with_eager_gc();
    let query = Query::at_path(ResourcePath::parse("rooms"));

    let target_id = persistence
        .run_in_transaction("Listen", |txn| {
            let target = txn.allocate_target(query.clone());
            let keys: DocumentKeySet = ["rooms/a", "rooms/b", "rooms/c"].iter().map(|p| key(p)).collect();
            for k in &keys {
                txn.document_cache().add(doc(k.path().canonical_string().as_str()));
            }
            txn.add_matching_keys(&keys, target.target_id);
            Ok(target.target_id)
        })
        .unwrap();
    assert_eq!(persistence.document_snapshot().len(), 3);

    let server = BloomFilter::build(["rooms/a", "rooms/c"], 4096, 7);
    let filter = ExistenceFilter::new(
        2,
        Some(BloomFilterParams {
            bitmap: server.bitmap().to_vec(),
            padding: i32::from(server.padding()),
            hash_count: server.hash_count() as i32,
        }),
    );
    let outcome = persistence
        .run_in_transaction("Apply existence filter", |txn| {
            Ok(txn.apply_existence_filter(target_id, &filter))
        })
        .unwrap();

    assert_eq!(
        outcome,
        ExistenceFilterOutcome::BloomFilterApplied { removed: vec![key("rooms/b")] }
    );
    let snapshot = persistence.document_snapshot();
    assert!(!snapshot.contains_key(&key("rooms/b")));
    assert_eq!(snapshot.len(), 2);
}

#[test]
fn test_released_target_frees_its_documents_under_eager_gc() {
    let persistence = Persistence::with_eager_gc();
    let target_id = persistence
        .run_in_transaction("Listen", |txn| {
            let target = txn.allocate_target(Query::at_path(ResourcePath::parse("rooms")));
            txn.document_cache().add(doc("rooms/a"));
            let keys: DocumentKeySet = [key("rooms/a")].into_iter().collect();
            txn.add_matching_keys(&keys, target.target_id);
            Ok(target.target_id)
        })
        .unwrap();
    assert_eq!(persistence.document_snapshot().len(), 1);

    persistence
        .run_in_transaction("Release target", |txn| {
            txn.remove_target(target_id);
            Ok(())
        })
        .unwrap();
    assert!(persistence.document_snapshot().is_empty());
}

#[test]
fn test_local_view_reflects_pending_patch() {
    let persistence = Persistence::with_eager_gc();
    let user = User::new("alice");
    let local = persistence
        .run_in_transaction("Write locally", |txn| {
            txn.document_cache().add(doc("rooms/a"));
            txn.add_local_view_reference(&key("rooms/a"), 1);
            let patch: ObjectValue = FieldValue::object([("topic", FieldValue::from("rust"))]);
            txn.add_mutation_batch(
                &user,
                Utc::now(),
                vec![Mutation::Patch {
                    key: key("rooms/a"),
                    value: patch,
                    mask: vec![docsync::FieldPath::parse("topic")],
                }],
            );
            Ok(txn.local_document(&user, &key("rooms/a")))
        })
        .unwrap()
        .expect("document exists locally");

    let data = local.data().unwrap();
    assert_eq!(data.get(&"topic".to_string()), Some(&FieldValue::from("rust")));
    assert_eq!(data.get(&"name".to_string()), Some(&FieldValue::from("rooms/a")));
    assert!(local.has_local_mutations());
}

#[test]
fn test_acknowledged_batch_leaves_queue_and_releases_document() {
    let persistence = Persistence::with_eager_gc();
    let user = User::new("alice");
    persistence
        .run_in_transaction("Write", |txn| {
            txn.document_cache().add(doc("rooms/a"));
            txn.add_mutation_batch(&user, Utc::now(), vec![Mutation::Delete { key: key("rooms/a") }]);
            Ok(())
        })
        .unwrap();
    // The pending write keeps the document cached
    assert_eq!(persistence.document_snapshot().len(), 1);

    persistence
        .run_in_transaction("Acknowledge batch", |txn| {
            let queue = txn.mutation_queue(&user);
            queue.acknowledge_batch(1, b"token".to_vec());
            txn.remove_mutation_batch(&user, 1);
            Ok(())
        })
        .unwrap();
    assert!(persistence.document_snapshot().is_empty());
}
