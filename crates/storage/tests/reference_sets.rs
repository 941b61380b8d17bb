//! Reference sets checked against a plain model under random operations

use docsync_core::DocumentKey;
use docsync_storage::{DocumentReferenceSet, ReferenceSet};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

fn key(n: u8) -> DocumentKey {
    DocumentKey::parse(&format!("rooms/r{}", n)).unwrap()
}

#[derive(Debug, Clone)]
enum RefOp {
    Add(u8, i32),
    Remove(u8, i32),
    RemoveId(i32),
}

fn ref_op() -> impl Strategy<Value = RefOp> {
    prop_oneof![
        4 => (0u8..12, 0i32..4).prop_map(|(k, id)| RefOp::Add(k, id)),
        2 => (0u8..12, 0i32..4).prop_map(|(k, id)| RefOp::Remove(k, id)),
        1 => (0i32..4).prop_map(RefOp::RemoveId),
    ]
}

proptest! {
    #[test]
    fn document_references_agree_both_ways(ops in prop::collection::vec(ref_op(), 0..80)) {
        let mut set = DocumentReferenceSet::new();
        let mut model: BTreeSet<(DocumentKey, i32)> = BTreeSet::new();
        for op in ops {
            match op {
                RefOp::Add(k, id) => {
                    set.add_reference(&key(k), id);
                    model.insert((key(k), id));
                }
                RefOp::Remove(k, id) => {
                    set.remove_reference(&key(k), id);
                    model.remove(&(key(k), id));
                }
                RefOp::RemoveId(id) => {
                    let removed: BTreeSet<_> = set.remove_references_for_id(id).into_iter().collect();
                    let expected: BTreeSet<_> =
                        model.iter().filter(|(_, i)| *i == id).map(|(k, _)| k.clone()).collect();
                    prop_assert_eq!(removed, expected);
                    model.retain(|(_, i)| *i != id);
                }
            }
        }

        prop_assert_eq!(set.len(), model.len());
        for n in 0..12u8 {
            let k = key(n);
            let ids: Vec<i32> = model.iter().filter(|(mk, _)| *mk == k).map(|(_, id)| *id).collect();
            prop_assert_eq!(set.ids_for_key(&k), ids.clone());
            prop_assert_eq!(set.contains_key(&k), !ids.is_empty());
        }
        for id in 0..4 {
            let keys: Vec<DocumentKey> = set.references_for_id(id).iter().cloned().collect();
            let expected: Vec<DocumentKey> =
                model.iter().filter(|(_, i)| *i == id).map(|(k, _)| k.clone()).collect();
            prop_assert_eq!(keys, expected);
        }
    }

    #[test]
    fn sequence_stamps_track_latest_touch(touches in prop::collection::vec((0u8..10, 1i64..50), 0..60)) {
        let mut stamps = ReferenceSet::new();
        let mut model: BTreeMap<DocumentKey, i64> = BTreeMap::new();
        for (k, seq) in touches {
            stamps.stamp(&key(k), seq);
            model.insert(key(k), seq);
        }

        prop_assert_eq!(stamps.len(), model.len());
        for (k, seq) in &model {
            prop_assert_eq!(stamps.sequence_number(k), Some(*seq));
        }
        for bound in [0i64, 10, 25, 49] {
            let mut below = stamps.keys_at_or_below(bound);
            below.sort();
            let expected: Vec<DocumentKey> =
                model.iter().filter(|(_, s)| **s <= bound).map(|(k, _)| k.clone()).collect();
            prop_assert_eq!(below, expected);
        }
        prop_assert_eq!(stamps.highest_sequence_number(), model.values().copied().max());
    }
}
