//! Target (watched query) cache
//!
//! Holds one [`TargetData`] per active query plus the set of document keys
//! the server reported as matching each target. Matching keys are kept in a
//! [`DocumentReferenceSet`] keyed by target id.

use crate::changes::{Change, Changes};
use crate::document_references::DocumentReferenceSet;
use docsync_core::{DocumentKey, DocumentKeySet, ListenSequenceNumber, Query, SnapshotVersion, TargetId};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;

/// A query the client is listening to, with its bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct TargetData {
    pub target_id: TargetId,
    pub query: Query,
    /// Last time the target was used, for LRU ordering
    pub sequence_number: ListenSequenceNumber,
    /// Server version the cached results are consistent with
    pub snapshot_version: SnapshotVersion,
    /// Opaque token to resume the listen stream
    pub resume_token: Vec<u8>,
}

impl TargetData {
    pub fn new(query: Query, target_id: TargetId, sequence_number: ListenSequenceNumber) -> Self {
        Self {
            target_id,
            query,
            sequence_number,
            snapshot_version: SnapshotVersion::NONE,
            resume_token: Vec::new(),
        }
    }

    /// Copy stamped with a newer sequence number
    pub fn with_sequence_number(&self, sequence_number: ListenSequenceNumber) -> Self {
        Self {
            sequence_number,
            ..self.clone()
        }
    }
}

/// Cache-wide counters persisted alongside the targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TargetGlobals {
    pub highest_target_id: TargetId,
    pub highest_listen_sequence_number: ListenSequenceNumber,
    pub last_remote_snapshot_version: SnapshotVersion,
}

/// All active targets and their matching documents
#[derive(Debug, Default)]
pub struct TargetCache {
    targets: BTreeMap<TargetId, TargetData>,
    by_query: FxHashMap<Query, TargetId>,
    references: DocumentReferenceSet,
    globals: TargetGlobals,
    target_changes: Changes<TargetId>,
    reference_changes: Changes<(TargetId, DocumentKey)>,
    globals_dirty: bool,
}

impl TargetCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Registers a new target
    ///
    /// # Panics
    /// If a target with the same id is already cached.
    pub fn add_target(&mut self, data: TargetData) {
        assert!(
            !self.targets.contains_key(&data.target_id),
            "target {} is already cached",
            data.target_id
        );
        self.save_target(data);
    }

    /// Replaces the data of an existing target
    pub fn update_target(&mut self, data: TargetData) {
        debug_assert!(self.targets.contains_key(&data.target_id));
        self.save_target(data);
    }

    fn save_target(&mut self, data: TargetData) {
        let id = data.target_id;
        if id > self.globals.highest_target_id {
            self.globals.highest_target_id = id;
            self.globals_dirty = true;
        }
        if data.sequence_number > self.globals.highest_listen_sequence_number {
            self.globals.highest_listen_sequence_number = data.sequence_number;
            self.globals_dirty = true;
        }
        self.by_query.insert(data.query.clone(), id);
        self.targets.insert(id, data);
        self.target_changes.upsert(id);
    }

    /// Drops a target and its matching keys, returning the keys it held
    pub fn remove_target(&mut self, target_id: TargetId) -> Vec<DocumentKey> {
        let Some(data) = self.targets.remove(&target_id) else {
            return Vec::new();
        };
        self.by_query.remove(&data.query);
        self.target_changes.remove(target_id);
        let keys = self.references.remove_references_for_id(target_id);
        for key in &keys {
            self.reference_changes.remove((target_id, key.clone()));
        }
        keys
    }

    /// Removes every target last used at or below `upper_bound` that is not
    /// in `live_targets`. Returns the number of targets removed.
    pub fn remove_targets(
        &mut self,
        upper_bound: ListenSequenceNumber,
        live_targets: &FxHashSet<TargetId>,
    ) -> usize {
        let doomed: Vec<TargetId> = self
            .targets
            .values()
            .filter(|t| t.sequence_number <= upper_bound && !live_targets.contains(&t.target_id))
            .map(|t| t.target_id)
            .collect();
        for id in &doomed {
            self.remove_target(*id);
        }
        doomed.len()
    }

    pub fn target(&self, query: &Query) -> Option<&TargetData> {
        self.by_query.get(query).and_then(|id| self.targets.get(id))
    }

    pub fn target_by_id(&self, target_id: TargetId) -> Option<&TargetData> {
        self.targets.get(&target_id)
    }

    /// Targets in id order
    pub fn iter(&self) -> impl Iterator<Item = &TargetData> + '_ {
        self.targets.values()
    }

    pub fn add_matching_keys(&mut self, keys: &DocumentKeySet, target_id: TargetId) {
        self.references.add_references(keys, target_id);
        for key in keys {
            self.reference_changes.upsert((target_id, key.clone()));
        }
    }

    pub fn remove_matching_keys(&mut self, keys: &DocumentKeySet, target_id: TargetId) {
        self.references.remove_references(keys, target_id);
        for key in keys {
            self.reference_changes.remove((target_id, key.clone()));
        }
    }

    pub fn matching_keys(&self, target_id: TargetId) -> DocumentKeySet {
        self.references.references_for_id(target_id)
    }

    /// True if any target matches `key`
    pub fn contains_key(&self, key: &DocumentKey) -> bool {
        self.references.contains_key(key)
    }

    pub fn highest_target_id(&self) -> TargetId {
        self.globals.highest_target_id
    }

    pub fn highest_listen_sequence_number(&self) -> ListenSequenceNumber {
        self.globals.highest_listen_sequence_number
    }

    pub fn last_remote_snapshot_version(&self) -> SnapshotVersion {
        self.globals.last_remote_snapshot_version
    }

    pub fn set_last_remote_snapshot_version(&mut self, version: SnapshotVersion) {
        self.globals.last_remote_snapshot_version = version;
        self.globals_dirty = true;
    }

    pub fn globals(&self) -> TargetGlobals {
        self.globals
    }

    pub fn take_target_changes(&mut self) -> Vec<(TargetId, Change)> {
        self.target_changes.take()
    }

    pub fn take_reference_changes(&mut self) -> Vec<((TargetId, DocumentKey), Change)> {
        self.reference_changes.take()
    }

    /// True once if the globals changed since the last call
    pub fn take_globals_dirty(&mut self) -> bool {
        std::mem::take(&mut self.globals_dirty)
    }

    // Recovery installs persisted state without recording changes.

    pub fn restore_target(&mut self, data: TargetData) {
        self.by_query.insert(data.query.clone(), data.target_id);
        self.targets.insert(data.target_id, data);
    }

    pub fn restore_matching_key(&mut self, key: &DocumentKey, target_id: TargetId) {
        self.references.add_reference(key, target_id);
    }

    pub fn restore_globals(&mut self, globals: TargetGlobals) {
        self.globals = globals;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsync_core::ResourcePath;

    fn query(path: &str) -> Query {
        Query::at_path(ResourcePath::parse(path))
    }

    fn keys(paths: &[&str]) -> DocumentKeySet {
        paths.iter().map(|p| DocumentKey::parse(p).unwrap()).collect()
    }

    #[test]
    fn test_add_and_lookup_by_query() {
        let mut cache = TargetCache::new();
        cache.add_target(TargetData::new(query("rooms"), 2, 10));
        assert_eq!(cache.target(&query("rooms")).map(|t| t.target_id), Some(2));
        assert!(cache.target(&query("users")).is_none());
        assert_eq!(cache.highest_target_id(), 2);
        assert_eq!(cache.highest_listen_sequence_number(), 10);
        assert!(cache.take_globals_dirty());
        assert!(!cache.take_globals_dirty());
    }

    #[test]
    fn test_remote_snapshot_version_marks_globals_dirty() {
        let mut cache = TargetCache::new();
        assert_eq!(cache.last_remote_snapshot_version(), SnapshotVersion::NONE);
        cache.set_last_remote_snapshot_version(SnapshotVersion::from_micros(42));
        assert_eq!(cache.globals().last_remote_snapshot_version, SnapshotVersion::from_micros(42));
        assert!(cache.take_globals_dirty());
    }

    #[test]
    #[should_panic(expected = "already cached")]
    fn test_duplicate_target_id_panics() {
        let mut cache = TargetCache::new();
        cache.add_target(TargetData::new(query("rooms"), 2, 1));
        cache.add_target(TargetData::new(query("users"), 2, 1));
    }

    #[test]
    fn test_remove_target_drops_matching_keys() {
        let mut cache = TargetCache::new();
        cache.add_target(TargetData::new(query("rooms"), 2, 1));
        cache.add_matching_keys(&keys(&["rooms/a", "rooms/b"]), 2);
        assert!(cache.contains_key(&DocumentKey::parse("rooms/a").unwrap()));

        let removed = cache.remove_target(2);
        assert_eq!(removed.len(), 2);
        assert!(!cache.contains_key(&DocumentKey::parse("rooms/a").unwrap()));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_remove_targets_spares_live_and_recent() {
        let mut cache = TargetCache::new();
        cache.add_target(TargetData::new(query("a"), 1, 5));
        cache.add_target(TargetData::new(query("b"), 2, 5));
        cache.add_target(TargetData::new(query("c"), 3, 50));

        let live: FxHashSet<TargetId> = [2].into_iter().collect();
        assert_eq!(cache.remove_targets(10, &live), 1);
        assert!(cache.target_by_id(1).is_none());
        assert!(cache.target_by_id(2).is_some());
        assert!(cache.target_by_id(3).is_some());
    }

    #[test]
    fn test_reference_changes_track_last_state() {
        let mut cache = TargetCache::new();
        cache.add_target(TargetData::new(query("rooms"), 1, 1));
        cache.add_matching_keys(&keys(&["rooms/a"]), 1);
        cache.remove_matching_keys(&keys(&["rooms/a"]), 1);
        let changes = cache.take_reference_changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].1, Change::Remove);
    }
}
