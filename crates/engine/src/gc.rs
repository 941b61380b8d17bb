//! LRU garbage collection
//!
//! A collection pass picks a sequence-number threshold and removes every
//! inactive target and unpinned document last touched at or below it.
//!
//! The threshold is the Nth smallest sequence number, where N is
//! `percentile_to_collect` percent of all targets and stamped documents,
//! capped at `maximum_sequence_numbers_to_collect`. It is found by streaming
//! every sequence number through a bounded max-heap instead of sorting.

use crate::delegate::LruReferenceDelegate;
use crate::state::LocalState;
use docsync_core::{ListenSequenceNumber, TargetId, INVALID_SEQUENCE_NUMBER};
use rustc_hash::FxHashSet;
use std::collections::BinaryHeap;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};

/// Tuning for the LRU garbage collector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LruParams {
    /// Cache size in bytes above which a threshold-gated pass runs;
    /// [`LruParams::DISABLED`] turns collection off
    pub min_bytes_threshold: i64,
    /// Share of sequence numbers to collect per pass, in percent
    pub percentile_to_collect: u32,
    /// Upper bound on sequence numbers collected per pass
    pub maximum_sequence_numbers_to_collect: usize,
    /// Number of collectable sequence numbers that triggers a pass
    /// regardless of byte size (0 disables the count trigger)
    pub minimum_batches_to_collect: usize,
}

impl LruParams {
    pub const DISABLED: i64 = -1;
    pub const DEFAULT_CACHE_SIZE_BYTES: i64 = 100 * 1024 * 1024;
    pub const DEFAULT_PERCENTILE: u32 = 10;
    pub const DEFAULT_MAX_SEQUENCE_NUMBERS: usize = 1000;

    /// Collection never runs
    pub fn disabled() -> Self {
        Self {
            min_bytes_threshold: Self::DISABLED,
            ..Self::default()
        }
    }

    /// Defaults with a custom byte threshold
    pub fn with_cache_size(bytes: i64) -> Self {
        Self {
            min_bytes_threshold: bytes,
            ..Self::default()
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.min_bytes_threshold == Self::DISABLED
    }
}

impl Default for LruParams {
    fn default() -> Self {
        Self {
            min_bytes_threshold: Self::DEFAULT_CACHE_SIZE_BYTES,
            percentile_to_collect: Self::DEFAULT_PERCENTILE,
            maximum_sequence_numbers_to_collect: Self::DEFAULT_MAX_SEQUENCE_NUMBERS,
            minimum_batches_to_collect: 0,
        }
    }
}

/// Outcome of one collection request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LruResults {
    pub did_run: bool,
    pub sequence_numbers_collected: usize,
    pub targets_removed: usize,
    pub documents_removed: usize,
}

impl LruResults {
    pub fn did_not_run() -> Self {
        Self::default()
    }

    /// True if the pass removed anything
    pub fn made_progress(&self) -> bool {
        self.targets_removed > 0 || self.documents_removed > 0
    }
}

/// Reasons a collection request returns without collecting
#[derive(Debug, Error)]
pub enum GcError {
    /// Another collection pass is in progress; retry later
    #[error("garbage collection is already running")]
    AlreadyRunning,

    /// This persistence instance does not use LRU garbage collection
    #[error("garbage collection is not available with the {0} reference delegate")]
    Unavailable(&'static str),

    /// The cache stays over budget and a pass removed nothing
    #[error("garbage collection made no progress: {byte_size} bytes cached, budget {threshold}")]
    NoProgress { byte_size: usize, threshold: i64 },

    #[error(transparent)]
    Error(#[from] docsync_core::Error),
}

/// Keeps the `capacity` smallest sequence numbers seen
#[derive(Debug)]
pub struct RollingSequenceNumberBuffer {
    heap: BinaryHeap<ListenSequenceNumber>,
    capacity: usize,
}

impl RollingSequenceNumberBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(capacity),
            capacity,
        }
    }

    pub fn add_element(&mut self, sequence_number: ListenSequenceNumber) {
        if self.capacity == 0 {
            return;
        }
        if self.heap.len() < self.capacity {
            self.heap.push(sequence_number);
        } else if self.heap.peek().is_some_and(|&top| sequence_number < top) {
            self.heap.pop();
            self.heap.push(sequence_number);
        }
    }

    /// Largest of the kept numbers
    pub fn max_value(&self) -> ListenSequenceNumber {
        self.heap.peek().copied().unwrap_or(INVALID_SEQUENCE_NUMBER)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

/// Collects targets and documents through an [`LruReferenceDelegate`]
#[derive(Debug, Clone)]
pub struct LruGarbageCollector {
    params: LruParams,
}

impl LruGarbageCollector {
    pub fn new(params: LruParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &LruParams {
        &self.params
    }

    /// Runs a pass if the cache is over its byte budget or holds enough
    /// collectable sequence numbers
    pub fn collect(
        &self,
        delegate: &mut LruReferenceDelegate,
        state: &mut LocalState,
        live_targets: &FxHashSet<TargetId>,
    ) -> LruResults {
        if self.params.is_disabled() {
            debug!(target: "docsync::gc", "Garbage collection skipped; disabled");
            return LruResults::did_not_run();
        }

        let byte_size = delegate.byte_size(state);
        let count = delegate.sequence_number_count(state);
        let over_budget = byte_size as i64 >= self.params.min_bytes_threshold;
        let over_count = self.params.minimum_batches_to_collect > 0
            && count >= self.params.minimum_batches_to_collect;
        if !over_budget && !over_count {
            debug!(
                target: "docsync::gc",
                byte_size,
                threshold = self.params.min_bytes_threshold,
                sequence_numbers = count,
                "Garbage collection skipped; cache is below its thresholds"
            );
            return LruResults::did_not_run();
        }
        self.run_garbage_collection(delegate, state, live_targets)
    }

    /// Runs a pass unconditionally
    pub fn run_garbage_collection(
        &self,
        delegate: &mut LruReferenceDelegate,
        state: &mut LocalState,
        live_targets: &FxHashSet<TargetId>,
    ) -> LruResults {
        let start = Instant::now();
        let mut count = self.query_count(delegate, state, self.params.percentile_to_collect);
        if count > self.params.maximum_sequence_numbers_to_collect {
            debug!(
                target: "docsync::gc",
                requested = count,
                capped = self.params.maximum_sequence_numbers_to_collect,
                "Capping sequence numbers to collect"
            );
            count = self.params.maximum_sequence_numbers_to_collect;
        }
        let upper_bound = self.sequence_number_for_query_count(delegate, state, count);
        let targets_removed = delegate.remove_targets(state, upper_bound, live_targets);
        let documents_removed = delegate.remove_orphaned_documents(state, upper_bound);

        info!(
            target: "docsync::gc",
            sequence_numbers = count,
            upper_bound,
            targets_removed,
            documents_removed,
            elapsed_us = start.elapsed().as_micros() as u64,
            "LRU garbage collection finished"
        );
        LruResults {
            did_run: true,
            sequence_numbers_collected: count,
            targets_removed,
            documents_removed,
        }
    }

    /// How many sequence numbers `percentile` percent of the cache covers
    pub fn query_count(&self, delegate: &LruReferenceDelegate, state: &LocalState, percentile: u32) -> usize {
        let total = delegate.sequence_number_count(state);
        total * percentile.min(100) as usize / 100
    }

    /// The `count`-th smallest sequence number, or
    /// [`INVALID_SEQUENCE_NUMBER`] when `count` is 0
    pub fn sequence_number_for_query_count(
        &self,
        delegate: &LruReferenceDelegate,
        state: &LocalState,
        count: usize,
    ) -> ListenSequenceNumber {
        if count == 0 {
            return INVALID_SEQUENCE_NUMBER;
        }
        let mut buffer = RollingSequenceNumberBuffer::new(count);
        delegate.for_each_sequence_number(state, |seq| buffer.add_element(seq));
        buffer.max_value()
    }
}
