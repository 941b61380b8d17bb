//! Existence filters: the server's summary of a target's result set
//!
//! After a reconnect the server reports how many documents match a target,
//! optionally with a bloom filter of their paths. The client compares the
//! count with its own cached keys for the target. With a usable bloom filter
//! it can evict exactly the keys the server no longer has instead of
//! discarding the whole target.

use crate::bloom_filter::BloomFilter;
use docsync_core::{DocumentKey, DocumentKeySet};
use tracing::{debug, warn};

/// Raw bloom filter fields as received from the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilterParams {
    pub bitmap: Vec<u8>,
    pub padding: i32,
    pub hash_count: i32,
}

/// Server-side document count for a target, with an optional bloom filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistenceFilter {
    count: usize,
    bloom_filter: Option<BloomFilterParams>,
}

/// Result of reconciling local keys against an existence filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExistenceFilterOutcome {
    /// Local count already equals the server count
    Match,
    /// Removing the keys the filter rules out makes the counts agree
    BloomFilterApplied { removed: Vec<DocumentKey> },
    /// Keys were removed but the counts still disagree (filter false
    /// positives); the target must be re-listened
    FalsePositive { removed: Vec<DocumentKey> },
    /// No usable bloom filter; only the count is known, so the target must
    /// be re-listened
    Skipped,
}

impl ExistenceFilterOutcome {
    /// Keys to evict from the target's local view
    pub fn removed_keys(&self) -> &[DocumentKey] {
        match self {
            ExistenceFilterOutcome::BloomFilterApplied { removed }
            | ExistenceFilterOutcome::FalsePositive { removed } => removed,
            _ => &[],
        }
    }

    /// True if the local view is known to agree with the server
    pub fn is_consistent(&self) -> bool {
        matches!(
            self,
            ExistenceFilterOutcome::Match | ExistenceFilterOutcome::BloomFilterApplied { .. }
        )
    }
}

impl ExistenceFilter {
    pub fn new(count: usize, bloom_filter: Option<BloomFilterParams>) -> Self {
        Self {
            count,
            bloom_filter,
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// The validated bloom filter, or `None` if absent or malformed
    pub fn bloom_filter(&self) -> Option<BloomFilter> {
        let params = self.bloom_filter.as_ref()?;
        match BloomFilter::new(params.bitmap.clone(), params.padding, params.hash_count) {
            Ok(filter) => Some(filter),
            Err(e) => {
                warn!(target: "docsync::wire", error = %e, "Ignoring invalid bloom filter");
                None
            }
        }
    }

    /// Compares `local_keys` with the server's view
    pub fn check(&self, local_keys: &DocumentKeySet) -> ExistenceFilterOutcome {
        if local_keys.len() == self.count {
            return ExistenceFilterOutcome::Match;
        }
        let Some(filter) = self.bloom_filter() else {
            return ExistenceFilterOutcome::Skipped;
        };
        if filter.bit_count() == 0 {
            debug!(target: "docsync::wire", "Empty bloom filter, falling back to count");
            return ExistenceFilterOutcome::Skipped;
        }

        let removed: Vec<DocumentKey> = local_keys
            .iter()
            .filter(|key| !filter.might_contain_key(key))
            .cloned()
            .collect();
        let remaining = local_keys.len() - removed.len();
        debug!(
            target: "docsync::wire",
            expected = self.count,
            local = local_keys.len(),
            removed = removed.len(),
            "Applied bloom filter"
        );
        if remaining == self.count {
            ExistenceFilterOutcome::BloomFilterApplied { removed }
        } else {
            ExistenceFilterOutcome::FalsePositive { removed }
        }
    }
}
