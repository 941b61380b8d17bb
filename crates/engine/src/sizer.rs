//! Byte-size estimates for the LRU garbage collector

use docsync_core::{Document, Mutation, MutationBatch};
use docsync_storage::TargetData;
use docsync_wire::encoded_object_len;

/// Reports how many bytes cached entries occupy
///
/// The collector compares the sum against its byte budget, so estimates only
/// need to be consistent, not exact.
pub trait Sizer: Send + Sync {
    fn document_size(&self, document: &Document) -> usize;

    fn target_size(&self, target: &TargetData) -> usize;

    fn batch_size(&self, batch: &MutationBatch) -> usize;
}

/// Sizes entries by their Value Codec encoding
#[derive(Debug, Clone, Copy, Default)]
pub struct EncodedSizer;

/// Version, flags and similar fixed-width fields
const FIXED_OVERHEAD: usize = 16;

impl EncodedSizer {
    fn mutation_size(mutation: &Mutation) -> usize {
        let key = mutation.key().path().canonical_string().len();
        match mutation {
            Mutation::Set { value, .. } => key + encoded_object_len(value),
            Mutation::Patch { value, mask, .. } => {
                key + encoded_object_len(value)
                    + mask.iter().map(|f| f.canonical_string().len()).sum::<usize>()
            }
            Mutation::Delete { .. } => key,
        }
    }
}

impl Sizer for EncodedSizer {
    fn document_size(&self, document: &Document) -> usize {
        let data = document.data().map(encoded_object_len).unwrap_or(0);
        document.key().path().canonical_string().len() + data + FIXED_OVERHEAD
    }

    fn target_size(&self, target: &TargetData) -> usize {
        target.query.canonical_id().len() + target.resume_token.len() + FIXED_OVERHEAD
    }

    fn batch_size(&self, batch: &MutationBatch) -> usize {
        let token = batch.stream_token().map(<[u8]>::len).unwrap_or(0);
        batch.mutations().iter().map(Self::mutation_size).sum::<usize>() + token + FIXED_OVERHEAD
    }
}
