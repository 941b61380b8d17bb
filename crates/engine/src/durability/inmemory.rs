//! In-memory durability: committed state lives only in the caches

use super::Durability;
use docsync_core::Result;
use docsync_storage::WriteBatch;

/// Discards committed batches
#[derive(Debug, Default, Clone, Copy)]
pub struct InMemoryDurability;

impl Durability for InMemoryDurability {
    #[inline]
    fn persist(&self, _batch: WriteBatch) -> Result<()> {
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    fn is_persistent(&self) -> bool {
        false
    }

    fn mode_name(&self) -> &'static str {
        "InMemory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inmemory_persist_is_noop() {
        let durability = InMemoryDurability;
        let mut batch = WriteBatch::new();
        batch.put("documents", b"k".to_vec(), b"v".to_vec());
        assert!(durability.persist(batch).is_ok());
        assert!(!durability.is_persistent());
        assert_eq!(durability.mode_name(), "InMemory");
    }
}
