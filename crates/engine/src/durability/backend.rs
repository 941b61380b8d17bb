//! Backend durability: every commit is one atomic backend write

use super::Durability;
use docsync_core::Result;
use docsync_storage::{KvBackend, WriteBatch};
use std::sync::Arc;
use tracing::trace;

/// Writes committed batches to a [`KvBackend`]
pub struct BackendDurability {
    backend: Arc<dyn KvBackend>,
    sync_on_commit: bool,
}

impl BackendDurability {
    pub fn new(backend: Arc<dyn KvBackend>, sync_on_commit: bool) -> Self {
        Self {
            backend,
            sync_on_commit,
        }
    }

    pub fn backend(&self) -> &Arc<dyn KvBackend> {
        &self.backend
    }
}

impl Durability for BackendDurability {
    fn persist(&self, batch: WriteBatch) -> Result<()> {
        let ops = batch.len();
        self.backend.write(batch)?;
        if self.sync_on_commit {
            self.backend.flush()?;
        }
        trace!(target: "docsync::persistence", backend = self.backend.name(), ops, "Persisted commit");
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        self.backend.flush()
    }

    fn is_persistent(&self) -> bool {
        self.backend.is_persistent()
    }

    fn mode_name(&self) -> &'static str {
        "Backend"
    }
}

impl std::fmt::Debug for BackendDurability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendDurability")
            .field("backend", &self.backend.name())
            .field("sync_on_commit", &self.sync_on_commit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsync_storage::MemoryBackend;

    #[test]
    fn test_backend_durability_applies_batch() {
        let backend: Arc<dyn KvBackend> = Arc::new(MemoryBackend::new());
        let durability = BackendDurability::new(Arc::clone(&backend), true);
        let mut batch = WriteBatch::new();
        batch.put("documents", b"k".to_vec(), b"v".to_vec());
        durability.persist(batch).unwrap();
        assert_eq!(backend.get("documents", b"k").unwrap(), Some(b"v".to_vec()));
        assert!(!durability.is_persistent());
    }
}
