//! Durability modes
//!
//! A committed transaction turns its dirty state into one [`WriteBatch`].
//! The durability mode decides what happens to it:
//!
//! | Mode | Backend write | Flush |
//! |------|---------------|-------|
//! | InMemory | None | None |
//! | Backend | Atomic batch | Every commit if `sync_on_commit` |
//!
//! [`WriteBatch`]: docsync_storage::WriteBatch

mod backend;
mod inmemory;

pub use backend::BackendDurability;
pub use inmemory::InMemoryDurability;

use docsync_core::Result;
use docsync_storage::WriteBatch;

/// Persistence strategy for committed transactions
pub trait Durability: Send + Sync {
    /// Persist one committed transaction
    ///
    /// # Errors
    /// Returns an error if the backend write or flush fails.
    fn persist(&self, batch: WriteBatch) -> Result<()>;

    /// Flush anything still pending; called on shutdown
    fn shutdown(&self) -> Result<()>;

    /// True if data survives a process restart
    fn is_persistent(&self) -> bool;

    /// Mode name for logging
    fn mode_name(&self) -> &'static str;
}
