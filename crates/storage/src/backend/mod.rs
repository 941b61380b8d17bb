//! Durable key-value backend contract
//!
//! The durable persistence variant stores its records in named tables of an
//! ordered key-value store. Any store that provides point reads, ordered
//! scans within a table and atomic multi-key writes can back it.
//!
//! Two implementations ship here:
//! - [`MemoryBackend`]: tables in memory, nothing survives the process
//! - [`LogBackend`]: tables in memory, every batch appended to a checksummed
//!   log file that is replayed on open

mod log;
mod memory;

pub use self::log::{LogBackend, LogOptions};
pub use self::memory::MemoryBackend;

use docsync_core::Result;

/// A single write inside a [`WriteBatch`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Store `value` under `key` in `table`
    Put {
        table: String,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    /// Remove `key` from `table`
    Delete { table: String, key: Vec<u8> },
}

/// Writes applied together: either all of them become visible or none do
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, table: &str, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put {
            table: table.to_owned(),
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn delete(&mut self, table: &str, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete {
            table: table.to_owned(),
            key: key.into(),
        });
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Ordered key-value store partitioned into tables
///
/// Implementations must be safe to share between threads. `write` is atomic:
/// a crash or error never leaves part of a batch applied.
pub trait KvBackend: Send + Sync {
    /// Read one value
    fn get(&self, table: &str, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// All entries of `table` in ascending key order
    fn scan(&self, table: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Entries of `table` whose key starts with `prefix`, ascending
    fn scan_prefix(&self, table: &str, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .scan(table)?
            .into_iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .collect())
    }

    /// Apply every op of `batch` atomically
    fn write(&self, batch: WriteBatch) -> Result<()>;

    /// Store one value
    fn put(&self, table: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(table, key, value);
        self.write(batch)
    }

    /// Remove one value
    fn delete(&self, table: &str, key: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(table, key);
        self.write(batch)
    }

    /// Make every completed write durable
    fn flush(&self) -> Result<()>;

    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// True if data survives the process
    fn is_persistent(&self) -> bool;
}
