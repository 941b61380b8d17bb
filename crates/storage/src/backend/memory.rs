//! In-memory backend

use super::{BatchOp, KvBackend, WriteBatch};
use docsync_core::Result;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

pub(crate) type Table = BTreeMap<Vec<u8>, Vec<u8>>;
pub(crate) type Tables = FxHashMap<String, Table>;

/// Applies a batch to in-memory tables
pub(crate) fn apply_batch(tables: &mut Tables, batch: &WriteBatch) {
    for op in batch.ops() {
        match op {
            BatchOp::Put { table, key, value } => {
                tables
                    .entry(table.clone())
                    .or_default()
                    .insert(key.clone(), value.clone());
            }
            BatchOp::Delete { table, key } => {
                if let Some(t) = tables.get_mut(table) {
                    t.remove(key);
                }
            }
        }
    }
}

/// Ordered tables kept in memory only
#[derive(Default)]
pub struct MemoryBackend {
    tables: RwLock<Tables>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvBackend for MemoryBackend {
    fn get(&self, table: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self
            .tables
            .read()
            .get(table)
            .and_then(|t| t.get(key).cloned()))
    }

    fn scan(&self, table: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .tables
            .read()
            .get(table)
            .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    fn scan_prefix(&self, table: &str, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let tables = self.tables.read();
        let Some(t) = tables.get(table) else {
            return Ok(Vec::new());
        };
        Ok(t.range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        apply_batch(&mut self.tables.write(), &batch);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }

    fn is_persistent(&self) -> bool {
        false
    }
}
