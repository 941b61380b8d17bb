//! Engine configuration via `docsync.toml`
//!
//! The config picks the garbage-collection policy and where committed state
//! goes. On first open a commented default file can be written next to the
//! data; edit it and reopen to change settings.

use crate::gc::LruParams;
use docsync_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config file name placed in the data directory.
pub const CONFIG_FILE_NAME: &str = "docsync.toml";

/// Log file name used by disk storage.
pub const LOG_FILE_NAME: &str = "docsync.log";

/// LRU collector settings, the `[lru]` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LruConfig {
    /// Cache size in bytes that triggers collection; -1 disables collection
    #[serde(default = "default_min_bytes_threshold")]
    pub min_bytes_threshold: i64,
    /// Percent of sequence numbers collected per pass
    #[serde(default = "default_percentile")]
    pub percentile_to_collect: u32,
    /// Cap on sequence numbers collected per pass
    #[serde(default = "default_max_sequence_numbers")]
    pub maximum_sequence_numbers_to_collect: usize,
    /// Collectable sequence numbers that trigger a pass; 0 turns this off
    #[serde(default)]
    pub minimum_batches_to_collect: usize,
}

fn default_min_bytes_threshold() -> i64 {
    LruParams::DEFAULT_CACHE_SIZE_BYTES
}

fn default_percentile() -> u32 {
    LruParams::DEFAULT_PERCENTILE
}

fn default_max_sequence_numbers() -> usize {
    LruParams::DEFAULT_MAX_SEQUENCE_NUMBERS
}

impl Default for LruConfig {
    fn default() -> Self {
        Self {
            min_bytes_threshold: default_min_bytes_threshold(),
            percentile_to_collect: default_percentile(),
            maximum_sequence_numbers_to_collect: default_max_sequence_numbers(),
            minimum_batches_to_collect: 0,
        }
    }
}

/// Storage settings, the `[storage]` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// `"memory"` or `"disk"`
    #[serde(default = "default_storage_mode")]
    pub mode: String,
    /// Data directory for disk storage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// fsync after every committed transaction
    #[serde(default = "default_true")]
    pub sync_on_commit: bool,
    /// Rewrite the log once it grows past this size; 0 disables
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold_bytes: u64,
}

fn default_storage_mode() -> String {
    "memory".to_string()
}

fn default_true() -> bool {
    true
}

fn default_compaction_threshold() -> u64 {
    64 * 1024 * 1024
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            mode: default_storage_mode(),
            path: None,
            sync_on_commit: true,
            compaction_threshold_bytes: default_compaction_threshold(),
        }
    }
}

/// Engine configuration loaded from `docsync.toml`.
///
/// # Example
///
/// ```toml
/// garbage_collector = "lru"
///
/// [lru]
/// min_bytes_threshold = 104857600
/// percentile_to_collect = 10
///
/// [storage]
/// mode = "disk"
/// path = "/var/lib/app/docsync"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// `"eager"` (default) or `"lru"`
    #[serde(default = "default_garbage_collector")]
    pub garbage_collector: String,
    #[serde(default)]
    pub lru: LruConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

fn default_garbage_collector() -> String {
    "eager".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            garbage_collector: default_garbage_collector(),
            lru: LruConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// Garbage-collection policy named by the config
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcPolicy {
    Eager,
    Lru(LruParams),
}

impl EngineConfig {
    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# docsync engine configuration
#
# Garbage collector: "eager" (default) or "lru"
#   "eager" = delete documents as soon as nothing references them
#   "lru"   = keep them and collect least recently used ones when the
#             cache grows past its budget
garbage_collector = "eager"

[lru]
# Cache size in bytes that triggers collection (-1 disables collection)
min_bytes_threshold = 104857600
# Percent of sequence numbers collected per pass
percentile_to_collect = 10
# Cap on sequence numbers collected per pass
maximum_sequence_numbers_to_collect = 1000
# Collect once this many sequence numbers are collectable (0 = off)
minimum_batches_to_collect = 0

[storage]
# "memory" (default) or "disk"
mode = "memory"
# Data directory, required for "disk"
# path = "/var/lib/app/docsync"
sync_on_commit = true
compaction_threshold_bytes = 67108864
"#
    }

    /// Check every value
    ///
    /// # Errors
    /// Returns `InvalidInput` naming the first bad setting.
    pub fn validate(&self) -> Result<()> {
        self.gc_policy()?;
        match self.storage.mode.as_str() {
            "memory" => {}
            "disk" => {
                if self.storage.path.is_none() {
                    return Err(Error::InvalidInput(
                        "storage mode \"disk\" requires storage.path in docsync.toml".to_string(),
                    ));
                }
            }
            other => {
                return Err(Error::InvalidInput(format!(
                    "Invalid storage mode '{}' in docsync.toml. Expected \"memory\" or \"disk\".",
                    other
                )))
            }
        }
        Ok(())
    }

    /// The `[lru]` table as collector parameters
    ///
    /// # Errors
    /// Returns `InvalidInput` for a percentile above 100 or a negative
    /// threshold other than -1.
    pub fn lru_params(&self) -> Result<LruParams> {
        let lru = &self.lru;
        if lru.percentile_to_collect > 100 {
            return Err(Error::InvalidInput(format!(
                "lru.percentile_to_collect must be at most 100, got {}",
                lru.percentile_to_collect
            )));
        }
        if lru.min_bytes_threshold < 0 && lru.min_bytes_threshold != LruParams::DISABLED {
            return Err(Error::InvalidInput(format!(
                "lru.min_bytes_threshold must be non-negative or -1, got {}",
                lru.min_bytes_threshold
            )));
        }
        Ok(LruParams {
            min_bytes_threshold: lru.min_bytes_threshold,
            percentile_to_collect: lru.percentile_to_collect,
            maximum_sequence_numbers_to_collect: lru.maximum_sequence_numbers_to_collect,
            minimum_batches_to_collect: lru.minimum_batches_to_collect,
        })
    }

    /// Parse the garbage collector setting.
    pub fn gc_policy(&self) -> Result<GcPolicy> {
        match self.garbage_collector.as_str() {
            "eager" => Ok(GcPolicy::Eager),
            "lru" => Ok(GcPolicy::Lru(self.lru_params()?)),
            other => Err(Error::InvalidInput(format!(
                "Invalid garbage collector '{}' in docsync.toml. Expected \"eager\" or \"lru\".",
                other
            ))),
        }
    }

    /// Path of the log file for disk storage
    pub fn log_path(&self) -> Option<PathBuf> {
        self.storage.path.as_ref().map(|dir| dir.join(LOG_FILE_NAME))
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content).map_err(|e| {
            Error::InvalidInput(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml())?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
