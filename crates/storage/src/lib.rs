//! Storage layer for docsync
//!
//! This crate holds everything the persistence facade keeps state in:
//! - KvBackend: durable key-value contract with `MemoryBackend` and the
//!   append-only `LogBackend`
//! - DocumentCache: remote documents in a persistent sorted map
//! - TargetCache: watched queries and their matching keys
//! - IndexManager: collection-parent index for collection-group queries
//! - GlobalsCache: session token
//! - DocumentReferenceSet / ReferenceSet: reference and LRU stamp indexes
//! - Changes: per-commit dirty tracking consumed by durable persistence

#![warn(clippy::all)]

pub mod backend;
pub mod changes;
pub mod document_cache;
pub mod document_references;
pub mod globals_cache;
pub mod index_manager;
pub mod sequence_references;
pub mod target_cache;

pub use backend::{BatchOp, KvBackend, LogBackend, LogOptions, MemoryBackend, WriteBatch};
pub use changes::{Change, Changes};
pub use document_cache::{DocumentCache, DocumentMap};
pub use document_references::DocumentReferenceSet;
pub use globals_cache::GlobalsCache;
pub use index_manager::IndexManager;
pub use sequence_references::ReferenceSet;
pub use target_cache::{TargetCache, TargetData, TargetGlobals};
