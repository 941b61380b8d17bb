//! docsync - local persistence engine for an offline-first document sync client
//!
//! docsync keeps a client's cached documents, listen targets and pending
//! writes, and decides when cached documents may be dropped.
//!
//! # Quick Start
//!
//! ```ignore
//! use docsync::{Document, DocumentKey, Persistence, SnapshotVersion, ObjectValue};
//!
//! let persistence = Persistence::with_eager_gc();
//! persistence.run_in_transaction("Add document", |txn| {
//!     let key = DocumentKey::parse("rooms/eros")?;
//!     txn.document_cache().add(Document::found(key.clone(), SnapshotVersion::NONE, ObjectValue::new()));
//!     txn.add_local_view_reference(&key, 1);
//!     Ok(())
//! })?;
//! ```
//!
//! # Architecture
//!
//! - `docsync-immutable`: persistent sorted map and set
//! - `docsync-core`: keys, values, documents, mutations, queries, errors
//! - `docsync-wire`: value codec, bloom filter, existence filter
//! - `docsync-storage`: caches, reference sets and key-value backends
//! - `docsync-engine`: persistence facade, mutation queues, garbage collection

pub use docsync_core::{
    BatchId, Document, DocumentKey, DocumentKeySet, Error, FieldPath, FieldValue,
    ListenSequenceNumber, Mutation, MutationBatch, ObjectValue, Query, ResourcePath, Result,
    SnapshotVersion, TargetId, ThreadSafeMemoizer, User,
};
pub use docsync_engine::{
    EagerReferenceDelegate, EngineConfig, GcError, GcPolicy, LruGarbageCollector, LruParams,
    LruReferenceDelegate, LruResults, MutationQueue, Persistence, ReferenceDelegate, Sizer,
    EncodedSizer, Transaction,
};
pub use docsync_immutable::{SortedMap, SortedSet};
pub use docsync_storage::{KvBackend, LogBackend, LogOptions, MemoryBackend, TargetData};
pub use docsync_wire::{
    decode_value, encode_value, BloomFilter, BloomFilterParams, DecodeError, ExistenceFilter,
    ExistenceFilterOutcome,
};
