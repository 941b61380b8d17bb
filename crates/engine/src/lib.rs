//! Local persistence engine for docsync
//!
//! This crate ties the storage components together:
//! - Persistence: the facade that owns all local state and runs transactions
//! - Mutation queues: pending local writes per user
//! - Reference delegates: eager or LRU reachability tracking
//! - LRU garbage collection
//! - Durability modes and recovery from a key-value backend
//! - Configuration via `docsync.toml`
//!
//! Only the facade mutates state. Components are reached through the
//! [`Transaction`] handle passed to [`Persistence::run_in_transaction`].

#![warn(clippy::all)]

pub mod config;
pub mod delegate;
pub mod durability;
pub mod gc;
pub mod listen_sequence;
pub mod mutation_queue;
pub mod persistence;
pub mod sizer;
pub mod state;

pub use config::{EngineConfig, GcPolicy, LruConfig, StorageConfig, CONFIG_FILE_NAME, LOG_FILE_NAME};
pub use delegate::{EagerReferenceDelegate, LruReferenceDelegate, ReferenceDelegate};
pub use durability::{BackendDurability, Durability, InMemoryDurability};
pub use gc::{GcError, LruGarbageCollector, LruParams, LruResults, RollingSequenceNumberBuffer};
pub use listen_sequence::ListenSequence;
pub use mutation_queue::MutationQueue;
pub use persistence::{Persistence, Transaction, COLLECT_GARBAGE_LABEL};
pub use sizer::{EncodedSizer, Sizer};
pub use state::LocalState;
