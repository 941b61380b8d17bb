//! Core types for docsync
//!
//! This crate defines the model shared by every layer of the persistence
//! engine:
//! - Error: error type hierarchy
//! - ResourcePath / DocumentKey / User / ids: identifiers (`types`)
//! - FieldValue / ObjectValue: typed document contents (`value`)
//! - Document: cached document or tombstone
//! - Mutation / MutationBatch: pending local writes
//! - Query: the document scope a watched target covers
//! - ThreadSafeMemoizer: compute-once cache shared across threads

#![warn(clippy::all)]

pub mod document;
pub mod error;
pub mod memoizer;
pub mod mutation;
pub mod query;
pub mod types;
pub mod value;

pub use document::Document;
pub use error::{Error, Result};
pub use memoizer::ThreadSafeMemoizer;
pub use mutation::{Mutation, MutationBatch};
pub use query::Query;
pub use types::{
    BatchId, DocumentKey, DocumentKeySet, ListenSequenceNumber, ResourcePath, SnapshotVersion,
    TargetId, User, BATCH_ID_UNKNOWN, INVALID_SEQUENCE_NUMBER,
};
pub use value::{FieldPath, FieldValue, ObjectValue};
