//! Sync-boundary encodings for docsync
//!
//! - `codec`: length-delimited binary encoding of field values
//! - `writer` / `reader`: protobuf-style primitives the codec is built on
//! - `bloom_filter` / `existence_filter`: server summaries used to detect
//!   documents the local cache holds but the server no longer has

#![warn(clippy::all)]

pub mod bloom_filter;
pub mod codec;
pub mod error;
pub mod existence_filter;
pub mod reader;
pub mod writer;

pub use bloom_filter::{BloomFilter, BloomFilterError};
pub use codec::{
    decode_object, decode_value, encode_object, encode_value, encoded_len, encoded_object_len,
    MAX_NESTING_DEPTH,
};
pub use error::{DecodeError, EncodeError};
pub use existence_filter::{BloomFilterParams, ExistenceFilter, ExistenceFilterOutcome};
