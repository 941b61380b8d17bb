//! Persistent (immutable) ordered collections
//!
//! This crate provides the copy-on-write maps every cache and index in docsync
//! is built on:
//! - [`SortedMap`]: immutable ordered map, array-backed while small and a
//!   persistent left-leaning red-black tree once it grows past [`FIXED_SIZE`]
//! - [`SortedSet`]: ordered set over `SortedMap<K, ()>`
//!
//! Every mutation returns a new value. Old values remain valid and may be
//! read from any thread without locking.

#![warn(clippy::all)]

pub mod array_map;
pub mod sorted_map;
pub mod sorted_set;
pub mod tree_map;

pub use array_map::FIXED_SIZE;
pub use sorted_map::{Iter, SortedMap};
pub use sorted_set::{SetIter, SortedSet};
