//! Array-backed immutable sorted map
//!
//! Small maps keep their entries sorted in a fixed-capacity array that lives
//! inline behind an `Arc`. Mutations build a fresh array from the untouched
//! prefix, the new entry, and the untouched suffix; the original array is
//! never written after construction, so any number of readers may share it.
//!
//! The capacity is bounded by [`FIXED_SIZE`]. Exceeding it is a contract
//! violation: [`SortedMap`](crate::SortedMap) promotes to a tree before an
//! insert could overflow.

use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

/// Maximum number of entries held by an array-backed map.
pub const FIXED_SIZE: usize = 25;

/// A bounded array that stores up to [`FIXED_SIZE`] elements inline.
///
/// Unlike `Vec`, appending past the capacity is not a reallocation but an
/// assertion failure.
#[derive(Clone)]
pub(crate) struct FixedArray<T> {
    items: SmallVec<[T; FIXED_SIZE]>,
}

impl<T: Clone> FixedArray<T> {
    fn new() -> Self {
        Self {
            items: SmallVec::new(),
        }
    }

    /// Appends clones of `src` to the end of the array.
    fn append_slice(&mut self, src: &[T]) {
        let new_len = self.items.len() + src.len();
        assert!(
            new_len <= FIXED_SIZE,
            "FixedArray overflow: {} entries exceeds capacity {}",
            new_len,
            FIXED_SIZE
        );
        self.items.extend(src.iter().cloned());
    }

    /// Appends a single element.
    fn append(&mut self, value: T) {
        assert!(
            self.items.len() < FIXED_SIZE,
            "FixedArray overflow: capacity {} already used",
            FIXED_SIZE
        );
        self.items.push(value);
    }
}

impl<T> FixedArray<T> {
    fn as_slice(&self) -> &[T] {
        &self.items
    }
}

/// Immutable sorted map over a shared fixed-size array.
pub struct ArraySortedMap<K, V> {
    entries: Arc<FixedArray<(K, V)>>,
}

impl<K, V> Clone for ArraySortedMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<K: Clone, V: Clone> Default for ArraySortedMap<K, V> {
    fn default() -> Self {
        Self::wrap(FixedArray::new())
    }
}

impl<K: Clone, V: Clone> ArraySortedMap<K, V> {
    fn wrap(array: FixedArray<(K, V)>) -> Self {
        Self {
            entries: Arc::new(array),
        }
    }
}

impl<K, V> ArraySortedMap<K, V> {
    /// All entries in ascending key order.
    pub fn entries(&self) -> &[(K, V)] {
        self.entries.as_slice()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// True if the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if both maps share the same backing array.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }
}

impl<K: Ord, V> ArraySortedMap<K, V> {
    /// Index of the first entry whose key is not less than `key`.
    pub(crate) fn lower_bound(&self, key: &K) -> usize {
        self.entries().partition_point(|(k, _)| k < key)
    }

    /// Position of `key`, if present.
    pub fn find_index(&self, key: &K) -> Option<usize> {
        let pos = self.lower_bound(key);
        match self.entries().get(pos) {
            Some((k, _)) if k == key => Some(pos),
            _ => None,
        }
    }

    /// Looks up the value stored under `key`.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.find_index(key).map(|pos| &self.entries()[pos].1)
    }

    /// Entries starting at the first key not less than `key`.
    pub fn entries_from(&self, key: &K) -> &[(K, V)] {
        let pos = self.lower_bound(key);
        &self.entries()[pos..]
    }
}

impl<K: Ord + Clone, V: Clone + PartialEq> ArraySortedMap<K, V> {
    /// Returns a map with `key` bound to `value`.
    ///
    /// Re-inserting an existing key with an equal value returns a map sharing
    /// this map's storage.
    pub fn insert(&self, key: K, value: V) -> Self {
        let entries = self.entries();
        let pos = self.lower_bound(&key);
        let replacing = matches!(entries.get(pos), Some((k, _)) if *k == key);

        if replacing && entries[pos].1 == value {
            return self.clone();
        }

        let mut copy = FixedArray::new();
        copy.append_slice(&entries[..pos]);
        copy.append((key, value));
        let resume = if replacing { pos + 1 } else { pos };
        copy.append_slice(&entries[resume..]);
        Self::wrap(copy)
    }

    /// Returns a map without `key`. Erasing a missing key shares storage.
    pub fn erase(&self, key: &K) -> Self {
        let Some(pos) = self.find_index(key) else {
            return self.clone();
        };
        let entries = self.entries();
        let mut copy = FixedArray::new();
        copy.append_slice(&entries[..pos]);
        copy.append_slice(&entries[pos + 1..]);
        Self::wrap(copy)
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for ArraySortedMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries().iter().map(|(k, v)| (k, v)))
            .finish()
    }
}
