//! The public persistent sorted map
//!
//! [`SortedMap`] starts out array-backed and switches to the tree once an
//! insert would grow it past [`FIXED_SIZE`]. A tree-backed map is never
//! demoted back to an array, even if erasures shrink it.

use crate::array_map::{ArraySortedMap, FIXED_SIZE};
use crate::tree_map::{TreeIter, TreeSortedMap};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::iter::FromIterator;

enum Repr<K, V> {
    Array(ArraySortedMap<K, V>),
    Tree(TreeSortedMap<K, V>),
}

impl<K, V> Clone for Repr<K, V> {
    fn clone(&self) -> Self {
        match self {
            Repr::Array(a) => Repr::Array(a.clone()),
            Repr::Tree(t) => Repr::Tree(t.clone()),
        }
    }
}

/// An immutable map ordered by key.
///
/// `insert` and `erase` return a new map; `self` is left untouched and keeps
/// sharing whatever storage the new map did not have to copy. Cloning is an
/// `Arc` bump.
pub struct SortedMap<K, V> {
    repr: Repr<K, V>,
}

impl<K, V> Clone for SortedMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            repr: self.repr.clone(),
        }
    }
}

impl<K: Clone, V: Clone> Default for SortedMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Clone, V: Clone> SortedMap<K, V> {
    /// Creates an empty, array-backed map.
    pub fn new() -> Self {
        Self {
            repr: Repr::Array(ArraySortedMap::default()),
        }
    }
}

impl<K, V> SortedMap<K, V> {
    pub fn len(&self) -> usize {
        match &self.repr {
            Repr::Array(a) => a.len(),
            Repr::Tree(t) => t.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if both maps share the same underlying storage.
    ///
    /// Maps that are `ptr_eq` are always equal; the converse does not hold.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.repr, &other.repr) {
            (Repr::Array(a), Repr::Array(b)) => a.ptr_eq(b),
            (Repr::Tree(a), Repr::Tree(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Entries in ascending key order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        match &self.repr {
            Repr::Array(a) => Iter::Array(a.entries().iter()),
            Repr::Tree(t) => Iter::Tree(t.iter()),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> + '_ {
        self.iter().map(|(_, v)| v)
    }

    /// Smallest entry.
    pub fn first(&self) -> Option<(&K, &V)> {
        match &self.repr {
            Repr::Array(a) => a.entries().first().map(|(k, v)| (k, v)),
            Repr::Tree(t) => t.first(),
        }
    }

    /// Largest entry.
    pub fn last(&self) -> Option<(&K, &V)> {
        match &self.repr {
            Repr::Array(a) => a.entries().last().map(|(k, v)| (k, v)),
            Repr::Tree(t) => t.last(),
        }
    }

    /// True while the map is still held in the flat array backing.
    pub fn is_array_backed(&self) -> bool {
        matches!(self.repr, Repr::Array(_))
    }
}

impl<K: Ord, V> SortedMap<K, V> {
    pub fn get(&self, key: &K) -> Option<&V> {
        match &self.repr {
            Repr::Array(a) => a.get(key),
            Repr::Tree(t) => t.get(key),
        }
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Position of `key` in iteration order.
    pub fn find_index(&self, key: &K) -> Option<usize> {
        match &self.repr {
            Repr::Array(a) => a.find_index(key),
            Repr::Tree(t) => t.find_index(key),
        }
    }

    /// Entries whose key is not less than `key`, in ascending order.
    pub fn iter_from(&self, key: &K) -> Iter<'_, K, V> {
        match &self.repr {
            Repr::Array(a) => Iter::Array(a.entries_from(key).iter()),
            Repr::Tree(t) => Iter::Tree(t.iter_from(key)),
        }
    }
}

impl<K: Ord + Clone, V: Clone + PartialEq> SortedMap<K, V> {
    /// Returns a map with `key` bound to `value`.
    ///
    /// If `key` is already bound to an equal value, the returned map shares
    /// this map's storage and nothing is allocated.
    #[must_use = "insert returns a new map and leaves the original unchanged"]
    pub fn insert(&self, key: K, value: V) -> Self {
        match &self.repr {
            Repr::Array(a) => {
                if a.len() >= FIXED_SIZE && a.find_index(&key).is_none() {
                    let tree = TreeSortedMap::from_sorted(a.entries());
                    return Self {
                        repr: Repr::Tree(tree.insert(key, value)),
                    };
                }
                Self {
                    repr: Repr::Array(a.insert(key, value)),
                }
            }
            Repr::Tree(t) => {
                if t.get(&key) == Some(&value) {
                    return self.clone();
                }
                Self {
                    repr: Repr::Tree(t.insert(key, value)),
                }
            }
        }
    }

    /// Returns a map without `key`. Erasing an absent key returns a map
    /// sharing this map's storage.
    #[must_use = "erase returns a new map and leaves the original unchanged"]
    pub fn erase(&self, key: &K) -> Self {
        let repr = match &self.repr {
            Repr::Array(a) => Repr::Array(a.erase(key)),
            Repr::Tree(t) => Repr::Tree(t.erase(key)),
        };
        Self { repr }
    }
}

impl<K: Ord + Clone, V: Clone + PartialEq> FromIterator<(K, V)> for SortedMap<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::new(), |map, (k, v)| map.insert(k, v))
    }
}

impl<K: PartialEq, V: PartialEq> PartialEq for SortedMap<K, V> {
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

impl<K: Eq, V: Eq> Eq for SortedMap<K, V> {}

impl<K: PartialOrd, V: PartialOrd> PartialOrd for SortedMap<K, V> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.iter().partial_cmp(other.iter())
    }
}

impl<K: Ord, V: Ord> Ord for SortedMap<K, V> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.iter().cmp(other.iter())
    }
}

impl<K: Hash, V: Hash> Hash for SortedMap<K, V> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(self.len());
        for (k, v) in self.iter() {
            k.hash(state);
            v.hash(state);
        }
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for SortedMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<'a, K, V> IntoIterator for &'a SortedMap<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Ascending iterator over a [`SortedMap`].
pub enum Iter<'a, K, V> {
    Array(std::slice::Iter<'a, (K, V)>),
    Tree(TreeIter<'a, K, V>),
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Iter::Array(it) => it.next().map(|(k, v)| (k, v)),
            Iter::Tree(it) => it.next(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(map: &SortedMap<i32, i32>) -> Vec<(i32, i32)> {
        map.iter().map(|(k, v)| (*k, *v)).collect()
    }

    // ========================================
    // Backing promotion
    // ========================================

    #[test]
    fn test_promotes_past_fixed_size() {
        let map: SortedMap<i32, i32> = (0..FIXED_SIZE as i32).map(|k| (k, k)).collect();
        assert!(map.is_array_backed());

        let bigger = map.insert(FIXED_SIZE as i32, 0);
        assert!(!bigger.is_array_backed());
        assert_eq!(bigger.len(), FIXED_SIZE + 1);
        assert!(map.is_array_backed());
        assert_eq!(map.len(), FIXED_SIZE);
    }

    #[test]
    fn test_overwrite_in_full_array_does_not_promote() {
        let map: SortedMap<i32, i32> = (0..FIXED_SIZE as i32).map(|k| (k, k)).collect();
        let replaced = map.insert(3, 300);
        assert!(replaced.is_array_backed());
        assert_eq!(replaced.get(&3), Some(&300));
    }

    #[test]
    fn test_tree_is_not_demoted() {
        let mut map: SortedMap<i32, i32> = (0..40).map(|k| (k, k)).collect();
        for k in 0..39 {
            map = map.erase(&k);
        }
        assert_eq!(map.len(), 1);
        assert!(!map.is_array_backed());
    }

    // ========================================
    // Identity sharing
    // ========================================

    #[test]
    fn test_equal_insert_shares_storage_in_both_backings() {
        let small: SortedMap<i32, i32> = (0..5).map(|k| (k, k)).collect();
        assert!(small.ptr_eq(&small.insert(2, 2)));

        let large: SortedMap<i32, i32> = (0..100).map(|k| (k, k)).collect();
        assert!(large.ptr_eq(&large.insert(50, 50)));
        assert!(!large.ptr_eq(&large.insert(50, 51)));
    }

    #[test]
    fn test_insert_then_erase_on_empty() {
        let empty: SortedMap<i32, i32> = SortedMap::new();
        let map = empty.insert(1, 1).erase(&1);
        assert!(map.is_empty());
        assert_eq!(map, empty);
    }

    // ========================================
    // Reads
    // ========================================

    #[test]
    fn test_first_last_across_backings() {
        let small: SortedMap<i32, i32> = [(3, 0), (1, 0), (2, 0)].into_iter().collect();
        assert_eq!(small.first().map(|(k, _)| *k), Some(1));
        assert_eq!(small.last().map(|(k, _)| *k), Some(3));

        let large: SortedMap<i32, i32> = (10..200).rev().map(|k| (k, 0)).collect();
        assert_eq!(large.first().map(|(k, _)| *k), Some(10));
        assert_eq!(large.last().map(|(k, _)| *k), Some(199));

        let empty: SortedMap<i32, i32> = SortedMap::new();
        assert!(empty.first().is_none());
        assert!(empty.last().is_none());
    }

    #[test]
    fn test_iterator_survives_later_mutation() {
        let map: SortedMap<i32, i32> = (0..50).map(|k| (k, k)).collect();
        let mut iter = map.iter();
        let first = iter.next().map(|(k, _)| *k);
        let changed = map.erase(&10).insert(100, 100);
        let rest: Vec<i32> = iter.map(|(k, _)| *k).collect();
        assert_eq!(first, Some(0));
        assert_eq!(rest, (1..50).collect::<Vec<_>>());
        assert_eq!(changed.len(), 50);
    }

    #[test]
    fn test_equality_and_ordering_ignore_backing() {
        let array: SortedMap<i32, i32> = (0..10).map(|k| (k, k)).collect();
        let mut tree: SortedMap<i32, i32> = (0..40).map(|k| (k, k)).collect();
        for k in 10..40 {
            tree = tree.erase(&k);
        }
        assert!(!tree.is_array_backed());
        assert_eq!(array, tree);
        assert_eq!(array.cmp(&tree), Ordering::Equal);
        assert_eq!(collect(&array), collect(&tree));

        let bigger = array.insert(5, 6);
        assert!(array < bigger);
    }
}
