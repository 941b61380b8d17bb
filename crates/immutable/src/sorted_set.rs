use crate::sorted_map::{Iter as MapIter, SortedMap};
use std::fmt;
use std::iter::FromIterator;

/// An immutable ordered set built on [`SortedMap`].
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SortedSet<K> {
    map: SortedMap<K, ()>,
}

impl<K: Clone> Default for SortedSet<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Clone> SortedSet<K> {
    pub fn new() -> Self {
        Self {
            map: SortedMap::new(),
        }
    }
}

impl<K> SortedSet<K> {
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> SetIter<'_, K> {
        SetIter {
            inner: self.map.iter(),
        }
    }

    pub fn first(&self) -> Option<&K> {
        self.map.first().map(|(k, _)| k)
    }

    pub fn last(&self) -> Option<&K> {
        self.map.last().map(|(k, _)| k)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.map.ptr_eq(&other.map)
    }
}

impl<K: Ord> SortedSet<K> {
    pub fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    pub fn find_index(&self, key: &K) -> Option<usize> {
        self.map.find_index(key)
    }

    /// Elements not less than `key`, ascending.
    pub fn iter_from(&self, key: &K) -> SetIter<'_, K> {
        SetIter {
            inner: self.map.iter_from(key),
        }
    }
}

impl<K: Ord + Clone> SortedSet<K> {
    #[must_use = "insert returns a new set and leaves the original unchanged"]
    pub fn insert(&self, key: K) -> Self {
        Self {
            map: self.map.insert(key, ()),
        }
    }

    #[must_use = "erase returns a new set and leaves the original unchanged"]
    pub fn erase(&self, key: &K) -> Self {
        Self {
            map: self.map.erase(key),
        }
    }

    /// Returns the union of both sets. The larger set's storage is the base.
    pub fn union(&self, other: &Self) -> Self {
        let (base, extra) = if self.len() >= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        extra
            .iter()
            .fold(base.clone(), |acc, k| acc.insert(k.clone()))
    }
}

impl<K: Ord + Clone> FromIterator<K> for SortedSet<K> {
    fn from_iter<I: IntoIterator<Item = K>>(iter: I) -> Self {
        iter.into_iter().fold(Self::new(), |set, k| set.insert(k))
    }
}

impl<K: fmt::Debug> fmt::Debug for SortedSet<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<'a, K> IntoIterator for &'a SortedSet<K> {
    type Item = &'a K;
    type IntoIter = SetIter<'a, K>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Ascending iterator over a [`SortedSet`].
pub struct SetIter<'a, K> {
    inner: MapIter<'a, K, ()>,
}

impl<'a, K> Iterator for SetIter<'a, K> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(k, _)| k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_contains_erase() {
        let set: SortedSet<&str> = ["b", "a", "c"].into_iter().collect();
        assert!(set.contains(&"a"));
        assert_eq!(set.iter().copied().collect::<Vec<_>>(), vec!["a", "b", "c"]);

        let smaller = set.erase(&"b");
        assert!(!smaller.contains(&"b"));
        assert!(set.contains(&"b"));
    }

    #[test]
    fn test_union() {
        let a: SortedSet<i32> = (0..5).collect();
        let b: SortedSet<i32> = (3..40).collect();
        let both = a.union(&b);
        assert_eq!(both.len(), 40);
        assert_eq!(both.first(), Some(&0));
        assert_eq!(both.last(), Some(&39));
    }

    #[test]
    fn test_union_with_subset_shares_storage() {
        let a: SortedSet<i32> = (0..10).collect();
        let b: SortedSet<i32> = (2..4).collect();
        assert!(a.union(&b).ptr_eq(&a));
    }

    #[test]
    fn test_iter_from() {
        let set: SortedSet<i32> = (0..10).map(|x| x * 10).collect();
        assert_eq!(set.iter_from(&35).copied().collect::<Vec<_>>(), vec![40, 50, 60, 70, 80, 90]);
    }
}
