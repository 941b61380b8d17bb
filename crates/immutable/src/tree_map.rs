//! Persistent left-leaning red-black tree
//!
//! Nodes are immutable and shared through `Arc`. An insert or erase copies
//! only the nodes on the path from the root to the affected position and
//! reuses every other subtree, so older versions of the map stay valid.
//!
//! Each node caches the size of its subtree, which makes `len` constant time
//! and `find_index` logarithmic.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Color {
    Red,
    Black,
}

impl Color {
    fn flip(self) -> Self {
        match self {
            Color::Red => Color::Black,
            Color::Black => Color::Red,
        }
    }
}

struct Node<K, V> {
    key: K,
    value: V,
    color: Color,
    size: usize,
    left: Link<K, V>,
    right: Link<K, V>,
}

type Link<K, V> = Option<Arc<Node<K, V>>>;

fn is_red<K, V>(link: &Link<K, V>) -> bool {
    matches!(link, Some(node) if node.color == Color::Red)
}

fn link_size<K, V>(link: &Link<K, V>) -> usize {
    link.as_ref().map_or(0, |node| node.size)
}

fn left_left_red<K, V>(node: &Node<K, V>) -> bool {
    node.left.as_ref().is_some_and(|l| is_red(&l.left))
}

fn right_left_red<K, V>(node: &Node<K, V>) -> bool {
    node.right.as_ref().is_some_and(|r| is_red(&r.left))
}

fn make<K, V>(key: K, value: V, color: Color, left: Link<K, V>, right: Link<K, V>) -> Arc<Node<K, V>> {
    let size = 1 + link_size(&left) + link_size(&right);
    Arc::new(Node {
        key,
        value,
        color,
        size,
        left,
        right,
    })
}

impl<K: Clone, V: Clone> Node<K, V> {
    fn with(&self, color: Color, left: Link<K, V>, right: Link<K, V>) -> Arc<Self> {
        make(self.key.clone(), self.value.clone(), color, left, right)
    }

    fn with_left(&self, left: Link<K, V>) -> Arc<Self> {
        self.with(self.color, left, self.right.clone())
    }

    fn with_right(&self, right: Link<K, V>) -> Arc<Self> {
        self.with(self.color, self.left.clone(), right)
    }
}

fn recolor<K: Clone, V: Clone>(node: &Arc<Node<K, V>>, color: Color) -> Arc<Node<K, V>> {
    if node.color == color {
        Arc::clone(node)
    } else {
        node.with(color, node.left.clone(), node.right.clone())
    }
}

fn flip_link<K: Clone, V: Clone>(link: &Link<K, V>) -> Link<K, V> {
    link.as_ref().map(|n| recolor(n, n.color.flip()))
}

fn rotate_left<K: Clone, V: Clone>(h: &Arc<Node<K, V>>) -> Arc<Node<K, V>> {
    let Some(x) = h.right.as_ref() else {
        unreachable!("rotate_left on a node without a right child");
    };
    let lowered = h.with(Color::Red, h.left.clone(), x.left.clone());
    x.with(h.color, Some(lowered), x.right.clone())
}

fn rotate_right<K: Clone, V: Clone>(h: &Arc<Node<K, V>>) -> Arc<Node<K, V>> {
    let Some(x) = h.left.as_ref() else {
        unreachable!("rotate_right on a node without a left child");
    };
    let lowered = h.with(Color::Red, x.right.clone(), h.right.clone());
    x.with(h.color, x.left.clone(), Some(lowered))
}

fn color_flip<K: Clone, V: Clone>(h: &Arc<Node<K, V>>) -> Arc<Node<K, V>> {
    h.with(h.color.flip(), flip_link(&h.left), flip_link(&h.right))
}

fn fix_up<K: Clone, V: Clone>(h: Arc<Node<K, V>>) -> Arc<Node<K, V>> {
    let mut h = h;
    if is_red(&h.right) {
        h = rotate_left(&h);
    }
    if is_red(&h.left) && left_left_red(&h) {
        h = rotate_right(&h);
    }
    if is_red(&h.left) && is_red(&h.right) {
        h = color_flip(&h);
    }
    h
}

fn move_red_left<K: Clone, V: Clone>(h: &Arc<Node<K, V>>) -> Arc<Node<K, V>> {
    let mut h = color_flip(h);
    if right_left_red(&h) {
        let right = h.right.as_ref().map(rotate_right);
        h = rotate_left(&h.with_right(right));
        h = color_flip(&h);
    }
    h
}

fn move_red_right<K: Clone, V: Clone>(h: &Arc<Node<K, V>>) -> Arc<Node<K, V>> {
    let mut h = color_flip(h);
    if left_left_red(&h) {
        h = rotate_right(&h);
        h = color_flip(&h);
    }
    h
}

fn insert_at<K: Ord + Clone, V: Clone>(link: &Link<K, V>, key: K, value: V) -> Arc<Node<K, V>> {
    let Some(h) = link else {
        return make(key, value, Color::Red, None, None);
    };
    let node = match key.cmp(&h.key) {
        Ordering::Less => h.with_left(Some(insert_at(&h.left, key, value))),
        Ordering::Greater => h.with_right(Some(insert_at(&h.right, key, value))),
        Ordering::Equal => make(key, value, h.color, h.left.clone(), h.right.clone()),
    };
    fix_up(node)
}

fn min_node<K, V>(node: &Arc<Node<K, V>>) -> &Arc<Node<K, V>> {
    let mut cur = node;
    while let Some(left) = cur.left.as_ref() {
        cur = left;
    }
    cur
}

fn max_node<K, V>(node: &Arc<Node<K, V>>) -> &Arc<Node<K, V>> {
    let mut cur = node;
    while let Some(right) = cur.right.as_ref() {
        cur = right;
    }
    cur
}

fn remove_min<K: Clone, V: Clone>(h: &Arc<Node<K, V>>) -> Link<K, V> {
    if h.left.is_none() {
        return None;
    }
    let mut h = Arc::clone(h);
    if !is_red(&h.left) && !left_left_red(&h) {
        h = move_red_left(&h);
    }
    let left = h.left.as_ref().and_then(remove_min);
    Some(fix_up(h.with_left(left)))
}

/// Removes `key`, which must be present in the subtree rooted at `link`.
fn remove_at<K: Ord + Clone, V: Clone>(link: &Link<K, V>, key: &K) -> Link<K, V> {
    let h = link.as_ref()?;
    let mut h = Arc::clone(h);
    if *key < h.key {
        if !is_red(&h.left) && !left_left_red(&h) {
            h = move_red_left(&h);
        }
        let left = remove_at(&h.left, key);
        h = h.with_left(left);
    } else {
        if is_red(&h.left) {
            h = rotate_right(&h);
        }
        if *key == h.key && h.right.is_none() {
            return None;
        }
        if !is_red(&h.right) && !right_left_red(&h) {
            h = move_red_right(&h);
        }
        if *key == h.key {
            let Some(right) = h.right.as_ref() else {
                unreachable!("successor lookup on a node without a right child");
            };
            let successor = min_node(right);
            h = make(
                successor.key.clone(),
                successor.value.clone(),
                h.color,
                h.left.clone(),
                remove_min(right),
            );
        } else {
            let right = remove_at(&h.right, key);
            h = h.with_right(right);
        }
    }
    Some(fix_up(h))
}

/// Immutable sorted map backed by a persistent LLRB tree.
pub struct TreeSortedMap<K, V> {
    root: Link<K, V>,
}

impl<K, V> Clone for TreeSortedMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
        }
    }
}

impl<K, V> Default for TreeSortedMap<K, V> {
    fn default() -> Self {
        Self { root: None }
    }
}

impl<K, V> TreeSortedMap<K, V> {
    pub fn len(&self) -> usize {
        link_size(&self.root)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// True if both maps share the same root node.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.root, &other.root) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    pub fn first(&self) -> Option<(&K, &V)> {
        self.root.as_ref().map(|r| {
            let n = min_node(r);
            (&n.key, &n.value)
        })
    }

    pub fn last(&self) -> Option<(&K, &V)> {
        self.root.as_ref().map(|r| {
            let n = max_node(r);
            (&n.key, &n.value)
        })
    }

    pub fn iter(&self) -> TreeIter<'_, K, V> {
        let mut iter = TreeIter { stack: Vec::new() };
        iter.push_left_spine(self.root.as_deref());
        iter
    }
}

impl<K: Ord, V> TreeSortedMap<K, V> {
    fn find_node(&self, key: &K) -> Option<&Node<K, V>> {
        let mut cur = self.root.as_deref();
        while let Some(node) = cur {
            cur = match key.cmp(&node.key) {
                Ordering::Less => node.left.as_deref(),
                Ordering::Greater => node.right.as_deref(),
                Ordering::Equal => return Some(node),
            };
        }
        None
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.find_node(key).map(|n| &n.value)
    }

    /// In-order position of `key`, if present.
    pub fn find_index(&self, key: &K) -> Option<usize> {
        let mut prune = 0;
        let mut cur = self.root.as_deref();
        while let Some(node) = cur {
            match key.cmp(&node.key) {
                Ordering::Less => cur = node.left.as_deref(),
                Ordering::Greater => {
                    prune += link_size(&node.left) + 1;
                    cur = node.right.as_deref();
                }
                Ordering::Equal => return Some(prune + link_size(&node.left)),
            }
        }
        None
    }

    /// Iterates entries starting at the first key not less than `key`.
    pub fn iter_from(&self, key: &K) -> TreeIter<'_, K, V> {
        let mut stack = Vec::new();
        let mut cur = self.root.as_deref();
        while let Some(node) = cur {
            if node.key < *key {
                cur = node.right.as_deref();
            } else {
                stack.push(node);
                cur = node.left.as_deref();
            }
        }
        TreeIter { stack }
    }
}

impl<K: Ord + Clone, V: Clone> TreeSortedMap<K, V> {
    /// Builds a tree from entries already in ascending key order.
    pub fn from_sorted(entries: &[(K, V)]) -> Self {
        entries
            .iter()
            .fold(Self::default(), |map, (k, v)| map.insert(k.clone(), v.clone()))
    }

    /// Returns a map with `key` bound to `value`, copying one root-to-leaf path.
    pub fn insert(&self, key: K, value: V) -> Self {
        let root = insert_at(&self.root, key, value);
        Self {
            root: Some(recolor(&root, Color::Black)),
        }
    }

    /// Returns a map without `key`. Erasing a missing key shares the root.
    pub fn erase(&self, key: &K) -> Self {
        let Some(root) = self.root.as_ref() else {
            return self.clone();
        };
        if self.find_node(key).is_none() {
            return self.clone();
        }
        let root = if !is_red(&root.left) && !is_red(&root.right) {
            recolor(root, Color::Red)
        } else {
            Arc::clone(root)
        };
        let root = remove_at(&Some(root), key).map(|r| recolor(&r, Color::Black));
        Self { root }
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for TreeSortedMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// In-order iterator over a [`TreeSortedMap`].
pub struct TreeIter<'a, K, V> {
    stack: Vec<&'a Node<K, V>>,
}

impl<'a, K, V> TreeIter<'a, K, V> {
    fn push_left_spine(&mut self, mut cur: Option<&'a Node<K, V>>) {
        while let Some(node) = cur {
            self.stack.push(node);
            cur = node.left.as_deref();
        }
    }
}

impl<'a, K, V> Iterator for TreeIter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.push_left_spine(node.right.as_deref());
        Some((&node.key, &node.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    /// Returns the black height of the subtree, asserting LLRB shape.
    fn check_node<K: Ord, V>(link: &Link<K, V>, lo: Option<&K>, hi: Option<&K>) -> usize {
        let Some(node) = link else {
            return 1;
        };
        assert!(!is_red(&node.right), "right-leaning red link");
        if node.color == Color::Red {
            assert!(!is_red(&node.left), "two red links in a row");
        }
        if let Some(lo) = lo {
            assert!(node.key > *lo, "keys out of order");
        }
        if let Some(hi) = hi {
            assert!(node.key < *hi, "keys out of order");
        }
        assert_eq!(node.size, 1 + link_size(&node.left) + link_size(&node.right));
        let left = check_node(&node.left, lo, Some(&node.key));
        let right = check_node(&node.right, Some(&node.key), hi);
        assert_eq!(left, right, "black height mismatch");
        left + usize::from(node.color == Color::Black)
    }

    fn check<K: Ord, V>(map: &TreeSortedMap<K, V>) {
        assert!(!is_red(&map.root), "red root");
        check_node(&map.root, None, None);
    }

    fn keys(map: &TreeSortedMap<i32, i32>) -> Vec<i32> {
        map.iter().map(|(k, _)| *k).collect()
    }

    #[test]
    fn test_balance_problem() {
        let mut map = TreeSortedMap::default();
        for k in [1, 7, 8, 5, 2, 6, 4, 0, 3] {
            map = map.insert(k, k);
            check(&map);
        }
        assert_eq!(keys(&map), (0..9).collect::<Vec<_>>());

        for k in [1, 7, 8, 5, 2, 6, 4, 0, 3] {
            map = map.erase(&k);
            check(&map);
        }
        assert!(map.is_empty());
    }

    #[test]
    fn test_random_inserts_and_removals_stay_balanced() {
        let mut rng = StdRng::seed_from_u64(17);
        let mut input: Vec<i32> = (0..500).collect();
        input.shuffle(&mut rng);

        let mut map = TreeSortedMap::default();
        for &k in &input {
            map = map.insert(k, k * 10);
        }
        check(&map);
        assert_eq!(map.len(), 500);

        input.shuffle(&mut rng);
        for (removed, &k) in input.iter().enumerate() {
            map = map.erase(&k);
            assert_eq!(map.len(), 499 - removed);
            if removed % 50 == 0 {
                check(&map);
            }
        }
        assert!(map.is_empty());
    }

    #[test]
    fn test_erase_keeps_old_version() {
        let full = TreeSortedMap::from_sorted(&(0..40).map(|k| (k, k)).collect::<Vec<_>>());
        let smaller = full.erase(&20);
        check(&smaller);
        assert_eq!(full.len(), 40);
        assert_eq!(full.get(&20), Some(&20));
        assert_eq!(smaller.get(&20), None);
        assert_eq!(smaller.len(), 39);
    }

    #[test]
    fn test_erase_missing_shares_root() {
        let map = TreeSortedMap::from_sorted(&(0..30).map(|k| (k * 2, k)).collect::<Vec<_>>());
        assert!(map.ptr_eq(&map.erase(&7)));
    }

    #[test]
    fn test_find_index() {
        let map = TreeSortedMap::from_sorted(&(0..60).map(|k| (k * 3, k)).collect::<Vec<_>>());
        for k in 0..60 {
            assert_eq!(map.find_index(&(k * 3)), Some(k as usize));
            assert_eq!(map.find_index(&(k * 3 + 1)), None);
        }
    }

    #[test]
    fn test_iter_from_lower_bound() {
        let map = TreeSortedMap::from_sorted(&(0..50).map(|k| (k * 2, k)).collect::<Vec<_>>());
        let from: Vec<i32> = map.iter_from(&91).map(|(k, _)| *k).collect();
        assert_eq!(from, vec![92, 94, 96, 98]);
        assert_eq!(map.iter_from(&-5).count(), 50);
        assert_eq!(map.iter_from(&99).count(), 0);
    }

    #[test]
    fn test_min_max() {
        let map = TreeSortedMap::from_sorted(&(5..45).map(|k| (k, ())).collect::<Vec<_>>());
        assert_eq!(map.first().map(|(k, _)| *k), Some(5));
        assert_eq!(map.last().map(|(k, _)| *k), Some(44));
        let empty: TreeSortedMap<i32, ()> = TreeSortedMap::default();
        assert!(empty.first().is_none());
    }
}
