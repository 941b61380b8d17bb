//! Compute-once cache shared across threads
//!
//! [`ThreadSafeMemoizer::memoize`] runs its closure at most once per memoizer.
//! Callers that arrive while the first computation is in flight block until
//! it finishes and then read the same stored value.

use once_cell::sync::OnceCell;
use std::fmt;

/// Lazily computed value that is computed exactly once
pub struct ThreadSafeMemoizer<T> {
    cell: OnceCell<T>,
}

impl<T> ThreadSafeMemoizer<T> {
    /// Create an empty memoizer
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    /// Return the stored value, computing it with `compute` on first use
    ///
    /// If several threads call this concurrently, exactly one closure runs;
    /// the rest block until its result is stored.
    pub fn memoize<F>(&self, compute: F) -> &T
    where
        F: FnOnce() -> T,
    {
        self.cell.get_or_init(compute)
    }

    /// The value, if already computed
    pub fn get(&self) -> Option<&T> {
        self.cell.get()
    }
}

impl<T> Default for ThreadSafeMemoizer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Clone for ThreadSafeMemoizer<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ThreadSafeMemoizer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => f.debug_tuple("ThreadSafeMemoizer").field(value).finish(),
            None => f.write_str("ThreadSafeMemoizer(<pending>)"),
        }
    }
}
