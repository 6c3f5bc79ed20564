//! Multi-key grouping of table rows.
//!
//! Rows are bucketed by a tuple key into index lists, then visited in key
//! order so downstream output does not depend on input order.

use std::collections::HashMap;
use std::hash::Hash;

/// Index lists keyed by a grouping key.
#[derive(Debug, Clone)]
pub struct GroupIndex<K> {
    groups: HashMap<K, Vec<usize>>,
}

impl<K> Default for GroupIndex<K> {
    fn default() -> Self {
        Self {
            groups: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Ord> GroupIndex<K> {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Group `rows` by `key`; rows mapped to `None` are left out.
    pub fn build<T>(rows: &[T], key: impl Fn(&T) -> Option<K>) -> Self {
        let mut index = Self::new();
        for (i, row) in rows.iter().enumerate() {
            if let Some(k) = key(row) {
                index.insert(k, i);
            }
        }
        index
    }

    /// Append a row index to the group for `key`.
    pub fn insert(&mut self, key: K, row: usize) {
        self.groups.entry(key).or_default().push(row);
    }

    /// Row indices of one group, in insertion order.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&[usize]> {
        self.groups.get(key).map(Vec::as_slice)
    }

    /// Number of groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Returns true if no rows were grouped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Consume the index, returning groups sorted by key.
    #[must_use]
    pub fn into_sorted(self) -> Vec<(K, Vec<usize>)> {
        let mut groups: Vec<_> = self.groups.into_iter().collect();
        groups.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        groups
    }
}
