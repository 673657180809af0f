//! Resource index for prefix invalidation.
//!
//! Groups cached keys by their first segment so invalidating
//! `["admin-categories"]` only inspects keys of that resource instead of the
//! whole store.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use super::keys::QueryKey;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::registry";

/// Tracks resource head → cached keys.
#[derive(Default)]
pub(crate) struct ResourceIndex {
    by_head: RwLock<HashMap<String, HashSet<QueryKey>>>,
}

impl ResourceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, key: &QueryKey) {
        rw_write(&self.by_head, SOURCE, "register")
            .entry(key.head().to_string())
            .or_default()
            .insert(key.clone());
    }

    /// Remove a key; called when its entry is evicted or collected.
    pub fn unregister(&self, key: &QueryKey) {
        let mut by_head = rw_write(&self.by_head, SOURCE, "unregister");
        if let Some(keys) = by_head.get_mut(key.head()) {
            keys.remove(key);
            if keys.is_empty() {
                by_head.remove(key.head());
            }
        }
    }

    /// Every registered key that starts with `prefix`.
    pub fn matching(&self, prefix: &QueryKey) -> Vec<QueryKey> {
        rw_read(&self.by_head, SOURCE, "matching")
            .get(prefix.head())
            .map(|keys| {
                keys.iter()
                    .filter(|key| prefix.is_prefix_of(key))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        rw_write(&self.by_head, SOURCE, "clear").clear();
    }
}

#[cfg(test)]
impl ResourceIndex {
    fn len(&self) -> usize {
        rw_read(&self.by_head, SOURCE, "len")
            .values()
            .map(HashSet::len)
            .sum()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
