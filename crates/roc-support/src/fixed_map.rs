//! Fixed-capacity map (spec.md §2): a bounded key/value store that
//! refuses an insert past its capacity instead of evicting anything.
//!
//! This is the non-evicting sibling of `roc-engine::RequestSet`'s
//! LRU-evicting registry: some call sites (a connection's small
//! per-handshake attribute table, a handler's scratch lookup table) want
//! a hard cap enforced as a caller-visible error rather than having an
//! older entry silently disappear to make room.

use roc_core::error::{EngineError, Result};
use std::collections::BTreeMap;

/// A `BTreeMap` wrapper bounded at construction time. Every mutating
/// operation that would grow the map past `cap` returns
/// `ErrorCategory::ResourceExhausted` instead of performing the
/// insert.
pub struct FixedMap<K, V> {
    entries: BTreeMap<K, V>,
    cap: usize,
}

impl<K: Ord, V> FixedMap<K, V> {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            cap,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.entries.get_mut(key)
    }

    /// Inserts `value` under `key`. A key already present is overwritten
    /// in place without counting against the cap (that is not growth);
    /// a genuinely new key once the map is at capacity is refused.
    pub fn insert(&mut self, key: K, value: V) -> Result<Option<V>> {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.cap {
            return Err(EngineError::resource_exhausted(
                "fixed_map.at_capacity",
                format!("fixed map is at its {}-entry capacity", self.cap),
            ));
        }
        Ok(self.entries.insert(key, value))
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_up_to_cap_succeeds() {
        let mut map: FixedMap<u32, &str> = FixedMap::new(2);
        assert!(map.insert(1, "a").unwrap().is_none());
        assert!(map.insert(2, "b").unwrap().is_none());
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn insert_past_cap_is_resource_exhausted() {
        let mut map: FixedMap<u32, &str> = FixedMap::new(1);
        map.insert(1, "a").unwrap();
        let err = map.insert(2, "b").unwrap_err();
        assert_eq!(err.category(), roc_core::error::ErrorCategory::ResourceExhausted);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn overwriting_an_existing_key_does_not_count_against_cap() {
        let mut map: FixedMap<u32, &str> = FixedMap::new(1);
        map.insert(1, "a").unwrap();
        let previous = map.insert(1, "b").unwrap();
        assert_eq!(previous, Some("a"));
        assert_eq!(map.get(&1), Some(&"b"));
    }

    #[test]
    fn remove_frees_capacity_for_a_new_key() {
        let mut map: FixedMap<u32, &str> = FixedMap::new(1);
        map.insert(1, "a").unwrap();
        assert_eq!(map.remove(&1), Some("a"));
        map.insert(2, "b").unwrap();
        assert_eq!(map.get(&2), Some(&"b"));
    }
}
