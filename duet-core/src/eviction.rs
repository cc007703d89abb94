//! Ordered eviction map.
//!
//! A hash map that also remembers use order. Both services keep their
//! entities in one of these and prune by walking from the least-recently-used
//! end while the entry there has expired.
//!
//! - New keys go to the most-recently-used end.
//! - Overwriting an existing key keeps its position.
//! - `touch` moves an existing key to the most-recently-used end.
//! - There is no capacity bound; callers decide what to evict.
//!
//! Ordering is delegated to an unbounded [`lru::LruCache`]. Plain lookups go
//! through `peek` so that reading an entry never reorders it.

use lru::LruCache;
use std::borrow::Borrow;
use std::hash::Hash;

/// Hash map with O(1) least-recently-used access.
pub struct LruMap<K, V> {
    entries: LruCache<K, V>,
}

impl<K: Hash + Eq, V> Default for LruMap<K, V> {
    fn default() -> Self {
        Self {
            entries: LruCache::unbounded(),
        }
    }
}

impl<K: Hash + Eq, V> std::fmt::Debug for LruMap<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruMap")
            .field("len", &self.entries.len())
            .finish()
    }
}

impl<K: Hash + Eq, V> LruMap<K, V> {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `key` is present.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains(key)
    }

    /// Look up a value without changing its position.
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.peek(key)
    }

    /// Mutable lookup without changing position.
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.peek_mut(key)
    }

    /// Insert or overwrite.
    ///
    /// A new key lands at the most-recently-used end. Overwriting keeps the
    /// existing position and returns the previous value.
    pub fn set(&mut self, key: K, value: V) -> Option<V> {
        if let Some(slot) = self.entries.peek_mut(&key) {
            return Some(std::mem::replace(slot, value));
        }
        self.entries.put(key, value);
        None
    }

    /// Mark `key` most recently used. Returns false (and does nothing) if
    /// the key is absent.
    pub fn touch<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if !self.entries.contains(key) {
            return false;
        }
        self.entries.promote(key);
        true
    }

    /// Remove `key`, returning its value.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.pop(key)
    }

    /// The least-recently-used entry.
    pub fn peek_lru(&self) -> Option<(&K, &V)> {
        self.entries.peek_lru()
    }

    /// Remove and return the least-recently-used entry.
    pub fn pop_lru(&mut self) -> Option<(K, V)> {
        self.entries.pop_lru()
    }

    /// Pop the least-recently-used entry only if `pred` holds for it.
    pub fn pop_lru_if<F>(&mut self, pred: F) -> Option<(K, V)>
    where
        F: FnOnce(&K, &V) -> bool,
    {
        let (key, value) = self.entries.peek_lru()?;
        if pred(key, value) {
            self.entries.pop_lru()
        } else {
            None
        }
    }

    /// Iterate from least to most recently used.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        self.entries.iter().rev()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(map: &LruMap<&'static str, u32>) -> Vec<&'static str> {
        map.iter().map(|(k, _)| *k).collect()
    }

    #[test]
    fn insertion_order_is_lru_order() {
        let mut map = LruMap::new();
        map.set("a", 1);
        map.set("b", 2);
        map.set("c", 3);

        assert_eq!(keys(&map), vec!["a", "b", "c"]);
        assert_eq!(map.peek_lru(), Some((&"a", &1)));
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn overwrite_keeps_position() {
        let mut map = LruMap::new();
        map.set("a", 1);
        map.set("b", 2);

        assert_eq!(map.set("a", 10), Some(1));
        assert_eq!(keys(&map), vec!["a", "b"]);
        assert_eq!(map.get("a"), Some(&10));
    }

    #[test]
    fn touch_moves_to_mru_end() {
        let mut map = LruMap::new();
        map.set("a", 1);
        map.set("b", 2);
        map.set("c", 3);

        assert!(map.touch("a"));
        assert_eq!(keys(&map), vec!["b", "c", "a"]);

        // Touching the tail is a no-op on order
        assert!(map.touch("a"));
        assert_eq!(keys(&map), vec!["b", "c", "a"]);
    }

    #[test]
    fn lookups_do_not_reorder() {
        let mut map = LruMap::new();
        map.set("a", 1);
        map.set("b", 2);

        assert_eq!(map.get("a"), Some(&1));
        assert!(map.contains_key("a"));
        assert_eq!(map.peek_lru(), Some((&"a", &1)));
    }

    #[test]
    fn touch_absent_is_no_op() {
        let mut map = LruMap::new();
        map.set("a", 1);
        assert!(!map.touch("zzz"));
        assert_eq!(keys(&map), vec!["a"]);
    }

    #[test]
    fn pop_lru_walks_in_order() {
        let mut map = LruMap::new();
        map.set("a", 1);
        map.set("b", 2);
        map.touch("a");

        assert_eq!(map.pop_lru(), Some(("b", 2)));
        assert_eq!(map.pop_lru(), Some(("a", 1)));
        assert_eq!(map.pop_lru(), None);
        assert!(map.is_empty());
    }

    #[test]
    fn pop_lru_if_stops_at_first_failure() {
        let mut map = LruMap::new();
        map.set("a", 1);
        map.set("b", 5);
        map.set("c", 2);

        let mut popped = Vec::new();
        while let Some((k, _)) = map.pop_lru_if(|_, v| *v < 3) {
            popped.push(k);
        }

        // "c" qualifies but sits behind "b"
        assert_eq!(popped, vec!["a"]);
        assert_eq!(keys(&map), vec!["b", "c"]);
    }

    #[test]
    fn remove_from_middle_relinks() {
        let mut map = LruMap::new();
        map.set("a", 1);
        map.set("b", 2);
        map.set("c", 3);

        assert_eq!(map.remove("b"), Some(2));
        assert_eq!(map.remove("b"), None);
        assert_eq!(keys(&map), vec!["a", "c"]);
        assert!(!map.contains_key("b"));
    }

    #[test]
    fn get_mut_updates_in_place() {
        let mut map = LruMap::new();
        map.set("a", 1);
        map.set("b", 2);
        if let Some(v) = map.get_mut("a") {
            *v += 100;
        }
        assert_eq!(map.get("a"), Some(&101));
        assert_eq!(keys(&map), vec!["a", "b"]);
    }

    #[test]
    fn works_with_owned_string_keys() {
        let mut map: LruMap<String, u32> = LruMap::new();
        map.set("alpha".to_string(), 1);
        assert!(map.contains_key("alpha"));
        assert!(map.touch("alpha"));
        assert_eq!(map.remove("alpha"), Some(1));
    }
}
