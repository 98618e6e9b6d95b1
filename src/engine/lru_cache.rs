use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// A key-value map with least-recently-used eviction and hit/miss
/// accounting. A capacity of `None` makes the cache unbounded. The cache
/// is not thread-safe on its own: when shared it must be wrapped in a
/// mutex by the owner.
///
/// Recency is tracked with a monotonic tick: every access re-stamps the
/// entry and the ordered stamp index yields the eviction victim in O(log n).
pub struct LruCache<K, V> {
    capacity: Option<usize>,
    entries: HashMap<K, Entry<V>>,
    recency: BTreeMap<u64, K>,
    tick: u64,
    hits: u64,
    misses: u64,
}

struct Entry<V> {
    value: V,
    stamp: u64,
}

/// A snapshot of the counters of a [`LruCache`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LruCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub capacity: Option<usize>,
}

impl<K: Eq + Hash + Clone, V> LruCache<K, V> {
    /// Creates a new [`LruCache`]. `capacity` must be > 0 when bounded.
    pub fn new(capacity: Option<usize>) -> Self {
        if let Some(cap) = capacity {
            assert!(cap > 0);
        }
        Self {
            capacity,
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            tick: 0,
            hits: 0,
            misses: 0,
        }
    }

    /// Returns the value at the given key, promoting the entry to
    /// most-recently-used. Counts a hit or a miss.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        if !self.entries.contains_key(key) {
            self.misses += 1;
            return None;
        }
        self.hits += 1;
        self.promote(key);
        Some(&self.entries.get(key).unwrap().value)
    }

    /// Inserts or updates the value at the given key, evicting the
    /// least-recently-used entry when the cache is full.
    pub fn set(&mut self, key: K, value: V) {
        if self.entries.contains_key(&key) {
            self.promote(&key);
            self.entries.get_mut(&key).unwrap().value = value;
            return;
        }
        if self.is_full() {
            self.pop_lru();
        }
        self.tick += 1;
        self.recency.insert(self.tick, key.clone());
        self.entries.insert(key, Entry { value, stamp: self.tick });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        match self.capacity {
            Some(cap) => self.entries.len() >= cap,
            None => false,
        }
    }

    /// Returns a snapshot of the cache counters.
    pub fn stats(&self) -> LruCacheStats {
        LruCacheStats {
            hits: self.hits,
            misses: self.misses,
            size: self.entries.len(),
            capacity: self.capacity,
        }
    }

    // Re-stamp an existing entry as most-recently-used.
    fn promote(&mut self, key: &K) {
        let entry = self.entries.get_mut(key).unwrap();
        self.recency.remove(&entry.stamp);
        self.tick += 1;
        entry.stamp = self.tick;
        self.recency.insert(self.tick, key.clone());
    }

    // Remove the least-recently-used entry.
    fn pop_lru(&mut self) {
        let oldest = match self.recency.keys().next() {
            None => return,
            Some(stamp) => *stamp,
        };
        let key = self.recency.remove(&oldest).unwrap();
        self.entries.remove(&key);
    }
}
