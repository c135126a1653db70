//! Bounded FIFO cache for rendered assets and measured text
//!
//! Long-running displays load the same handful of images and label widths
//! over and over. This cache keeps the most recent entries up to a fixed
//! capacity and evicts the oldest insertion first, so memory stays flat no
//! matter how long the process runs.
//!
//! # Example
//!
//! ```
//! use lumen_core_resilience::bounded_cache::BoundedCache;
//!
//! let mut cache = BoundedCache::new(2);
//! cache.insert("a", 1);
//! cache.insert("b", 2);
//! cache.insert("c", 3); // evicts "a"
//!
//! assert!(cache.get(&"a").is_none());
//! assert_eq!(cache.get(&"c"), Some(&3));
//! assert_eq!(cache.stats().evictions, 1);
//! ```

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;

/// Fixed-capacity map with oldest-first eviction
#[derive(Debug)]
pub struct BoundedCache<K, V> {
    entries: HashMap<K, V>,
    order: VecDeque<K>,
    capacity: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create a cache holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Look up an entry, counting the hit or miss
    pub fn get(&mut self, key: &K) -> Option<&V> {
        match self.entries.get(key) {
            Some(value) => {
                self.hits += 1;
                Some(value)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Insert an entry, returning whatever was evicted to make room
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(slot) = self.entries.get_mut(&key) {
            *slot = value;
            return None;
        }

        let evicted = self.make_room();
        self.order.push_back(key.clone());
        self.entries.insert(key, value);
        evicted
    }

    /// Return the cached value or build, store and return it.
    ///
    /// A failing loader leaves the cache untouched.
    pub fn get_or_try_insert_with<E, F>(&mut self, key: K, load: F) -> Result<&V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        if self.entries.contains_key(&key) {
            self.hits += 1;
            return Ok(&self.entries[&key]);
        }

        self.misses += 1;
        let value = load()?;
        self.make_room();
        self.order.push_back(key.clone());
        Ok(self.entries.entry(key).or_insert(value))
    }

    fn make_room(&mut self) -> Option<(K, V)> {
        if self.entries.len() < self.capacity {
            return None;
        }
        let oldest = self.order.pop_front()?;
        self.evictions += 1;
        self.entries.remove(&oldest).map(|value| (oldest, value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop all entries; statistics are kept
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            items: self.entries.len(),
            capacity: self.capacity,
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
        }
    }
}

/// Snapshot of cache effectiveness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub items: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    /// Hit rate in percent, 0 when nothing was looked up yet
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64 * 100.0
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} items, {:.1}% hit rate ({} hits, {} misses, {} evicted)",
            self.items,
            self.capacity,
            self.hit_rate(),
            self.hits,
            self.misses,
            self.evictions
        )
    }
}
