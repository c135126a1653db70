//! Freshness cache: last good value per data kind
//!
//! Entries are never handed out as fresh once their age exceeds the maximum
//! they were stored with. Expired entries are kept around so the caller can
//! still reach for them explicitly (see [`FreshnessCache::get_stale`]) when
//! the upstream is down.

use crate::clock::Clock;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// A cached value with the time it was fetched
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub fetched_at: Instant,
    pub max_age: Duration,
}

impl<T> CacheEntry<T> {
    /// Age of the entry at `now`
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.fetched_at)
    }

    /// Fresh means `age <= max_age`
    pub fn is_fresh(&self, now: Instant) -> bool {
        self.age(now) <= self.max_age
    }
}

/// Keyed store of the last successful fetch per data kind
pub struct FreshnessCache<K, T> {
    entries: HashMap<K, CacheEntry<T>>,
    clock: Arc<dyn Clock>,
}

impl<K, T> FreshnessCache<K, T>
where
    K: Eq + Hash,
{
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: HashMap::new(),
            clock,
        }
    }

    /// Fresh value for `kind`, or `None` if missing or expired
    pub fn get(&self, kind: &K) -> Option<&T> {
        let now = self.clock.now();
        self.entries
            .get(kind)
            .filter(|entry| entry.is_fresh(now))
            .map(|entry| &entry.value)
    }

    /// Value for `kind` regardless of age, together with that age
    pub fn get_stale(&self, kind: &K) -> Option<(&T, Duration)> {
        let now = self.clock.now();
        self.entries
            .get(kind)
            .map(|entry| (&entry.value, entry.age(now)))
    }

    /// Store a freshly fetched value, replacing any previous entry
    pub fn put(&mut self, kind: K, value: T, max_age: Duration) {
        let entry = CacheEntry {
            value,
            fetched_at: self.clock.now(),
            max_age,
        };
        self.entries.insert(kind, entry);
    }

    /// Age of the stored entry, fresh or not
    pub fn age(&self, kind: &K) -> Option<Duration> {
        let now = self.clock.now();
        self.entries.get(kind).map(|entry| entry.age(now))
    }

    pub fn contains(&self, kind: &K) -> bool {
        self.entries.contains_key(kind)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<K, T> std::fmt::Debug for FreshnessCache<K, T>
where
    K: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FreshnessCache")
            .field("kinds", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}
