//! Bounded, time-expiring cache for idempotent lookups.

use std::collections::BTreeMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use sifter_core::metrics::events::LookupCacheRequest;
use sifter_core::{LookupCacheConfig, emit};

/// Hit and miss counters of a [`LookupCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    inserted: Instant,
    /// Recency stamp; larger is more recent.
    used: u64,
}

/// LRU cache with an absolute per-entry time-to-live.
///
/// Every access stamps the entry with a fresh tick. The smallest stamp in
/// `recency` is the least recently used entry and is evicted first.
#[derive(Debug)]
pub struct LookupCache<K, V> {
    entries: IndexMap<K, CacheEntry<V>>,
    recency: BTreeMap<u64, K>,
    tick: u64,
    max_entries: usize,
    ttl: Duration,
    stats: CacheStats,
}

impl<K, V> LookupCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            entries: IndexMap::new(),
            recency: BTreeMap::new(),
            tick: 0,
            max_entries: max_entries.max(1),
            ttl,
            stats: CacheStats::default(),
        }
    }

    pub fn from_config(config: &LookupCacheConfig) -> Self {
        Self::new(config.max_entries, config.ttl())
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Cached value for `key`, refreshing its recency. Expired entries are
    /// removed and count as a miss.
    pub fn get(&mut self, key: &K) -> Option<V> {
        let tick = self.next_tick();
        let fresh = self
            .entries
            .get(key)
            .map(|entry| entry.inserted.elapsed() < self.ttl);
        let value = match fresh {
            Some(true) => self.entries.get_mut(key).map(|entry| {
                self.recency.remove(&entry.used);
                entry.used = tick;
                self.recency.insert(tick, key.clone());
                entry.value.clone()
            }),
            Some(false) => {
                self.remove(key);
                None
            }
            None => None,
        };

        let hit = value.is_some();
        if hit {
            self.stats.hits += 1;
        } else {
            self.stats.misses += 1;
        }
        emit!(LookupCacheRequest { hit });
        value
    }

    /// Insert or replace a value, evicting the least recently used entry
    /// when the cache is full.
    pub fn insert(&mut self, key: K, value: V) {
        self.remove(&key);
        if self.entries.len() >= self.max_entries
            && let Some((_, oldest)) = self.recency.pop_first()
        {
            self.entries.swap_remove(&oldest);
            self.stats.evictions += 1;
        }
        let used = self.next_tick();
        self.recency.insert(used, key.clone());
        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted: Instant::now(),
                used,
            },
        );
    }

    fn remove(&mut self, key: &K) {
        if let Some(entry) = self.entries.swap_remove(key) {
            self.recency.remove(&entry.used);
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| entry.inserted.elapsed() < self.ttl)
    }

    /// Drop every entry. Statistics are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_and_miss() {
        let mut cache = LookupCache::new(10, Duration::from_secs(60));
        assert_eq!(cache.get(&"a"), None);
        cache.insert("a", 1);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                evictions: 0
            }
        );
    }

    #[test]
    fn test_least_recently_used_is_evicted() {
        let mut cache = LookupCache::new(2, Duration::from_secs(60));
        cache.insert("a", 1);
        cache.insert("b", 2);
        // Touch "a" so "b" becomes the eviction candidate.
        assert_eq!(cache.get(&"a"), Some(1));
        cache.insert("c", 3);

        assert!(cache.contains(&"a"));
        assert!(!cache.contains(&"b"));
        assert!(cache.contains(&"c"));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_eviction_follows_access_order() {
        let mut cache = LookupCache::new(3, Duration::from_secs(60));
        for key in ["a", "b", "c"] {
            cache.insert(key, key.len());
        }
        cache.get(&"a");
        cache.get(&"b");
        cache.insert("d", 1);
        assert!(!cache.contains(&"c"));
        cache.insert("e", 1);
        assert!(!cache.contains(&"a"));
        assert!(cache.contains(&"b"));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_replacing_does_not_evict() {
        let mut cache = LookupCache::new(2, Duration::from_secs(60));
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("a", 10);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a"), Some(10));
        assert_eq!(cache.get(&"b"), Some(2));
    }

    #[test]
    fn test_entries_expire() {
        let mut cache = LookupCache::new(10, Duration::from_millis(20));
        cache.insert("a", 1);
        std::thread::sleep(Duration::from_millis(40));
        assert!(!cache.contains(&"a"));
        assert_eq!(cache.get(&"a"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear() {
        let mut cache = LookupCache::new(10, Duration::from_secs(60));
        cache.insert(vec![1, 2], "x");
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.get(&vec![1, 2]), None);
    }
}
