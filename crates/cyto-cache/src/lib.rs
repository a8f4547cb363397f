//! Generic bounded LRU cache.
//!
//! Recency bookkeeping uses a tick-stamped queue with lazy stale-entry
//! skipping: promotions append a fresh `(key, tick)` pair instead of
//! splicing, and eviction scans pop until the stamp matches the live
//! entry. The queue is compacted once it outgrows the map by a fixed
//! factor, keeping promotions O(1) amortized.
//!
//! Contract highlights:
//! - `get` promotes to MRU; `peek` / `has` never touch recency.
//! - `insert` re-inserts (fresh recency and age), evicting LRU entries
//!   once capacity is exceeded.
//! - `max_age` makes `get`/`peek`/`has` treat expired entries as absent;
//!   `prune` sweeps them out and reports how many were removed.
//! - An eviction hook observes every entry that leaves by eviction,
//!   expiry, or `prune` (not plain overwrites).

use ahash::AHashMap;
use std::collections::VecDeque;
use std::hash::Hash;
use std::time::{Duration, Instant};
use tracing::trace;

/// Hit/miss/eviction counters. Expirations count separately from
/// capacity evictions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

struct Entry<V> {
    value: V,
    tick: u64,
    inserted_at: Instant,
}

type EvictHook<K, V> = Box<dyn FnMut(&K, V) + Send>;

pub struct LruCache<K, V> {
    max_size: usize,
    max_age: Option<Duration>,
    map: AHashMap<K, Entry<V>>,
    order: VecDeque<(K, u64)>,
    tick: u64,
    on_evict: Option<EvictHook<K, V>>,
    stats: CacheStats,
}

impl<K: Hash + Eq + Clone, V> LruCache<K, V> {
    /// A cache holding at most `max_size` entries. Zero is clamped to one.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size: max_size.max(1),
            max_age: None,
            map: AHashMap::new(),
            order: VecDeque::new(),
            tick: 0,
            on_evict: None,
            stats: CacheStats::default(),
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn with_eviction_hook(mut self, hook: EvictHook<K, V>) -> Self {
        self.on_evict = Some(hook);
        self
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    fn is_expired(&self, entry: &Entry<V>) -> bool {
        self.max_age
            .is_some_and(|age| entry.inserted_at.elapsed() > age)
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Fetch and promote to MRU. Expired entries are removed and counted
    /// as misses.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let expired = match self.map.get(key) {
            None => {
                self.stats.misses += 1;
                return None;
            }
            Some(entry) => self.is_expired(entry),
        };
        if expired {
            self.remove_entry(key, true);
            self.stats.misses += 1;
            return None;
        }
        self.stats.hits += 1;
        let tick = self.next_tick();
        if let Some(entry) = self.map.get_mut(key) {
            entry.tick = tick;
        }
        self.order.push_back((key.clone(), tick));
        self.compact_order();
        self.map.get(key).map(|e| &e.value)
    }

    /// Fetch without touching recency or counters. Expired entries read
    /// as absent (but stay until `get`/`prune` removes them).
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.map
            .get(key)
            .filter(|entry| !self.is_expired(entry))
            .map(|entry| &entry.value)
    }

    /// Age-aware membership test without recency change.
    pub fn has(&self, key: &K) -> bool {
        self.peek(key).is_some()
    }

    /// Insert or replace. Replacement refreshes both recency and age;
    /// the displaced value of a plain overwrite is dropped silently.
    pub fn insert(&mut self, key: K, value: V) {
        let tick = self.next_tick();
        self.map.insert(
            key.clone(),
            Entry {
                value,
                tick,
                inserted_at: Instant::now(),
            },
        );
        self.order.push_back((key, tick));
        self.compact_order();
        self.enforce_capacity();
    }

    /// Remove one entry (no hook, no counters); returns the value.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.map.remove(key).map(|entry| entry.value)
    }

    /// Sweep expired entries; returns how many were removed.
    pub fn prune(&mut self) -> usize {
        let expired: Vec<K> = self
            .map
            .iter()
            .filter(|(_, entry)| self.is_expired(entry))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.remove_entry(key, true);
        }
        if !expired.is_empty() {
            trace!(target: "cache.lru", removed = expired.len(), "pruned_expired_entries");
        }
        expired.len()
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }

    fn remove_entry(&mut self, key: &K, expired: bool) {
        if let Some(entry) = self.map.remove(key) {
            if expired {
                self.stats.expirations += 1;
            } else {
                self.stats.evictions += 1;
            }
            if let Some(hook) = self.on_evict.as_mut() {
                hook(key, entry.value);
            }
        }
    }

    /// Evict LRU entries (stale queue stamps skipped) until within
    /// capacity.
    fn enforce_capacity(&mut self) {
        while self.map.len() > self.max_size {
            let Some((key, tick)) = self.order.pop_front() else {
                return;
            };
            let live = self.map.get(&key).is_some_and(|entry| entry.tick == tick);
            if live {
                self.remove_entry(&key, false);
            }
        }
    }

    fn compact_order(&mut self) {
        if self.order.len() > self.map.len() * 4 + 16 {
            let map = &self.map;
            self.order
                .retain(|(key, tick)| map.get(key).is_some_and(|entry| entry.tick == *tick));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::Mutex;

    #[test]
    fn get_promotes_and_counts() {
        let mut cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.get(&"a"), Some(&1));
        // "b" is now LRU; inserting "c" evicts it.
        cache.insert("c", 3);
        assert!(!cache.has(&"b"));
        assert!(cache.has(&"a"));
        assert!(cache.has(&"c"));
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.evictions, 1);
    }

    #[test]
    fn capacity_evicts_in_lru_order() {
        let mut cache = LruCache::new(3);
        for (k, v) in [("a", 1), ("b", 2), ("c", 3)] {
            cache.insert(k, v);
        }
        cache.insert("d", 4);
        cache.insert("e", 5);
        assert!(!cache.has(&"a"));
        assert!(!cache.has(&"b"));
        assert!(cache.has(&"c"));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn peek_and_has_do_not_promote() {
        let mut cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.peek(&"a"), Some(&1));
        assert!(cache.has(&"a"));
        // "a" stays LRU despite the peeks.
        cache.insert("c", 3);
        assert!(!cache.has(&"a"));
        assert_eq!(cache.stats().hits, 0);
    }

    #[test]
    fn reinsert_refreshes_recency() {
        let mut cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("a", 10);
        cache.insert("c", 3);
        assert_eq!(cache.peek(&"a"), Some(&10));
        assert!(!cache.has(&"b"));
    }

    #[test]
    fn max_age_expires_entries() {
        let mut cache = LruCache::new(4).with_max_age(Duration::from_millis(5));
        cache.insert("a", 1);
        assert!(cache.has(&"a"));
        std::thread::sleep(Duration::from_millis(15));
        assert!(!cache.has(&"a"));
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.stats().expirations, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn prune_reports_expired_count() {
        let mut cache = LruCache::new(8).with_max_age(Duration::from_millis(5));
        cache.insert("a", 1);
        cache.insert("b", 2);
        std::thread::sleep(Duration::from_millis(15));
        cache.insert("fresh", 3);
        assert_eq!(cache.prune(), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.has(&"fresh"));
    }

    #[test]
    fn eviction_hook_observes_evicted_values() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut cache = LruCache::new(1).with_eviction_hook(Box::new(move |key: &&str, value| {
            sink.lock().unwrap().push((*key, value));
        }));
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("c", 3);
        assert_eq!(*seen.lock().unwrap(), vec![("a", 1), ("b", 2)]);
    }

    #[test]
    fn heavy_promotion_keeps_queue_bounded() {
        let mut cache = LruCache::new(4);
        for i in 0..4 {
            cache.insert(i, i);
        }
        for _ in 0..10_000 {
            cache.get(&0);
        }
        assert!(cache.order.len() <= cache.map.len() * 4 + 17);
        assert_eq!(cache.len(), 4);
    }
}
