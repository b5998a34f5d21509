//! Bounded TTL+LRU cache mapping image references to architecture lists
//!
//! The cache is the hot path of the mutator: every admission request probes
//! it before any registry traffic happens. Reads update recency and the
//! hit/miss counters, so `get` takes the write lock; only `len` and `stats`
//! are shared-lock reads.
//!
//! Expiration is lazy. Expired entries stay materialized until a `get`
//! observes them, and a zero TTL produces entries that are stored but can
//! never satisfy a later `get`.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Cache statistics snapshot
///
/// Counters are monotonically non-decreasing for the lifetime of the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of live-entry hits
    pub hits: u64,
    /// Number of misses, including expired-entry reads
    pub misses: u64,
    /// Number of entries removed by capacity eviction
    pub evictions: u64,
}

struct CacheEntry {
    value: Vec<String>,
    expires_at: Instant,
    last_access: Instant,
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    stats: CacheStats,
}

/// In-memory LRU cache with TTL expiry
///
/// Safe for concurrent use; one instance is shared by all in-flight
/// admission requests.
pub struct ArchCache {
    inner: RwLock<CacheInner>,
    capacity: usize,
    ttl: Duration,
}

impl ArchCache {
    /// Create a cache holding at most `capacity` entries, each live for `ttl`
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(CacheInner {
                entries: HashMap::new(),
                stats: CacheStats::default(),
            }),
            capacity,
            ttl,
        }
    }

    /// Retrieve a value, updating recency on hit
    ///
    /// An expired entry is removed and counted as a miss.
    pub fn get(&self, key: &str) -> Option<Vec<String>> {
        let now = Instant::now();
        let mut guard = self.inner.write().expect("cache lock poisoned");
        let CacheInner { entries, stats } = &mut *guard;

        match entries.get_mut(key) {
            Some(entry) if now < entry.expires_at => {
                entry.last_access = now;
                stats.hits += 1;
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                stats.misses += 1;
                None
            }
            None => {
                stats.misses += 1;
                None
            }
        }
    }

    /// Store a value, replacing any prior entry for the key
    ///
    /// If the insert pushes the cache over capacity, the entry with the
    /// oldest access time is evicted. Exactly one entry is removed per
    /// overflowing insert.
    pub fn set(&self, key: impl Into<String>, value: Vec<String>) {
        let now = Instant::now();
        let mut inner = self.inner.write().expect("cache lock poisoned");

        inner.entries.insert(
            key.into(),
            CacheEntry {
                value,
                expires_at: now + self.ttl,
                last_access: now,
            },
        );

        if inner.entries.len() > self.capacity {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(key, _)| key.clone());
            if let Some(key) = oldest {
                inner.entries.remove(&key);
                inner.stats.evictions += 1;
            }
        }
    }

    /// Number of materialized entries, expired ones included
    pub fn len(&self) -> usize {
        self.inner.read().expect("cache lock poisoned").entries.len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the hit/miss/eviction counters
    pub fn stats(&self) -> CacheStats {
        self.inner.read().expect("cache lock poisoned").stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn arches(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_get_miss_on_empty_cache() {
        let cache = ArchCache::new(10, Duration::from_secs(60));
        assert_eq!(cache.get("nginx"), None);
        assert_eq!(cache.stats().misses, 1);
        assert_eq!(cache.stats().hits, 0);
    }

    #[test]
    fn test_set_then_get() {
        let cache = ArchCache::new(10, Duration::from_secs(60));
        cache.set("nginx", arches(&["amd64", "arm64"]));

        assert_eq!(cache.get("nginx"), Some(arches(&["amd64", "arm64"])));
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_set_replaces_existing_entry() {
        let cache = ArchCache::new(10, Duration::from_secs(60));
        cache.set("nginx", arches(&["amd64"]));
        cache.set("nginx", arches(&["arm64"]));

        assert_eq!(cache.get("nginx"), Some(arches(&["arm64"])));
        assert_eq!(cache.len(), 1);
    }

    /// Story: a read refreshes recency, steering eviction away from hot keys
    ///
    /// With capacity 3 and k1 recently read, inserting a fourth key evicts
    /// k2 (the least recently accessed), not k1.
    #[test]
    fn story_lru_eviction_prefers_stale_entries() {
        let cache = ArchCache::new(3, Duration::from_secs(3600));
        cache.set("k1", arches(&["a"]));
        std::thread::sleep(Duration::from_millis(5));
        cache.set("k2", arches(&["b"]));
        std::thread::sleep(Duration::from_millis(5));
        cache.set("k3", arches(&["c"]));
        std::thread::sleep(Duration::from_millis(5));

        // Touch k1 so k2 becomes the oldest access
        assert!(cache.get("k1").is_some());
        std::thread::sleep(Duration::from_millis(5));

        cache.set("k4", arches(&["d"]));

        assert!(cache.get("k1").is_some(), "recently read entry survives");
        assert!(cache.get("k2").is_none(), "least recently used is evicted");
        assert!(cache.get("k3").is_some());
        assert!(cache.get("k4").is_some());
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_capacity_never_exceeded() {
        let cache = ArchCache::new(5, Duration::from_secs(3600));
        for i in 0..50 {
            cache.set(format!("k{i}"), arches(&["amd64"]));
            assert!(cache.len() <= 5);
        }
        assert_eq!(cache.stats().evictions, 45);
    }

    /// Story: entries expire after the TTL and count as misses
    #[test]
    fn story_ttl_expiry() {
        let cache = ArchCache::new(100, Duration::from_millis(50));
        cache.set("k", arches(&["amd64"]));

        assert_eq!(cache.get("k"), Some(arches(&["amd64"])));

        std::thread::sleep(Duration::from_millis(100));

        assert_eq!(cache.get("k"), None);
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        // Expired entry was removed on read
        assert_eq!(cache.len(), 0);
    }

    /// Story: zero TTL stores entries that never satisfy a read
    #[test]
    fn story_zero_ttl_entries_are_born_expired() {
        let cache = ArchCache::new(10, Duration::ZERO);
        cache.set("k", arches(&["amd64"]));

        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_expired_read_increments_misses_exactly_once() {
        let cache = ArchCache::new(10, Duration::from_millis(10));
        cache.set("k", arches(&["amd64"]));
        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.stats().misses, 1);

        // A second read is a plain miss against the now-removed entry
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.stats().misses, 2);
    }

    #[test]
    fn test_stats_snapshot_is_a_copy() {
        let cache = ArchCache::new(10, Duration::from_secs(60));
        let before = cache.stats();
        cache.set("k", arches(&["amd64"]));
        cache.get("k");

        assert_eq!(before.hits, 0);
        assert_eq!(cache.stats().hits, 1);
    }

    /// Story: concurrent readers and writers never corrupt counts
    #[test]
    fn story_concurrent_access_stays_within_bounds() {
        let cache = Arc::new(ArchCache::new(20, Duration::from_secs(60)));
        let mut handles = Vec::new();

        for t in 0..8 {
            let cache = cache.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    let key = format!("k{}", (t * 100 + i) % 40);
                    cache.set(key.clone(), arches(&["amd64"]));
                    cache.get(&key);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(cache.len() <= 20);
        let stats = cache.stats();
        assert_eq!(stats.hits + stats.misses, 800);
    }
}
