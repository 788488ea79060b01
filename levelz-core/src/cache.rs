//! Shared TTL cache used by the player store and the leaderboard.
//!
//! Entries expire on an absolute lifetime and, optionally, on an idle
//! timeout that resets on every read. Capacity is bounded by an LRU so a
//! burst of one-off users cannot grow the process without limit.
//!
//! Expired entries are dropped lazily on access and in bulk by
//! [`TtlCache::purge_expired`].

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

/// Minimal cache contract shared by every cache in the engine.
pub trait Cache<K, V> {
    /// Return a live entry, refreshing its idle timer.
    fn get(&self, key: &K) -> Option<V>;
    /// Insert or replace an entry, restarting both timers.
    fn put(&self, key: K, value: V);
    /// Remove an entry, returning it if it was present and live.
    fn invalidate(&self, key: &K) -> Option<V>;
}

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    last_access: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant, max_ttl: Duration, idle_ttl: Option<Duration>) -> bool {
        if now.duration_since(self.inserted_at) >= max_ttl {
            return true;
        }
        idle_ttl.is_some_and(|idle| now.duration_since(self.last_access) >= idle)
    }
}

/// Hit/miss statistics for a [`TtlCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Live entries right now (expired-but-unpurged entries included).
    pub len: usize,
    /// Reads that found a live entry.
    pub hits: u64,
    /// Reads that found nothing or an expired entry.
    pub misses: u64,
}

/// Thread-safe TTL + LRU cache.
pub struct TtlCache<K, V> {
    entries: Mutex<LruCache<K, CacheEntry<V>>>,
    max_ttl: Duration,
    idle_ttl: Option<Duration>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K, V> std::fmt::Debug for TtlCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("max_ttl", &self.max_ttl)
            .field("idle_ttl", &self.idle_ttl)
            .finish_non_exhaustive()
    }
}

impl<K: Hash + Eq + Clone, V: Clone> TtlCache<K, V> {
    /// A cache whose entries live for `max_ttl` regardless of reads.
    #[must_use]
    pub fn new(capacity: usize, max_ttl: Duration) -> Self {
        Self::with_idle(capacity, max_ttl, None)
    }

    /// A cache with both an absolute and an idle lifetime.
    #[must_use]
    pub fn with_idle(capacity: usize, max_ttl: Duration, idle_ttl: Option<Duration>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            max_ttl,
            idle_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let expired: Vec<K> = entries
            .iter()
            .filter(|(_, e)| e.is_expired(now, self.max_ttl, self.idle_ttl))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }

    /// Remove everything.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of stored entries, including expired ones not yet purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Snapshot of hit/miss counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            len: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl<K: Hash + Eq + Clone, V: Clone> Cache<K, V> for TtlCache<K, V> {
    fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let expired = match entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now, self.max_ttl, self.idle_ttl) => {
                entry.last_access = now;
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.pop(key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn put(&self, key: K, value: V) {
        let now = Instant::now();
        self.entries.lock().put(
            key,
            CacheEntry {
                value,
                inserted_at: now,
                last_access: now,
            },
        );
    }

    fn invalidate(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let entry = self.entries.lock().pop(key)?;
        if entry.is_expired(now, self.max_ttl, self.idle_ttl) {
            None
        } else {
            Some(entry.value)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_after_put() {
        let cache: TtlCache<u64, &str> = TtlCache::new(16, Duration::from_secs(60));
        cache.put(1, "one");
        assert_eq!(cache.get(&1), Some("one"));
        assert_eq!(cache.get(&2), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn absolute_ttl_expires() {
        let cache: TtlCache<u64, u64> = TtlCache::new(16, Duration::from_millis(30));
        cache.put(1, 10);
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(cache.get(&1), None);
        assert!(cache.is_empty(), "expired entry dropped on read");
    }

    #[test]
    fn idle_ttl_resets_on_read() {
        let cache: TtlCache<u64, u64> =
            TtlCache::with_idle(16, Duration::from_secs(60), Some(Duration::from_millis(80)));
        cache.put(1, 10);
        for _ in 0..4 {
            std::thread::sleep(Duration::from_millis(30));
            assert_eq!(cache.get(&1), Some(10), "reads keep the entry alive");
        }
        std::thread::sleep(Duration::from_millis(160));
        assert_eq!(cache.get(&1), None);
    }

    #[test]
    fn absolute_ttl_wins_over_reads() {
        let cache: TtlCache<u64, u64> = TtlCache::with_idle(
            16,
            Duration::from_millis(200),
            Some(Duration::from_millis(150)),
        );
        cache.put(1, 10);
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(cache.get(&1), Some(10));
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(cache.get(&1), Some(10));
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(cache.get(&1), None, "absolute lifetime exceeded");
    }

    #[test]
    fn lru_bound_evicts_least_recent() {
        let cache: TtlCache<u64, u64> = TtlCache::new(2, Duration::from_secs(60));
        cache.put(1, 1);
        cache.put(2, 2);
        let _ = cache.get(&1);
        cache.put(3, 3);
        assert_eq!(cache.get(&2), None);
        assert_eq!(cache.get(&1), Some(1));
        assert_eq!(cache.get(&3), Some(3));
    }

    #[test]
    fn invalidate_removes() {
        let cache: TtlCache<u64, u64> = TtlCache::new(16, Duration::from_secs(60));
        cache.put(1, 10);
        assert_eq!(cache.invalidate(&1), Some(10));
        assert_eq!(cache.invalidate(&1), None);
        assert_eq!(cache.get(&1), None);
    }

    #[test]
    fn purge_expired_counts() {
        let cache: TtlCache<u64, u64> = TtlCache::new(16, Duration::from_millis(20));
        cache.put(1, 1);
        cache.put(2, 2);
        std::thread::sleep(Duration::from_millis(40));
        cache.put(3, 3);
        assert_eq!(cache.purge_expired(), 2);
        assert_eq!(cache.len(), 1);
    }
}
