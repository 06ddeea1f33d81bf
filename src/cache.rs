//! Process-local cache tier
//!
//! A TTL + capacity bounded map with two deliberate quirks inherited from
//! the production behavior this proxy replaces (see DESIGN.md):
//!
//! - Expired entries are swept inline on every Nth request rather than by
//!   a background timer.
//! - Capacity eviction is by *insertion* order, not access order. Reads
//!   never refresh `inserted_at`, so this is not an LRU and must not be
//!   turned into one: the behavior is observable and tested.

use crate::models::CachedResponse;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::debug;

/// Process-local TTL + capacity bounded cache
pub struct LocalCache {
    entries: Mutex<HashMap<String, CachedResponse>>,
    capacity: usize,
    sweep_interval: u64,
    request_count: AtomicU64,
}

impl LocalCache {
    /// Create a cache holding at most `capacity` entries, sweeping expired
    /// entries every `sweep_interval` requests
    pub fn new(capacity: usize, sweep_interval: u64) -> Self {
        LocalCache {
            entries: Mutex::new(HashMap::new()),
            capacity,
            sweep_interval: sweep_interval.max(1),
            request_count: AtomicU64::new(0),
        }
    }

    /// Look up an entry, returning a clone on hit
    ///
    /// Every Nth call runs the inline sweep first. An individually expired
    /// entry is a miss (and is dropped) even between sweeps.
    pub fn get(&self, key: &str) -> Option<CachedResponse> {
        let count = self.request_count.fetch_add(1, Ordering::Relaxed) + 1;

        let mut entries = self.entries.lock().unwrap();

        if count % self.sweep_interval == 0 {
            Self::sweep(&mut entries, self.capacity);
        }

        match entries.get(key) {
            Some(entry) if !entry.is_expired() => Some(entry.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Insert or replace an entry
    ///
    /// Capacity is enforced here as well, so the bound holds between
    /// sweeps: the oldest-inserted entries are dropped first.
    pub fn put(&self, key: &str, entry: CachedResponse) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(key.to_string(), entry);

        if entries.len() > self.capacity {
            Self::evict_oldest(&mut entries, self.capacity);
        }
    }

    /// Current number of entries, for monitoring headers
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delete expired entries, then restore the capacity bound by deleting
    /// the oldest-inserted survivors
    fn sweep(entries: &mut HashMap<String, CachedResponse>, capacity: usize) {
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired());

        if entries.len() > capacity {
            Self::evict_oldest(entries, capacity);
        }

        if before != entries.len() {
            debug!("local cache sweep: {} -> {} entries", before, entries.len());
        }
    }

    fn evict_oldest(entries: &mut HashMap<String, CachedResponse>, capacity: usize) {
        let excess = entries.len().saturating_sub(capacity);
        if excess == 0 {
            return;
        }

        let mut by_age: Vec<(String, std::time::Instant)> = entries
            .iter()
            .map(|(k, v)| (k.clone(), v.inserted_at))
            .collect();
        by_age.sort_by_key(|(_, inserted_at)| *inserted_at);

        for (key, _) in by_age.into_iter().take(excess) {
            entries.remove(&key);
            debug!("evicted oldest-inserted entry: {}", key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::{HeaderMap, StatusCode};
    use std::time::Duration;

    fn entry(ttl: Duration) -> CachedResponse {
        CachedResponse::new(
            StatusCode::OK,
            HeaderMap::new(),
            Bytes::from_static(b"data"),
            ttl,
        )
    }

    #[test]
    fn test_hit_and_miss() {
        let cache = LocalCache::new(10, 100);
        cache.put("a", entry(Duration::from_secs(60)));

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
    }

    #[test]
    fn test_expired_entry_is_a_miss() {
        let cache = LocalCache::new(10, 100);
        cache.put("a", entry(Duration::from_secs(0)));

        assert!(cache.get("a").is_none());
        // The expired entry was dropped on read
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_insertion_order_eviction() {
        let cache = LocalCache::new(3, 1000);
        cache.put("first", entry(Duration::from_secs(60)));
        std::thread::sleep(Duration::from_millis(5));
        cache.put("second", entry(Duration::from_secs(60)));
        std::thread::sleep(Duration::from_millis(5));
        cache.put("third", entry(Duration::from_secs(60)));

        // Reading "first" must not protect it: eviction is by insertion
        // time, not access time.
        assert!(cache.get("first").is_some());

        std::thread::sleep(Duration::from_millis(5));
        cache.put("fourth", entry(Duration::from_secs(60)));

        assert_eq!(cache.len(), 3);
        assert!(cache.get("first").is_none());
        assert!(cache.get("second").is_some());
        assert!(cache.get("fourth").is_some());
    }

    #[test]
    fn test_replace_does_not_grow() {
        let cache = LocalCache::new(2, 1000);
        cache.put("a", entry(Duration::from_secs(60)));
        cache.put("a", entry(Duration::from_secs(60)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_nth_request_sweep_drops_expired() {
        let cache = LocalCache::new(10, 4);
        cache.put("stale", entry(Duration::from_secs(0)));
        cache.put("fresh", entry(Duration::from_secs(60)));
        assert_eq!(cache.len(), 2);

        // Sweep fires on the 4th get; look up a different key so the
        // stale entry is only removed by the sweep itself.
        for _ in 0..4 {
            cache.get("fresh");
        }
        assert_eq!(cache.len(), 1);
    }
}
