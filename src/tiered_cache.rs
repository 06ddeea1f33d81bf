//! Two-tier cache: process-local map over the shared edge cache
//!
//! The local tier is checked first and is purely in-process; the edge
//! tier is shared between instances and keyed by canonical request URL.
//! An edge hit backfills the local tier before returning, and a
//! write-through after an origin fetch populates both tiers.

use crate::cache::LocalCache;
use crate::edge_cache::EdgeCache;
use crate::error::Result;
use crate::models::CachedResponse;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Which tier satisfied a cache lookup, surfaced as `X-CDN-Cache`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    Local,
    Edge,
}

impl CacheTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTier::Local => "local",
            CacheTier::Edge => "edge",
        }
    }
}

/// Process-local tier layered over the shared edge tier
pub struct TieredCache {
    local: LocalCache,
    edge: Arc<dyn EdgeCache>,
    ttl: Duration,
}

impl TieredCache {
    /// # Arguments
    /// * `capacity` - local tier capacity in entries
    /// * `sweep_interval` - local tier sweep period in requests
    /// * `ttl` - entry TTL applied to both tiers
    /// * `edge` - shared tier implementation
    pub fn new(
        capacity: usize,
        sweep_interval: u64,
        ttl: Duration,
        edge: Arc<dyn EdgeCache>,
    ) -> Self {
        TieredCache {
            local: LocalCache::new(capacity, sweep_interval),
            edge,
            ttl,
        }
    }

    /// Look up an entry, trying local then edge
    ///
    /// An edge hit is re-stamped with a fresh local TTL and backfilled
    /// into the local tier before being returned.
    pub async fn get(&self, key: &str, url: &str) -> Result<Option<(CachedResponse, CacheTier)>> {
        if let Some(entry) = self.local.get(key) {
            debug!("local cache hit: {}", key);
            return Ok(Some((entry, CacheTier::Local)));
        }

        if let Some(entry) = self.edge.get(url).await? {
            debug!("edge cache hit (backfilling local): {}", url);
            let refreshed =
                CachedResponse::new(entry.status, entry.headers.clone(), entry.body.clone(), self.ttl);
            self.local.put(key, refreshed.clone());
            return Ok(Some((refreshed, CacheTier::Edge)));
        }

        Ok(None)
    }

    /// Write-through after a successful origin fetch: both tiers
    pub async fn put(&self, key: &str, url: &str, entry: &CachedResponse) -> Result<()> {
        self.local.put(key, entry.clone());
        self.edge.put(url, entry).await
    }

    /// Local tier entry count, for monitoring headers
    pub fn local_len(&self) -> usize {
        self.local.len()
    }

    /// Entry TTL applied on writes
    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge_cache::{MemoryEdgeCache, NullEdgeCache};
    use bytes::Bytes;
    use http::{HeaderMap, StatusCode};

    fn entry(body: &'static [u8]) -> CachedResponse {
        CachedResponse::new(
            StatusCode::OK,
            HeaderMap::new(),
            Bytes::from_static(body),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn test_local_hit_wins() {
        let cache = TieredCache::new(10, 100, Duration::from_secs(60), Arc::new(NullEdgeCache));
        cache.put("k", "http://edge/k", &entry(b"data")).await.unwrap();

        let (hit, tier) = cache.get("k", "http://edge/k").await.unwrap().unwrap();
        assert_eq!(tier, CacheTier::Local);
        assert_eq!(hit.body, Bytes::from_static(b"data"));
    }

    #[tokio::test]
    async fn test_edge_hit_backfills_local() {
        let edge = Arc::new(MemoryEdgeCache::new());
        let cache = TieredCache::new(10, 100, Duration::from_secs(60), edge.clone());

        // Seed only the edge tier, as a sibling instance would have
        edge.put("http://edge/k", &entry(b"data")).await.unwrap();

        let (_, tier) = cache.get("k", "http://edge/k").await.unwrap().unwrap();
        assert_eq!(tier, CacheTier::Edge);
        assert_eq!(cache.local_len(), 1);

        // Second lookup is served locally
        let (_, tier) = cache.get("k", "http://edge/k").await.unwrap().unwrap();
        assert_eq!(tier, CacheTier::Local);
    }

    #[tokio::test]
    async fn test_write_through_populates_both() {
        let edge = Arc::new(MemoryEdgeCache::new());
        let cache = TieredCache::new(10, 100, Duration::from_secs(60), edge.clone());

        cache.put("k", "http://edge/k", &entry(b"data")).await.unwrap();
        assert_eq!(cache.local_len(), 1);
        assert_eq!(edge.len(), 1);
    }

    #[tokio::test]
    async fn test_miss() {
        let cache = TieredCache::new(10, 100, Duration::from_secs(60), Arc::new(NullEdgeCache));
        assert!(cache.get("k", "http://edge/k").await.unwrap().is_none());
    }
}
