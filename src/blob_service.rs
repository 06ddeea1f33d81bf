//! Core blob-serving chain
//!
//! Dispatch order for every blob request:
//! moderation gate -> tiered cache -> request coalescer -> admission
//! controller -> object store -> legacy-origin fallback.
//!
//! The moderation gate runs before the cache on purpose: a blocked hash
//! must return 451 even while a valid cache entry for it still exists.

use crate::admission::AdmissionController;
use crate::coalescer::RequestCoalescer;
use crate::counters::EdgeCounters;
use crate::error::{EdgeError, Result};
use crate::models::{cache_key, content_type_for_path, CachedResponse, ObjectLocator};
use crate::moderation::ModerationStore;
use crate::origin::{LegacyOrigin, MetadataIndex, ObjectStore};
use crate::range::{RangeSpec, ResolvedRange};
use crate::tiered_cache::TieredCache;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use std::sync::Arc;
use tracing::{debug, info};

/// One classified blob request, after the router has resolved the hash
#[derive(Debug, Clone)]
pub struct BlobRequest {
    pub hash: String,
    pub path: String,
    pub query: Option<String>,
    pub range: Option<RangeSpec>,
}

impl BlobRequest {
    /// Cache/coalescing key: hash + path + query + raw range
    fn cache_key(&self) -> String {
        cache_key(
            &self.hash,
            &self.path,
            self.query.as_deref(),
            self.range.map(|r| r.key_part()).as_deref(),
        )
    }

    /// Canonical URL used as the shared edge-cache key
    ///
    /// The range token is folded in so a 206 entry can never shadow the
    /// full-object entry on a sibling instance either.
    fn canonical_url(&self) -> String {
        let mut url = self.path.clone();
        if let Some(q) = &self.query {
            url.push('?');
            url.push_str(q);
        }
        if let Some(r) = &self.range {
            url.push_str("#range=");
            url.push_str(&r.key_part());
        }
        url
    }
}

/// How a blob response was produced, for the observability headers
#[derive(Debug, Clone)]
pub struct BlobOutcome {
    pub response: CachedResponse,
    /// "local", "edge" or "miss"
    pub cache_status: &'static str,
    pub coalesced: bool,
}

/// The caching / coalescing / admission engine
pub struct BlobService {
    cache: TieredCache,
    coalescer: RequestCoalescer,
    admission: Arc<AdmissionController>,
    store: Arc<dyn ObjectStore>,
    index: Arc<dyn MetadataIndex>,
    moderation: Arc<dyn ModerationStore>,
    legacy: Option<Arc<LegacyOrigin>>,
    counters: Arc<EdgeCounters>,
    key_prefix: String,
}

impl BlobService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cache: TieredCache,
        admission: Arc<AdmissionController>,
        store: Arc<dyn ObjectStore>,
        index: Arc<dyn MetadataIndex>,
        moderation: Arc<dyn ModerationStore>,
        legacy: Option<Arc<LegacyOrigin>>,
        counters: Arc<EdgeCounters>,
        key_prefix: &str,
    ) -> Self {
        BlobService {
            cache,
            coalescer: RequestCoalescer::new(),
            admission,
            store,
            index,
            moderation,
            legacy,
            counters,
            key_prefix: key_prefix.to_string(),
        }
    }

    /// Serve one blob request through the full chain
    pub async fn serve(&self, req: &BlobRequest) -> Result<BlobOutcome> {
        // Moderation precedes everything, including cache hits
        if let Some(record) = self.moderation.block_record(&req.hash).await? {
            if record.is_active() {
                info!("blocked hash requested: {} ({})", req.hash, record.reason);
                return Err(EdgeError::Blocked {
                    reason: record.reason,
                });
            }
        }

        let key = req.cache_key();
        let url = req.canonical_url();

        if let Some((response, tier)) = self.cache.get(&key, &url).await? {
            match tier {
                crate::tiered_cache::CacheTier::Local => self.counters.record_local_hit(),
                crate::tiered_cache::CacheTier::Edge => self.counters.record_edge_hit(),
            }
            return Ok(BlobOutcome {
                response,
                cache_status: tier.as_str(),
                coalesced: false,
            });
        }

        let (outcome, coalesced) = self
            .coalescer
            .coalesce(&key, || self.fetch_through_admission(req))
            .await;
        let response = outcome?;

        if coalesced {
            self.counters.record_coalesced();
        } else {
            // Only the leader writes through; followers share its entry
            self.cache.put(&key, &url, &response).await?;
        }

        Ok(BlobOutcome {
            response,
            cache_status: "miss",
            coalesced,
        })
    }

    /// Acquire an admission slot, then fetch from the origins
    ///
    /// The ticket is held across the legacy fallback too: the fallback
    /// origin is slower than the primary, not sturdier.
    async fn fetch_through_admission(&self, req: &BlobRequest) -> Result<CachedResponse> {
        let _ticket = self.admission.admit().await?;
        self.counters.record_origin_fetch();

        let locator = ObjectLocator::new(&req.hash, &self.key_prefix);
        match self.fetch_primary(req, &locator).await {
            Ok(response) => Ok(response),
            Err(e) if e.allows_legacy_fallback() => {
                // Without a fallback tier the primary's verdict stands:
                // a miss is a plain 404, not a server error
                let Some(legacy) = self.legacy.as_ref() else {
                    return Err(e);
                };
                debug!("primary origin miss for {}: {}; trying legacy", req.hash, e);
                self.fetch_legacy(legacy, req).await
            }
            Err(e) => Err(e),
        }
    }

    /// Try each locator key variant against the object store
    async fn fetch_primary(
        &self,
        req: &BlobRequest,
        locator: &ObjectLocator,
    ) -> Result<CachedResponse> {
        match req.range {
            None => {
                for key in locator.candidates() {
                    if let Some(body) = self.store.get(key).await? {
                        return Ok(self.assemble(req, body, None));
                    }
                }
                Err(EdgeError::NotFound)
            }
            Some(spec) => {
                for key in locator.candidates() {
                    let Some(size) = self.store.head(key).await? else {
                        continue;
                    };
                    // Range violations are terminal: no other variant or
                    // origin is consulted for them
                    let resolved = spec.resolve(size)?;
                    let body = self
                        .store
                        .get_range(key, resolved.start, resolved.end)
                        .await?
                        .ok_or_else(|| {
                            EdgeError::Upstream("object disappeared between head and get".to_string())
                        })?;
                    return Ok(self.assemble(req, body, Some(resolved)));
                }
                Err(EdgeError::NotFound)
            }
        }
    }

    /// Resolve hash -> legacy id and proxy the legacy streaming origin
    async fn fetch_legacy(
        &self,
        legacy: &LegacyOrigin,
        req: &BlobRequest,
    ) -> Result<CachedResponse> {
        let legacy_id = self
            .index
            .legacy_id_for_hash(&req.hash)
            .await?
            .ok_or(EdgeError::NotFound)?;

        let range_header = req.range.map(|r| r.to_header());
        let upstream = legacy
            .fetch_video(&legacy_id, range_header.as_deref())
            .await?;
        self.counters.record_legacy_fallback();

        Ok(CachedResponse::new(
            upstream.status,
            upstream.headers,
            upstream.body,
            self.cache.ttl(),
        ))
    }

    /// Build the final response headers for a primary-origin hit
    ///
    /// Blobs are content-addressed, so the ETag is the hash itself and
    /// the body is immutable for as long as anyone may cache it.
    fn assemble(
        &self,
        req: &BlobRequest,
        body: Bytes,
        resolved: Option<ResolvedRange>,
    ) -> CachedResponse {
        let mut headers = HeaderMap::new();
        headers.insert("accept-ranges", "bytes".parse().unwrap());
        if let Ok(etag) = format!("\"{}\"", req.hash).parse() {
            headers.insert("etag", etag);
        }
        headers.insert(
            "cache-control",
            "public, max-age=31536000, immutable".parse().unwrap(),
        );
        if let Ok(ct) = content_type_for_path(&req.path).parse() {
            headers.insert("content-type", ct);
        }

        let status = match resolved {
            Some(range) => {
                headers.insert("content-range", range.content_range().parse().unwrap());
                headers.insert(
                    "content-length",
                    range.len().to_string().parse().unwrap(),
                );
                StatusCode::PARTIAL_CONTENT
            }
            None => {
                headers.insert(
                    "content-length",
                    body.len().to_string().parse().unwrap(),
                );
                StatusCode::OK
            }
        };

        CachedResponse::new(status, headers, body, self.cache.ttl())
    }

    /// Current admitted origin fetches, for monitoring headers
    pub fn active_fetches(&self) -> usize {
        self.admission.active_fetches()
    }

    /// Current admission queue depth, for monitoring headers
    pub fn queue_depth(&self) -> usize {
        self.admission.queue_depth()
    }

    /// Local cache entry count, for monitoring headers
    pub fn local_cache_entries(&self) -> usize {
        self.cache.local_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge_cache::NullEdgeCache;
    use crate::models::BlockRecord;
    use crate::moderation::MemoryModerationStore;
    use crate::origin::{MemoryMetadataIndex, MemoryObjectStore};
    use std::time::Duration;

    const HASH: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    struct Fixture {
        service: BlobService,
        store: Arc<MemoryObjectStore>,
        moderation: Arc<MemoryModerationStore>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryObjectStore::new());
        let index = Arc::new(MemoryMetadataIndex::new());
        let moderation = Arc::new(MemoryModerationStore::new());
        let admission = Arc::new(AdmissionController::new(
            10,
            Duration::from_secs(1),
            Duration::from_secs(2),
        ));
        let cache = TieredCache::new(
            100,
            100,
            Duration::from_secs(60),
            Arc::new(NullEdgeCache),
        );
        let service = BlobService::new(
            cache,
            admission,
            store.clone(),
            index,
            moderation.clone(),
            None,
            Arc::new(EdgeCounters::new()),
            "media",
        );
        Fixture {
            service,
            store,
            moderation,
        }
    }

    fn request(range: Option<&str>) -> BlobRequest {
        BlobRequest {
            hash: HASH.to_string(),
            path: format!("/{}.mp4", HASH),
            query: None,
            range: range.map(|r| RangeSpec::parse(r).unwrap()),
        }
    }

    #[tokio::test]
    async fn test_full_object_fetch_and_cache() {
        let fx = fixture();
        fx.store.insert(
            &format!("media/{}", HASH),
            Bytes::from_static(b"video-bytes"),
            "video/mp4",
        );

        let outcome = fx.service.serve(&request(None)).await.unwrap();
        assert_eq!(outcome.response.status, StatusCode::OK);
        assert_eq!(outcome.response.body, Bytes::from_static(b"video-bytes"));
        assert_eq!(outcome.cache_status, "miss");
        assert_eq!(
            outcome.response.headers.get("etag").unwrap(),
            &format!("\"{}\"", HASH)
        );
        assert_eq!(
            outcome.response.headers.get("accept-ranges").unwrap(),
            "bytes"
        );

        // Second request is a local hit
        let outcome = fx.service.serve(&request(None)).await.unwrap();
        assert_eq!(outcome.cache_status, "local");
    }

    #[tokio::test]
    async fn test_legacy_key_variant_is_tried() {
        let fx = fixture();
        // Object only exists under the bare-hash legacy key
        fx.store
            .insert(HASH, Bytes::from_static(b"old-format"), "video/mp4");

        let outcome = fx.service.serve(&request(None)).await.unwrap();
        assert_eq!(outcome.response.body, Bytes::from_static(b"old-format"));
    }

    #[tokio::test]
    async fn test_range_fetch() {
        let fx = fixture();
        fx.store.insert(
            &format!("media/{}", HASH),
            Bytes::from(vec![7u8; 1000]),
            "video/mp4",
        );

        let outcome = fx.service.serve(&request(Some("bytes=100-199"))).await.unwrap();
        assert_eq!(outcome.response.status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(outcome.response.body.len(), 100);
        assert_eq!(
            outcome.response.headers.get("content-range").unwrap(),
            "bytes 100-199/1000"
        );
        assert_eq!(
            outcome.response.headers.get("content-length").unwrap(),
            "100"
        );
    }

    #[tokio::test]
    async fn test_range_out_of_bounds_is_416() {
        let fx = fixture();
        fx.store.insert(
            &format!("media/{}", HASH),
            Bytes::from(vec![7u8; 1000]),
            "video/mp4",
        );

        let err = fx
            .service
            .serve(&request(Some("bytes=0-1999")))
            .await
            .unwrap_err();
        assert!(matches!(err, EdgeError::RangeNotSatisfiable { size: 1000 }));
    }

    #[tokio::test]
    async fn test_ranged_and_full_entries_do_not_collide() {
        let fx = fixture();
        fx.store.insert(
            &format!("media/{}", HASH),
            Bytes::from(vec![7u8; 1000]),
            "video/mp4",
        );

        let ranged = fx.service.serve(&request(Some("bytes=0-9"))).await.unwrap();
        assert_eq!(ranged.response.body.len(), 10);

        // The full-object request must not be served the 206 entry
        let full = fx.service.serve(&request(None)).await.unwrap();
        assert_eq!(full.response.status, StatusCode::OK);
        assert_eq!(full.response.body.len(), 1000);
    }

    #[tokio::test]
    async fn test_blocked_hash_beats_cache() {
        let fx = fixture();
        fx.store.insert(
            &format!("media/{}", HASH),
            Bytes::from_static(b"video-bytes"),
            "video/mp4",
        );

        // Prime the cache, then block the hash
        fx.service.serve(&request(None)).await.unwrap();
        fx.moderation.block(
            HASH,
            BlockRecord {
                reason: "dmca".to_string(),
                category: None,
                severity: None,
                expires_at: None,
            },
        );

        let err = fx.service.serve(&request(None)).await.unwrap_err();
        assert!(matches!(err, EdgeError::Blocked { .. }));
    }

    #[tokio::test]
    async fn test_lapsed_block_is_ignored() {
        let fx = fixture();
        fx.store.insert(
            &format!("media/{}", HASH),
            Bytes::from_static(b"video-bytes"),
            "video/mp4",
        );
        fx.moderation.block(
            HASH,
            BlockRecord {
                reason: "expired takedown".to_string(),
                category: None,
                severity: None,
                expires_at: Some(1),
            },
        );

        assert!(fx.service.serve(&request(None)).await.is_ok());
    }

    #[tokio::test]
    async fn test_absent_everywhere_is_not_found() {
        let fx = fixture();
        let err = fx.service.serve(&request(None)).await.unwrap_err();
        // No legacy origin configured and no mapping: plain 404
        assert!(matches!(err, EdgeError::NotFound));
    }

    /// Object store that fails every call
    struct FailingStore;

    #[async_trait::async_trait]
    impl ObjectStore for FailingStore {
        async fn get(&self, _key: &str) -> Result<Option<Bytes>> {
            Err(EdgeError::Upstream("store down".to_string()))
        }
        async fn get_range(&self, _key: &str, _start: u64, _end: u64) -> Result<Option<Bytes>> {
            Err(EdgeError::Upstream("store down".to_string()))
        }
        async fn head(&self, _key: &str) -> Result<Option<u64>> {
            Err(EdgeError::Upstream("store down".to_string()))
        }
        async fn put(&self, _key: &str, _data: Bytes, _content_type: &str) -> Result<()> {
            Err(EdgeError::Upstream("store down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_store_failure_without_legacy_stays_upstream_error() {
        // Skipping the absent fallback must not rewrite the primary's
        // verdict: a store outage is still a 502, not a 404
        let service = BlobService::new(
            TieredCache::new(100, 100, Duration::from_secs(60), Arc::new(NullEdgeCache)),
            Arc::new(AdmissionController::new(
                10,
                Duration::from_secs(1),
                Duration::from_secs(2),
            )),
            Arc::new(FailingStore),
            Arc::new(MemoryMetadataIndex::new()),
            Arc::new(MemoryModerationStore::new()),
            None,
            Arc::new(EdgeCounters::new()),
            "media",
        );

        let err = service.serve(&request(None)).await.unwrap_err();
        assert!(matches!(err, EdgeError::Upstream(_)));
    }
}
