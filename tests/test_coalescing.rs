//! Request coalescing through the full blob-serving chain

use async_trait::async_trait;
use blobedge::{
    AdmissionController, BlobRequest, BlobService, EdgeCounters, MemoryMetadataIndex,
    MemoryModerationStore, MemoryObjectStore, NullEdgeCache, ObjectStore, Result, TieredCache,
};
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const HASH: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

/// Object store that counts fetches and holds each one open long enough
/// for concurrent requests to pile up behind the first
struct SlowCountingStore {
    inner: MemoryObjectStore,
    fetches: AtomicUsize,
    delay: Duration,
}

impl SlowCountingStore {
    fn new(delay: Duration) -> Self {
        SlowCountingStore {
            inner: MemoryObjectStore::new(),
            fetches: AtomicUsize::new(0),
            delay,
        }
    }
}

#[async_trait]
impl ObjectStore for SlowCountingStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.inner.get(key).await
    }

    async fn get_range(&self, key: &str, start: u64, end: u64) -> Result<Option<Bytes>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.inner.get_range(key, start, end).await
    }

    async fn head(&self, key: &str) -> Result<Option<u64>> {
        self.inner.head(key).await
    }

    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<()> {
        self.inner.put(key, data, content_type).await
    }
}

fn service(store: Arc<SlowCountingStore>, counters: Arc<EdgeCounters>) -> Arc<BlobService> {
    Arc::new(BlobService::new(
        TieredCache::new(100, 100, Duration::from_secs(60), Arc::new(NullEdgeCache)),
        Arc::new(AdmissionController::new(
            10,
            Duration::from_secs(5),
            Duration::from_secs(10),
        )),
        store,
        Arc::new(MemoryMetadataIndex::new()),
        Arc::new(MemoryModerationStore::new()),
        None,
        counters,
        "media",
    ))
}

fn request() -> BlobRequest {
    BlobRequest {
        hash: HASH.to_string(),
        path: format!("/{}.mp4", HASH),
        query: None,
        range: None,
    }
}

#[tokio::test]
async fn test_twenty_concurrent_requests_one_origin_fetch() {
    let store = Arc::new(SlowCountingStore::new(Duration::from_millis(100)));
    store
        .inner
        .insert(&format!("media/{}", HASH), Bytes::from_static(b"blob"), "video/mp4");
    let counters = Arc::new(EdgeCounters::new());
    let service = service(store.clone(), counters.clone());

    let mut handles = Vec::new();
    for _ in 0..20 {
        let service = service.clone();
        handles.push(tokio::spawn(async move { service.serve(&request()).await }));
    }

    let mut coalesced = 0;
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.response.body, Bytes::from_static(b"blob"));
        if outcome.coalesced {
            coalesced += 1;
        }
    }

    assert_eq!(store.fetches.load(Ordering::SeqCst), 1);
    assert_eq!(coalesced, 19);
    assert_eq!(counters.snapshot().coalesced_requests, 19);
    assert_eq!(counters.snapshot().origin_fetches, 1);
}

#[tokio::test]
async fn test_distinct_ranges_do_not_coalesce() {
    let store = Arc::new(SlowCountingStore::new(Duration::from_millis(50)));
    store
        .inner
        .insert(&format!("media/{}", HASH), Bytes::from(vec![1u8; 1000]), "video/mp4");
    let service = service(store.clone(), Arc::new(EdgeCounters::new()));

    let a = {
        let service = service.clone();
        tokio::spawn(async move {
            let mut req = request();
            req.range = Some(blobedge::RangeSpec::parse("bytes=0-99").unwrap());
            service.serve(&req).await
        })
    };
    let b = {
        let service = service.clone();
        tokio::spawn(async move {
            let mut req = request();
            req.range = Some(blobedge::RangeSpec::parse("bytes=100-199").unwrap());
            service.serve(&req).await
        })
    };

    assert!(!a.await.unwrap().unwrap().coalesced);
    assert!(!b.await.unwrap().unwrap().coalesced);
    assert_eq!(store.fetches.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_followers_share_the_leaders_failure() {
    // Nothing in the store and no legacy origin: the fetch fails, and
    // every coalesced caller must see the same NotFound.
    let store = Arc::new(SlowCountingStore::new(Duration::from_millis(80)));
    let service = service(store.clone(), Arc::new(EdgeCounters::new()));

    let mut handles = Vec::new();
    for _ in 0..5 {
        let service = service.clone();
        handles.push(tokio::spawn(async move { service.serve(&request()).await }));
    }

    for handle in handles {
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, blobedge::EdgeError::NotFound));
    }

    // One coalesced fetch probed both key variants
    assert_eq!(store.fetches.load(Ordering::SeqCst), 2);

    // A failure is not cached; the next request fetches again
    assert!(service.serve(&request()).await.is_err());
    assert_eq!(store.fetches.load(Ordering::SeqCst), 4);
}
