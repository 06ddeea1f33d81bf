//! Thumbnail transform flow
//!
//! Frame extraction is delegated to an external transform capability and
//! the result is cached locally. The flow never surfaces an error to the
//! client: when the transform fails (or no transform service is
//! configured) a synthesized placeholder PNG comes back with 200, so a
//! broken thumbnail pipeline degrades pages instead of breaking them.

use crate::cache::LocalCache;
use crate::error::{EdgeError, Result};
use crate::models::CachedResponse;
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Smallest valid PNG: a single transparent pixel
///
/// Served when frame extraction fails so `<img>` tags render an empty
/// box rather than a broken-image glyph.
const PLACEHOLDER_PNG: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, // signature
    0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44, 0x52, // IHDR
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00,
    0x00, 0x1f, 0x15, 0xc4, 0x89, // 1x1, RGBA
    0x00, 0x00, 0x00, 0x0d, 0x49, 0x44, 0x41, 0x54, // IDAT
    0x78, 0x9c, 0x62, 0x00, 0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0d, 0x0a,
    0x2d, 0xb4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4e, 0x44, // IEND
    0xae, 0x42, 0x60, 0x82,
];

/// An extracted thumbnail frame
#[derive(Debug, Clone)]
pub struct TransformResult {
    pub body: Bytes,
    pub content_type: String,
}

/// External media transform capability (frame extraction)
#[async_trait]
pub trait MediaTransform: Send + Sync {
    /// Extract a frame for `hash`, shaped by the raw transform parameter
    /// string from the request path (e.g. `width=320,time=2s`)
    async fn extract_frame(&self, hash: &str, params: &str) -> Result<TransformResult>;
}

/// HTTP-backed transform client
pub struct HttpMediaTransform {
    client: Client,
    base_url: String,
}

impl HttpMediaTransform {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| EdgeError::Upstream(format!("Failed to create transform client: {}", e)))?;

        Ok(HttpMediaTransform {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl MediaTransform for HttpMediaTransform {
    async fn extract_frame(&self, hash: &str, params: &str) -> Result<TransformResult> {
        let url = format!("{}/frame/{}?{}", self.base_url, hash, params);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EdgeError::Upstream(format!("transform request failed: {}", e)))?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(EdgeError::from_upstream_status(status, "transform service"));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/jpeg")
            .to_string();
        let body = response
            .bytes()
            .await
            .map_err(|e| EdgeError::Upstream(format!("transform body read failed: {}", e)))?;

        Ok(TransformResult { body, content_type })
    }
}

/// Transform flow with its own result cache
pub struct ThumbnailService {
    cache: LocalCache,
    transform: Option<Arc<dyn MediaTransform>>,
    ttl: Duration,
}

impl ThumbnailService {
    pub fn new(
        capacity: usize,
        sweep_interval: u64,
        ttl: Duration,
        transform: Option<Arc<dyn MediaTransform>>,
    ) -> Self {
        ThumbnailService {
            cache: LocalCache::new(capacity, sweep_interval),
            transform,
            ttl,
        }
    }

    /// Serve a thumbnail for `hash`; infallible by design
    pub async fn serve(&self, hash: &str, params: &str) -> CachedResponse {
        let key = format!("{}#{}", hash, params);
        if let Some(hit) = self.cache.get(&key) {
            return hit;
        }

        let response = match &self.transform {
            Some(transform) => match transform.extract_frame(hash, params).await {
                Ok(result) => {
                    Self::image_response(result.body, &result.content_type, self.ttl)
                }
                Err(e) => {
                    warn!("frame extraction failed for {}: {}; serving placeholder", hash, e);
                    Self::placeholder(self.ttl)
                }
            },
            None => Self::placeholder(self.ttl),
        };

        self.cache.put(&key, response.clone());
        response
    }

    fn image_response(body: Bytes, content_type: &str, ttl: Duration) -> CachedResponse {
        let mut headers = HeaderMap::new();
        if let Ok(ct) = content_type.parse() {
            headers.insert("content-type", ct);
        }
        headers.insert(
            "cache-control",
            "public, max-age=86400".parse().unwrap(),
        );
        CachedResponse::new(StatusCode::OK, headers, body, ttl)
    }

    fn placeholder(ttl: Duration) -> CachedResponse {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "image/png".parse().unwrap());
        // Failures are retried on the next cache miss; keep them cached
        // only briefly so a recovered transform service takes over.
        let ttl = ttl.min(Duration::from_secs(30));
        CachedResponse::new(
            StatusCode::OK,
            headers,
            Bytes::from_static(PLACEHOLDER_PNG),
            ttl,
        )
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedTransform {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MediaTransform for FixedTransform {
        async fn extract_frame(&self, _hash: &str, _params: &str) -> Result<TransformResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(TransformResult {
                body: Bytes::from_static(b"jpeg-frame"),
                content_type: "image/jpeg".to_string(),
            })
        }
    }

    struct FailingTransform;

    #[async_trait]
    impl MediaTransform for FailingTransform {
        async fn extract_frame(&self, _hash: &str, _params: &str) -> Result<TransformResult> {
            Err(EdgeError::Upstream("decoder crashed".to_string()))
        }
    }

    #[tokio::test]
    async fn test_frame_is_cached() {
        let transform = Arc::new(FixedTransform {
            calls: AtomicUsize::new(0),
        });
        let service = ThumbnailService::new(
            10,
            100,
            Duration::from_secs(60),
            Some(transform.clone()),
        );

        let first = service.serve("abc", "width=320").await;
        assert_eq!(first.status, StatusCode::OK);
        assert_eq!(first.body, Bytes::from_static(b"jpeg-frame"));
        assert_eq!(first.headers.get("content-type").unwrap(), "image/jpeg");

        let second = service.serve("abc", "width=320").await;
        assert_eq!(second.body, first.body);
        assert_eq!(transform.calls.load(Ordering::SeqCst), 1);

        // Different params are a different cache slot
        service.serve("abc", "width=640").await;
        assert_eq!(transform.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_yields_placeholder_not_error() {
        let service = ThumbnailService::new(
            10,
            100,
            Duration::from_secs(60),
            Some(Arc::new(FailingTransform)),
        );

        let response = service.serve("abc", "width=320").await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.headers.get("content-type").unwrap(), "image/png");
        assert_eq!(response.body, Bytes::from_static(PLACEHOLDER_PNG));
    }

    #[tokio::test]
    async fn test_no_transform_configured_yields_placeholder() {
        let service = ThumbnailService::new(10, 100, Duration::from_secs(60), None);
        let response = service.serve("abc", "width=320").await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, Bytes::from_static(PLACEHOLDER_PNG));
    }
}
