//! Shared edge cache tier
//!
//! The second cache tier is shared between proxy instances on the same
//! edge and is keyed by canonical request URL. It is reached over HTTP,
//! so lookups are suspension points; the proxy treats it as best-effort
//! and degrades to the origin chain when it misses or fails.

use crate::error::{EdgeError, Result};
use crate::models::CachedResponse;
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, warn};

/// Header carrying the original response status through the edge cache
const STATUS_HEADER: &str = "x-edge-status";

/// Shared cache tier reached after the process-local tier misses
#[async_trait]
pub trait EdgeCache: Send + Sync {
    /// Look up by canonical request URL
    async fn get(&self, url: &str) -> Result<Option<CachedResponse>>;

    /// Store a response under its canonical request URL
    async fn put(&self, url: &str, entry: &CachedResponse) -> Result<()>;
}

/// HTTP-backed edge cache client
pub struct HttpEdgeCache {
    client: Client,
    base_url: String,
    entry_ttl: Duration,
}

impl HttpEdgeCache {
    pub fn new(base_url: &str, entry_ttl: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| EdgeError::Cache(format!("Failed to create edge cache client: {}", e)))?;

        Ok(HttpEdgeCache {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            entry_ttl,
        })
    }

    fn slot_url(&self, url: &str) -> String {
        // The cache service keys on an opaque token; flatten the URL the
        // same way for reads and writes.
        let token: String = url
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("{}/{}", self.base_url, token)
    }
}

#[async_trait]
impl EdgeCache for HttpEdgeCache {
    async fn get(&self, url: &str) -> Result<Option<CachedResponse>> {
        let slot = self.slot_url(url);
        let response = match self.client.get(&slot).send().await {
            Ok(r) => r,
            Err(e) => {
                // Edge cache trouble never fails the request
                warn!("edge cache get failed for {}: {}", url, e);
                return Ok(None);
            }
        };

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            warn!(
                "edge cache get for {} returned {}",
                url,
                response.status()
            );
            return Ok(None);
        }

        let stored_status = response
            .headers()
            .get(STATUS_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u16>().ok())
            .and_then(|v| StatusCode::from_u16(v).ok())
            .unwrap_or(StatusCode::OK);

        let mut headers = HeaderMap::new();
        for name in ["content-type", "content-range", "accept-ranges", "etag", "cache-control"] {
            if let Some(value) = response.headers().get(name) {
                if let Ok(name) = http::header::HeaderName::from_bytes(name.as_bytes()) {
                    headers.insert(name, value.clone());
                }
            }
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| EdgeError::Cache(format!("edge cache body read failed: {}", e)))?;

        debug!("edge cache hit: {}", url);
        Ok(Some(CachedResponse::new(
            stored_status,
            headers,
            body,
            self.entry_ttl,
        )))
    }

    async fn put(&self, url: &str, entry: &CachedResponse) -> Result<()> {
        let slot = self.slot_url(url);
        let mut request = self
            .client
            .put(&slot)
            .header(STATUS_HEADER, entry.status.as_u16().to_string())
            .body(entry.body.clone());

        for name in ["content-type", "content-range", "accept-ranges", "etag", "cache-control"] {
            if let Some(value) = entry.headers.get(name) {
                request = request.header(name, value.clone());
            }
        }

        match request.send().await {
            Ok(r) if r.status().is_success() => Ok(()),
            Ok(r) => {
                warn!("edge cache put for {} returned {}", url, r.status());
                Ok(())
            }
            Err(e) => {
                warn!("edge cache put failed for {}: {}", url, e);
                Ok(())
            }
        }
    }
}

/// In-memory edge cache, used in tests and single-instance deployments
#[derive(Default)]
pub struct MemoryEdgeCache {
    entries: RwLock<HashMap<String, CachedResponse>>,
}

impl MemoryEdgeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EdgeCache for MemoryEdgeCache {
    async fn get(&self, url: &str) -> Result<Option<CachedResponse>> {
        let entries = self.entries.read().unwrap();
        Ok(entries.get(url).filter(|e| !e.is_expired()).cloned())
    }

    async fn put(&self, url: &str, entry: &CachedResponse) -> Result<()> {
        self.entries
            .write()
            .unwrap()
            .insert(url.to_string(), entry.clone());
        Ok(())
    }
}

/// Edge cache that is always a miss, for deployments without a shared tier
pub struct NullEdgeCache;

#[async_trait]
impl EdgeCache for NullEdgeCache {
    async fn get(&self, _url: &str) -> Result<Option<CachedResponse>> {
        Ok(None)
    }

    async fn put(&self, _url: &str, _entry: &CachedResponse) -> Result<()> {
        Ok(())
    }
}
