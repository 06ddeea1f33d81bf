//! Origin store clients
//!
//! Thin accessors for the backends the proxy reads from: the
//! content-addressed object store (primary origin), the metadata index
//! (hash <-> legacy-id and alias lookups) and the legacy streaming origin
//! used as fallback and as the transparent-proxy target.

use crate::error::{EdgeError, Result};
use crate::models::LegacyRecord;
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, warn};

/// A raw upstream response before cache/header assembly
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Content-addressed object store (primary origin)
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch a full object
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Fetch bytes `[start, end]` (inclusive) of an object
    async fn get_range(&self, key: &str, start: u64, end: u64) -> Result<Option<Bytes>>;

    /// Object size, or `None` if absent
    async fn head(&self, key: &str) -> Result<Option<u64>>;

    /// Store an object
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<()>;
}

/// Metadata index: the two lookups the core needs, plus alias resolution
#[async_trait]
pub trait MetadataIndex: Send + Sync {
    async fn legacy_id_for_hash(&self, hash: &str) -> Result<Option<String>>;

    async fn record_for_legacy_id(&self, legacy_id: &str) -> Result<Option<LegacyRecord>>;

    async fn legacy_id_for_alias(&self, alias: &str) -> Result<Option<String>>;
}

fn build_client(timeout: Duration, context: &str) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_nodelay(true)
        .build()
        .map_err(|e| EdgeError::Upstream(format!("Failed to create {} client: {}", context, e)))
}

/// HTTP-backed object store client
pub struct HttpObjectStore {
    client: Client,
    base_url: String,
}

impl HttpObjectStore {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(HttpObjectStore {
            client: build_client(Duration::from_secs(30), "object store")?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let response = self
            .client
            .get(self.object_url(key))
            .send()
            .await
            .map_err(|e| EdgeError::Upstream(format!("object store get failed: {}", e)))?;

        match response.status().as_u16() {
            404 => Ok(None),
            200 => {
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| EdgeError::Upstream(format!("object store body: {}", e)))?;
                Ok(Some(body))
            }
            status => Err(EdgeError::from_upstream_status(status, "object store get")),
        }
    }

    async fn get_range(&self, key: &str, start: u64, end: u64) -> Result<Option<Bytes>> {
        let response = self
            .client
            .get(self.object_url(key))
            .header("Range", format!("bytes={}-{}", start, end))
            .send()
            .await
            .map_err(|e| EdgeError::Upstream(format!("object store range get failed: {}", e)))?;

        match response.status().as_u16() {
            404 => Ok(None),
            206 => {
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| EdgeError::Upstream(format!("object store body: {}", e)))?;
                Ok(Some(body))
            }
            status => Err(EdgeError::from_upstream_status(status, "object store range get")),
        }
    }

    async fn head(&self, key: &str) -> Result<Option<u64>> {
        let response = self
            .client
            .head(self.object_url(key))
            .send()
            .await
            .map_err(|e| EdgeError::Upstream(format!("object store head failed: {}", e)))?;

        match response.status().as_u16() {
            404 => Ok(None),
            200 => {
                let size = response
                    .headers()
                    .get("content-length")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .ok_or_else(|| {
                        EdgeError::Upstream("object store head without content-length".to_string())
                    })?;
                Ok(Some(size))
            }
            status => Err(EdgeError::from_upstream_status(status, "object store head")),
        }
    }

    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<()> {
        let response = self
            .client
            .put(self.object_url(key))
            .header("Content-Type", content_type)
            .body(data)
            .send()
            .await
            .map_err(|e| EdgeError::Upstream(format!("object store put failed: {}", e)))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(EdgeError::from_upstream_status(
                response.status().as_u16(),
                "object store put",
            ))
        }
    }
}

/// In-memory object store, used in tests and local development
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, (Bytes, String)>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, data: Bytes, content_type: &str) {
        self.objects
            .write()
            .unwrap()
            .insert(key.to_string(), (data, content_type.to_string()));
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self
            .objects
            .read()
            .unwrap()
            .get(key)
            .map(|(data, _)| data.clone()))
    }

    async fn get_range(&self, key: &str, start: u64, end: u64) -> Result<Option<Bytes>> {
        let objects = self.objects.read().unwrap();
        match objects.get(key) {
            None => Ok(None),
            Some((data, _)) => {
                if start >= data.len() as u64 || end >= data.len() as u64 {
                    return Err(EdgeError::Upstream(format!(
                        "range {}-{} outside object of {} bytes",
                        start,
                        end,
                        data.len()
                    )));
                }
                Ok(Some(data.slice(start as usize..=end as usize)))
            }
        }
    }

    async fn head(&self, key: &str) -> Result<Option<u64>> {
        Ok(self
            .objects
            .read()
            .unwrap()
            .get(key)
            .map(|(data, _)| data.len() as u64))
    }

    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<()> {
        self.insert(key, data, content_type);
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct LegacyIdResponse {
    legacy_id: String,
}

/// HTTP-backed metadata index client (key-value REST lookups)
pub struct HttpMetadataIndex {
    client: Client,
    base_url: String,
}

impl HttpMetadataIndex {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(HttpMetadataIndex {
            client: build_client(Duration::from_secs(5), "metadata index")?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: String) -> Result<Option<T>> {
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EdgeError::Upstream(format!("metadata index lookup failed: {}", e)))?;

        match response.status().as_u16() {
            404 => Ok(None),
            200 => {
                let value = response
                    .json::<T>()
                    .await
                    .map_err(|e| EdgeError::Upstream(format!("invalid metadata record: {}", e)))?;
                Ok(Some(value))
            }
            status => Err(EdgeError::from_upstream_status(status, "metadata index")),
        }
    }
}

#[async_trait]
impl MetadataIndex for HttpMetadataIndex {
    async fn legacy_id_for_hash(&self, hash: &str) -> Result<Option<String>> {
        let url = format!("{}/hash/{}", self.base_url, hash);
        Ok(self
            .get_json::<LegacyIdResponse>(url)
            .await?
            .map(|r| r.legacy_id))
    }

    async fn record_for_legacy_id(&self, legacy_id: &str) -> Result<Option<LegacyRecord>> {
        let url = format!("{}/legacy/{}", self.base_url, legacy_id);
        self.get_json::<LegacyRecord>(url).await
    }

    async fn legacy_id_for_alias(&self, alias: &str) -> Result<Option<String>> {
        let url = format!("{}/alias/{}", self.base_url, alias);
        Ok(self
            .get_json::<LegacyIdResponse>(url)
            .await?
            .map(|r| r.legacy_id))
    }
}

/// In-memory metadata index, used in tests and local development
#[derive(Default)]
pub struct MemoryMetadataIndex {
    hash_to_legacy: RwLock<HashMap<String, String>>,
    legacy_records: RwLock<HashMap<String, LegacyRecord>>,
    aliases: RwLock<HashMap<String, String>>,
}

impl MemoryMetadataIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map_hash(&self, hash: &str, legacy_id: &str) {
        self.hash_to_legacy
            .write()
            .unwrap()
            .insert(hash.to_string(), legacy_id.to_string());
    }

    pub fn insert_legacy(&self, legacy_id: &str, record: LegacyRecord) {
        self.legacy_records
            .write()
            .unwrap()
            .insert(legacy_id.to_string(), record);
    }

    pub fn map_alias(&self, alias: &str, legacy_id: &str) {
        self.aliases
            .write()
            .unwrap()
            .insert(alias.to_string(), legacy_id.to_string());
    }
}

#[async_trait]
impl MetadataIndex for MemoryMetadataIndex {
    async fn legacy_id_for_hash(&self, hash: &str) -> Result<Option<String>> {
        Ok(self.hash_to_legacy.read().unwrap().get(hash).cloned())
    }

    async fn record_for_legacy_id(&self, legacy_id: &str) -> Result<Option<LegacyRecord>> {
        Ok(self.legacy_records.read().unwrap().get(legacy_id).cloned())
    }

    async fn legacy_id_for_alias(&self, alias: &str) -> Result<Option<String>> {
        Ok(self.aliases.read().unwrap().get(alias).cloned())
    }
}

/// Client for the legacy streaming origin
///
/// Serves two roles: fallback target when the object store misses, and
/// transparent reverse-proxy target for unmatched request paths.
pub struct LegacyOrigin {
    client: Client,
    base_url: String,
}

/// Request headers never forwarded to the legacy origin
const HOP_BY_HOP: &[&str] = &["host", "connection", "content-length", "transfer-encoding"];

impl LegacyOrigin {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(LegacyOrigin {
            client: build_client(Duration::from_secs(30), "legacy origin")?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch a video by legacy id, forwarding the Range header verbatim
    ///
    /// Normalizes `Accept-Ranges` and `Content-Type` on the response so
    /// clients see the same surface regardless of which origin served
    /// them.
    pub async fn fetch_video(
        &self,
        legacy_id: &str,
        range_header: Option<&str>,
    ) -> Result<UpstreamResponse> {
        let url = format!("{}/videos/{}", self.base_url, legacy_id);
        debug!("legacy origin fetch: {} (range: {:?})", url, range_header);

        let mut request = self.client.get(&url);
        if let Some(range) = range_header {
            request = request.header("Range", range);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EdgeError::Upstream(format!("legacy origin fetch failed: {}", e)))?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(EdgeError::NotFound);
        }
        if status.is_server_error() {
            warn!("legacy origin returned {} for {}", status, legacy_id);
            return Err(EdgeError::from_upstream_status(
                status.as_u16(),
                "legacy origin",
            ));
        }

        let mut headers = HeaderMap::new();
        for (name, value) in response.headers() {
            headers.insert(name.clone(), value.clone());
        }
        // Normalize the streaming surface: the legacy origin serves
        // video, so a missing or generic octet-stream content type is
        // rewritten while a specific one passes through
        headers.insert("accept-ranges", "bytes".parse().unwrap());
        let generic = headers
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("application/octet-stream"))
            .unwrap_or(true);
        if generic {
            headers.insert("content-type", "video/mp4".parse().unwrap());
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| EdgeError::Upstream(format!("legacy origin body: {}", e)))?;

        Ok(UpstreamResponse {
            status: StatusCode::from_u16(status.as_u16())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            headers,
            body,
        })
    }

    /// Transparent reverse proxy for unmatched paths
    pub async fn proxy(
        &self,
        method: &Method,
        path_and_query: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<UpstreamResponse> {
        let url = format!("{}{}", self.base_url, path_and_query);
        debug!("transparent proxy: {} {}", method, url);

        let mut forwarded = HeaderMap::new();
        for (name, value) in headers {
            if !HOP_BY_HOP.contains(&name.as_str()) {
                forwarded.insert(name.clone(), value.clone());
            }
        }

        let method = reqwest::Method::from_bytes(method.as_str().as_bytes())
            .map_err(|e| EdgeError::Internal(format!("invalid method: {}", e)))?;

        let response = self
            .client
            .request(method, &url)
            .headers(forwarded)
            .body(body)
            .send()
            .await
            .map_err(|e| EdgeError::Upstream(format!("legacy origin proxy failed: {}", e)))?;

        let status = StatusCode::from_u16(response.status().as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        let mut response_headers = HeaderMap::new();
        for (name, value) in response.headers() {
            response_headers.insert(name.clone(), value.clone());
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| EdgeError::Upstream(format!("legacy origin body: {}", e)))?;

        Ok(UpstreamResponse {
            status,
            headers: response_headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_full_object() {
        let store = MemoryObjectStore::new();
        store.insert("media/abc", Bytes::from_static(b"hello world"), "video/mp4");

        assert_eq!(
            store.get("media/abc").await.unwrap(),
            Some(Bytes::from_static(b"hello world"))
        );
        assert_eq!(store.head("media/abc").await.unwrap(), Some(11));
        assert!(store.get("missing").await.unwrap().is_none());
        assert!(store.head("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_range() {
        let store = MemoryObjectStore::new();
        store.insert("k", Bytes::from_static(b"0123456789"), "video/mp4");

        let slice = store.get_range("k", 2, 5).await.unwrap().unwrap();
        assert_eq!(slice, Bytes::from_static(b"2345"));

        assert!(store.get_range("missing", 0, 1).await.unwrap().is_none());
        assert!(store.get_range("k", 5, 100).await.is_err());
    }

    #[tokio::test]
    async fn test_memory_index_lookups() {
        let index = MemoryMetadataIndex::new();
        index.map_hash("hash1", "legacy1");
        index.insert_legacy(
            "legacy1",
            LegacyRecord {
                hash: "hash1".to_string(),
                status: "ready".to_string(),
            },
        );
        index.map_alias("cats", "legacy1");

        assert_eq!(
            index.legacy_id_for_hash("hash1").await.unwrap(),
            Some("legacy1".to_string())
        );
        let record = index.record_for_legacy_id("legacy1").await.unwrap().unwrap();
        assert_eq!(record.hash, "hash1");
        assert_eq!(
            index.legacy_id_for_alias("cats").await.unwrap(),
            Some("legacy1".to_string())
        );
        assert!(index.legacy_id_for_hash("other").await.unwrap().is_none());
    }
}
