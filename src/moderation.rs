//! Moderation gate
//!
//! Block-list lookups keyed by content hash. The gate runs before any
//! cache lookup or origin fetch, on every request: a valid cache entry
//! for a blocked hash must still come back 451.

use crate::error::{EdgeError, Result};
use crate::models::BlockRecord;
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tracing::warn;

/// Read-only view of the external moderation store
#[async_trait]
pub trait ModerationStore: Send + Sync {
    /// Look up the block record for a content hash, if any
    async fn block_record(&self, hash: &str) -> Result<Option<BlockRecord>>;
}

/// HTTP-backed moderation store client
///
/// Expects a JSON `BlockRecord` body on hit and 404 on miss.
pub struct HttpModerationStore {
    client: Client,
    base_url: String,
}

impl HttpModerationStore {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| EdgeError::Upstream(format!("Failed to create moderation client: {}", e)))?;

        Ok(HttpModerationStore {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ModerationStore for HttpModerationStore {
    async fn block_record(&self, hash: &str) -> Result<Option<BlockRecord>> {
        let url = format!("{}/blocks/{}", self.base_url, hash);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EdgeError::Upstream(format!("moderation lookup failed: {}", e)))?;

        match response.status().as_u16() {
            404 => Ok(None),
            200 => {
                let record: BlockRecord = response.json().await.map_err(|e| {
                    EdgeError::Upstream(format!("invalid moderation record: {}", e))
                })?;
                Ok(Some(record))
            }
            status => {
                warn!("moderation store returned {} for {}", status, hash);
                Err(EdgeError::from_upstream_status(status, "moderation store"))
            }
        }
    }
}

/// In-memory moderation store, used in tests and deployments without a
/// moderation backend (nothing is ever blocked)
#[derive(Default)]
pub struct MemoryModerationStore {
    records: RwLock<HashMap<String, BlockRecord>>,
}

impl MemoryModerationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(&self, hash: &str, record: BlockRecord) {
        self.records
            .write()
            .unwrap()
            .insert(hash.to_string(), record);
    }
}

#[async_trait]
impl ModerationStore for MemoryModerationStore {
    async fn block_record(&self, hash: &str) -> Result<Option<BlockRecord>> {
        Ok(self.records.read().unwrap().get(hash).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_lookup() {
        let store = MemoryModerationStore::new();
        assert!(store.block_record("abc").await.unwrap().is_none());

        store.block(
            "abc",
            BlockRecord {
                reason: "dmca".to_string(),
                category: Some("copyright".to_string()),
                severity: None,
                expires_at: None,
            },
        );

        let record = store.block_record("abc").await.unwrap().unwrap();
        assert_eq!(record.reason, "dmca");
        assert!(store.block_record("other").await.unwrap().is_none());
    }
}
