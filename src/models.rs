//! Core data models for the blobedge proxy

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// A fully assembled response, as stored in the cache tiers
///
/// Immutable once stored; a re-fetch replaces the entry wholesale. `Clone`
/// because the coalescer hands the same outcome to every attached caller
/// and each caller gets an independent response object.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub inserted_at: Instant,
    pub expires_at: Instant,
}

impl CachedResponse {
    /// Create an entry that expires `ttl` from now
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes, ttl: Duration) -> Self {
        let now = Instant::now();
        CachedResponse {
            status,
            headers,
            body,
            inserted_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// A moderation decision for a content hash
///
/// Read-only to the proxy; owned by the external moderation store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockRecord {
    pub reason: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    /// Unix epoch seconds after which the block lapses, if temporary
    #[serde(default)]
    pub expires_at: Option<u64>,
}

impl BlockRecord {
    /// Whether the block is currently in force
    pub fn is_active(&self) -> bool {
        match self.expires_at {
            None => true,
            Some(epoch_secs) => {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs();
                now < epoch_secs
            }
        }
    }
}

/// A metadata-index record for a legacy video id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyRecord {
    /// Content hash of the migrated object
    pub hash: String,
    /// Migration status; anything other than "ready" is still in flight
    #[serde(default)]
    pub status: String,
}

impl LegacyRecord {
    pub fn is_ready(&self) -> bool {
        self.status == "ready"
    }
}

/// Ordered set of storage keys to try for one content hash
///
/// The store has been through one key-format migration: current-format
/// objects live under a prefix, older ones under the bare hash. Variants
/// are tried in order and the first existing object wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocator {
    pub hash: String,
    keys: Vec<String>,
}

impl ObjectLocator {
    pub fn new(hash: &str, prefix: &str) -> Self {
        let keys = if prefix.is_empty() {
            vec![hash.to_string()]
        } else {
            vec![format!("{}/{}", prefix, hash), hash.to_string()]
        };
        ObjectLocator {
            hash: hash.to_string(),
            keys,
        }
    }

    /// Storage key variants in the order they should be tried
    pub fn candidates(&self) -> &[String] {
        &self.keys
    }
}

/// Build the deterministic cache/coalescing key for one request
///
/// The key covers path and query so distinct representations of the same
/// hash (extension, download flag) cache separately, and covers the raw
/// range so a 206 entry can never shadow a 200 entry. Identical ranges
/// still coalesce.
pub fn cache_key(hash: &str, path: &str, query: Option<&str>, range_part: Option<&str>) -> String {
    let mut key = format!("{}:{}", hash, path);
    if let Some(q) = query {
        key.push('?');
        key.push_str(q);
    }
    if let Some(r) = range_part {
        key.push('#');
        key.push_str(r);
    }
    key
}

/// Guess a media content type from a request-path extension
pub fn content_type_for_path(path: &str) -> &'static str {
    let ext = path.rsplit('.').next().unwrap_or("");
    match ext.to_ascii_lowercase().as_str() {
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}
