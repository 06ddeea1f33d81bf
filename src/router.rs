//! Request classification and dispatch
//!
//! Paths are classified in one shot and dispatched to the blob flow, the
//! thumbnail flow or the transparent legacy proxy. The router is also the
//! top-level error boundary: every `EdgeError` becomes a JSON response
//! here and the process never crashes on a request error.

use crate::blob_service::{BlobRequest, BlobService};
use crate::counters::EdgeCounters;
use crate::error::{EdgeError, Result};
use crate::origin::{LegacyOrigin, MetadataIndex};
use crate::range::{unsatisfiable_content_range, RangeSpec};
use crate::thumbnail::ThumbnailService;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error};

/// A request as seen by the router, already decoupled from the server
#[derive(Debug, Clone)]
pub struct EdgeRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// A fully assembled response, ready for the server to emit
#[derive(Debug, Clone)]
pub struct EdgeResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Where a path is routed
#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    /// `/{64-hex}[.ext]`: direct content-hash request
    Blob { hash: String },
    /// `/{32-hex}[.ext]` or `/{32-hex}/downloads/*.mp4`: legacy video id
    LegacyId { id: String },
    /// `/v/{alias}`: named alias for a legacy id
    Alias { alias: String },
    /// `/cdn-cgi/media/{params}/{path}`: thumbnail transform
    Thumbnail { params: String, inner: String },
    /// Configured permanently retired path
    Retired,
    /// Everything else goes to the legacy origin untouched
    Passthrough,
}

pub struct Router {
    blobs: Arc<BlobService>,
    thumbnails: Arc<ThumbnailService>,
    index: Arc<dyn MetadataIndex>,
    legacy: Option<Arc<LegacyOrigin>>,
    counters: Arc<EdgeCounters>,
    retired_paths: Vec<String>,
}

fn is_hex(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Filename stem of the first path segment, with any extension removed
fn segment_stem(segment: &str) -> &str {
    segment.split('.').next().unwrap_or(segment)
}

impl Router {
    pub fn new(
        blobs: Arc<BlobService>,
        thumbnails: Arc<ThumbnailService>,
        index: Arc<dyn MetadataIndex>,
        legacy: Option<Arc<LegacyOrigin>>,
        counters: Arc<EdgeCounters>,
        retired_paths: Vec<String>,
    ) -> Self {
        Router {
            blobs,
            thumbnails,
            index,
            legacy,
            counters,
            retired_paths,
        }
    }

    fn classify(&self, path: &str) -> Route {
        if self.retired_paths.iter().any(|p| p == path) {
            return Route::Retired;
        }

        let trimmed = path.trim_start_matches('/');

        if let Some(rest) = trimmed.strip_prefix("cdn-cgi/media/") {
            if let Some((params, inner)) = rest.split_once('/') {
                if !params.is_empty() && !inner.is_empty() {
                    return Route::Thumbnail {
                        params: params.to_string(),
                        inner: inner.to_string(),
                    };
                }
            }
            return Route::Passthrough;
        }

        if let Some(alias) = trimmed.strip_prefix("v/") {
            if !alias.is_empty() && !alias.contains('/') {
                return Route::Alias {
                    alias: alias.to_string(),
                };
            }
            return Route::Passthrough;
        }

        let mut segments = trimmed.split('/');
        let first = segments.next().unwrap_or("");
        let stem = segment_stem(first);

        if is_hex(stem, 64) && segments.next().is_none() {
            return Route::Blob {
                hash: stem.to_string(),
            };
        }

        if is_hex(stem, 32) {
            match (segments.next(), segments.next(), segments.next()) {
                // /{32-hex}[.ext]
                (None, _, _) => {
                    return Route::LegacyId {
                        id: stem.to_string(),
                    }
                }
                // /{32-hex}/downloads/{file}.mp4
                (Some("downloads"), Some(file), None) if file.ends_with(".mp4") => {
                    return Route::LegacyId {
                        id: stem.to_string(),
                    }
                }
                _ => {}
            }
        }

        Route::Passthrough
    }

    /// Handle one request; infallible at this level
    pub async fn handle(&self, req: EdgeRequest) -> EdgeResponse {
        self.counters.record_request();
        let route = self.classify(&req.path);
        debug!("{} {} -> {:?}", req.method, req.path, route);

        let result = match route {
            Route::Blob { hash } => self.serve_blob(&req, hash).await,
            Route::LegacyId { id } => self.serve_legacy_id(&req, &id).await,
            Route::Alias { alias } => self.serve_alias(&req, &alias).await,
            Route::Thumbnail { params, inner } => Ok(self.serve_thumbnail(&params, &inner).await),
            Route::Retired => Ok(self.retired_response()),
            Route::Passthrough => self.serve_passthrough(&req).await,
        };

        let mut response = result.unwrap_or_else(|e| self.error_response(e));
        self.finalize(&req, &mut response);
        response
    }

    /// The content-hash flow: moderation, caches, coalescing, origins
    async fn serve_blob(&self, req: &EdgeRequest, hash: String) -> Result<EdgeResponse> {
        let range = match req.headers.get("range").map(|v| v.to_str()) {
            None => None,
            Some(Ok(value)) => Some(RangeSpec::parse(value)?),
            Some(Err(_)) => {
                return Err(EdgeError::InvalidRange(
                    "range header is not valid UTF-8".to_string(),
                ))
            }
        };

        let outcome = self
            .blobs
            .serve(&BlobRequest {
                hash,
                path: req.path.clone(),
                query: req.query.clone(),
                range,
            })
            .await?;

        let mut response = EdgeResponse {
            status: outcome.response.status,
            headers: outcome.response.headers,
            body: outcome.response.body,
        };
        if let Ok(tier) = outcome.cache_status.parse() {
            response.headers.insert("x-cdn-cache", tier);
        }
        response.headers.insert(
            "x-cdn-coalesced",
            if outcome.coalesced { "true" } else { "false" }
                .parse()
                .unwrap(),
        );
        Ok(response)
    }

    /// Resolve a legacy video id to its content hash, then run the blob flow
    ///
    /// Records still migrating answer 202 so players retry instead of
    /// caching a 404.
    async fn serve_legacy_id(&self, req: &EdgeRequest, legacy_id: &str) -> Result<EdgeResponse> {
        let record = self
            .index
            .record_for_legacy_id(legacy_id)
            .await?
            .ok_or(EdgeError::NotFound)?;

        if !record.is_ready() {
            let body = json!({ "status": record.status }).to_string();
            let mut headers = HeaderMap::new();
            headers.insert("content-type", "application/json".parse().unwrap());
            return Ok(EdgeResponse {
                status: StatusCode::ACCEPTED,
                headers,
                body: Bytes::from(body),
            });
        }

        self.serve_blob(req, record.hash).await
    }

    async fn serve_alias(&self, req: &EdgeRequest, alias: &str) -> Result<EdgeResponse> {
        let legacy_id = self
            .index
            .legacy_id_for_alias(alias)
            .await?
            .ok_or(EdgeError::NotFound)?;
        self.serve_legacy_id(req, &legacy_id).await
    }

    /// Thumbnail flow; never errors, worst case is the placeholder image
    async fn serve_thumbnail(&self, params: &str, inner: &str) -> EdgeResponse {
        let first = inner.split('/').next().unwrap_or(inner);
        let stem = segment_stem(first);

        // A 32-hex inner path still names a legacy id; resolve it when we
        // can, otherwise hand the stem to the transform and let the
        // placeholder path absorb the failure.
        let hash = if is_hex(stem, 32) {
            match self.index.record_for_legacy_id(stem).await {
                Ok(Some(record)) => record.hash,
                _ => stem.to_string(),
            }
        } else {
            stem.to_string()
        };

        let response = self.thumbnails.serve(&hash, params).await;
        EdgeResponse {
            status: response.status,
            headers: response.headers,
            body: response.body,
        }
    }

    /// Unmatched paths are forwarded to the legacy origin untouched,
    /// apart from the CORS rewrite on the way back
    async fn serve_passthrough(&self, req: &EdgeRequest) -> Result<EdgeResponse> {
        let legacy = self
            .legacy
            .as_ref()
            .ok_or_else(|| EdgeError::Misconfigured("legacy origin not configured".to_string()))?;

        let mut path_and_query = req.path.clone();
        if let Some(q) = &req.query {
            path_and_query.push('?');
            path_and_query.push_str(q);
        }

        let upstream = legacy
            .proxy(&req.method, &path_and_query, &req.headers, req.body.clone())
            .await?;

        let mut headers = upstream.headers;
        // Replace whatever CORS policy the legacy origin carries; the
        // edge is the single CORS authority for this domain.
        let cors_headers: Vec<_> = headers
            .keys()
            .filter(|name| name.as_str().starts_with("access-control-"))
            .cloned()
            .collect();
        for name in cors_headers {
            headers.remove(name);
        }

        Ok(EdgeResponse {
            status: upstream.status,
            headers,
            body: upstream.body,
        })
    }

    fn retired_response(&self) -> EdgeResponse {
        let body = json!({ "error": "retired" }).to_string();
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "application/json".parse().unwrap());
        EdgeResponse {
            status: StatusCode::GONE,
            headers,
            body: Bytes::from(body),
        }
    }

    /// Convert an error into its wire shape and bump the counters
    fn error_response(&self, err: EdgeError) -> EdgeResponse {
        let status = StatusCode::from_u16(err.to_http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut headers = HeaderMap::new();

        match &err {
            EdgeError::RateLimited { retry_after_secs } => {
                self.counters.record_rate_limited();
                if let Ok(value) = retry_after_secs.to_string().parse() {
                    headers.insert("retry-after", value);
                }
            }
            EdgeError::Blocked { .. } => self.counters.record_blocked(),
            _ if status.is_server_error() => {
                self.counters.record_error();
                error!("request failed: {}", err);
            }
            _ => {}
        }

        // 451 keeps the plain-text legal notice shape; 416 must carry the
        // object size and an empty body.
        match &err {
            EdgeError::Blocked { reason } => {
                headers.insert("content-type", "text/plain".parse().unwrap());
                return EdgeResponse {
                    status,
                    headers,
                    body: Bytes::from(format!(
                        "Unavailable for legal reasons: {}",
                        reason
                    )),
                };
            }
            EdgeError::RangeNotSatisfiable { size } => {
                if let Ok(value) = unsatisfiable_content_range(*size).parse() {
                    headers.insert("content-range", value);
                }
                return EdgeResponse {
                    status,
                    headers,
                    body: Bytes::new(),
                };
            }
            _ => {}
        }

        let body = json!({
            "error": err.code(),
            "message": err.to_string(),
            "errors_total": self.counters.error_count(),
            "active_fetches": self.blobs.active_fetches(),
        })
        .to_string();
        headers.insert("content-type", "application/json".parse().unwrap());

        EdgeResponse {
            status,
            headers,
            body: Bytes::from(body),
        }
    }

    /// Cross-cutting response surface: monitoring headers, CORS,
    /// download disposition, HEAD body stripping
    fn finalize(&self, req: &EdgeRequest, response: &mut EdgeResponse) {
        self.counters.apply_headers(
            &mut response.headers,
            self.blobs.active_fetches(),
            self.blobs.queue_depth(),
            self.blobs.local_cache_entries(),
        );

        if !response.headers.contains_key("access-control-allow-origin") {
            response
                .headers
                .insert("access-control-allow-origin", "*".parse().unwrap());
        }

        if wants_download(req.query.as_deref()) && response.status.is_success() {
            let filename = req
                .path
                .rsplit('/')
                .next()
                .filter(|s| !s.is_empty())
                .unwrap_or("download");
            if let Ok(value) = format!("attachment; filename=\"{}\"", filename).parse() {
                response.headers.insert("content-disposition", value);
            }
        }

        if req.method == Method::HEAD {
            response.body = Bytes::new();
        }
    }
}

/// Whether the query string carries `download=true`
fn wants_download(query: Option<&str>) -> bool {
    query
        .map(|q| q.split('&').any(|pair| pair == "download=true"))
        .unwrap_or(false)
}
