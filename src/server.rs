//! HTTP server wiring
//!
//! Builds the component graph from an `EdgeConfig` and runs the main
//! hyper http1 accept loop. Collaborator URLs that are absent get the
//! in-memory or null implementation, so a minimal config still starts.

use crate::admission::AdmissionController;
use crate::blob_service::BlobService;
use crate::config::EdgeConfig;
use crate::counters::EdgeCounters;
use crate::edge_cache::{EdgeCache, HttpEdgeCache, NullEdgeCache};
use crate::error::{EdgeError, Result};
use crate::metrics_endpoint::MetricsEndpoint;
use crate::moderation::{HttpModerationStore, MemoryModerationStore, ModerationStore};
use crate::origin::{HttpMetadataIndex, HttpObjectStore, LegacyOrigin, MemoryMetadataIndex, MetadataIndex};
use crate::router::{EdgeRequest, EdgeResponse, Router};
use crate::thumbnail::{HttpMediaTransform, MediaTransform, ThumbnailService};
use crate::tiered_cache::TieredCache;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// The assembled proxy, ready to serve
pub struct EdgeServer {
    router: Arc<Router>,
    counters: Arc<EdgeCounters>,
    blobs: Arc<BlobService>,
    config: EdgeConfig,
}

impl EdgeServer {
    /// Build the full component graph from a validated config
    pub fn build(config: EdgeConfig) -> Result<Self> {
        config.validate()?;

        let counters = Arc::new(EdgeCounters::new());

        let edge: Arc<dyn EdgeCache> = match &config.edge_cache_url {
            Some(url) => {
                info!("shared edge cache: {}", url);
                Arc::new(HttpEdgeCache::new(url, config.cache_ttl())?)
            }
            None => {
                info!("no shared edge cache configured; local tier only");
                Arc::new(NullEdgeCache)
            }
        };
        let cache = TieredCache::new(
            config.cache_capacity,
            config.cache_sweep_interval,
            config.cache_ttl(),
            edge,
        );

        let admission = Arc::new(AdmissionController::new(
            config.max_concurrent_fetches,
            config.queue_timeout(),
            config.queue_staleness(),
        ));

        let store_url = config.object_store_url.as_deref().ok_or_else(|| {
            EdgeError::ConfigError("object_store_url is required".to_string())
        })?;
        let store = Arc::new(HttpObjectStore::new(store_url)?);

        let index: Arc<dyn MetadataIndex> = match &config.metadata_index_url {
            Some(url) => Arc::new(HttpMetadataIndex::new(url)?),
            None => Arc::new(MemoryMetadataIndex::new()),
        };

        let moderation: Arc<dyn ModerationStore> = match &config.moderation_url {
            Some(url) => Arc::new(HttpModerationStore::new(url)?),
            None => Arc::new(MemoryModerationStore::new()),
        };

        let legacy = match &config.legacy_origin_url {
            Some(url) => {
                info!("legacy origin: {}", url);
                Some(Arc::new(LegacyOrigin::new(url)?))
            }
            None => None,
        };

        let transform: Option<Arc<dyn MediaTransform>> = match &config.transform_url {
            Some(url) => Some(Arc::new(HttpMediaTransform::new(url)?)),
            None => None,
        };

        let blobs = Arc::new(BlobService::new(
            cache,
            admission,
            store,
            index.clone(),
            moderation,
            legacy.clone(),
            counters.clone(),
            &config.storage_key_prefix,
        ));

        let thumbnails = Arc::new(ThumbnailService::new(
            config.transform_cache_capacity,
            config.cache_sweep_interval,
            config.cache_ttl(),
            transform,
        ));

        let router = Arc::new(Router::new(
            blobs.clone(),
            thumbnails,
            index,
            legacy,
            counters.clone(),
            config.retired_paths.clone(),
        ));

        Ok(EdgeServer {
            router,
            counters,
            blobs,
            config,
        })
    }

    /// Run the proxy until the process is terminated
    pub async fn run(self) -> Result<()> {
        if let Some(metrics) = &self.config.metrics_endpoint {
            if metrics.enabled {
                let addr: SocketAddr = metrics.address.parse().map_err(|e| {
                    EdgeError::ConfigError(format!("invalid metrics address: {}", e))
                })?;
                let endpoint =
                    MetricsEndpoint::new(self.counters.clone(), self.blobs.clone(), addr);
                tokio::spawn(async move {
                    if let Err(e) = endpoint.start().await {
                        error!("metrics endpoint failed: {}", e);
                    }
                });
            }
        }

        let addr: SocketAddr = self.config.listen_address.parse().map_err(|e| {
            EdgeError::ConfigError(format!("invalid listen address: {}", e))
        })?;
        let listener = TcpListener::bind(addr).await?;
        info!("blobedge listening on http://{}", addr);

        loop {
            let (stream, remote) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let router = Arc::clone(&self.router);

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let router = Arc::clone(&router);
                    async move { handle_request(req, router).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving connection from {}: {:?}", remote, err);
                }
            });
        }
    }
}

/// Bridge one hyper request through the router
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    router: Arc<Router>,
) -> std::result::Result<Response<Full<Bytes>>, hyper::Error> {
    let (parts, body) = req.into_parts();
    let body = body.collect().await?.to_bytes();

    let edge_request = EdgeRequest {
        method: parts.method,
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        headers: parts.headers,
        body,
    };

    let response = router.handle(edge_request).await;
    Ok(into_hyper(response))
}

fn into_hyper(response: EdgeResponse) -> Response<Full<Bytes>> {
    let mut builder = Response::builder().status(response.status);
    if let Some(headers) = builder.headers_mut() {
        *headers = response.headers;
    }
    // The builder cannot fail once status and headers are set directly
    builder
        .body(Full::new(response.body))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}
