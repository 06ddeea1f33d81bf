//! Metrics HTTP endpoint
//!
//! Serves the edge counters in Prometheus exposition format on a
//! separate listen address, so scrapes never compete with media traffic
//! on the main listener.

use crate::blob_service::BlobService;
use crate::counters::{CountersSnapshot, EdgeCounters};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Metrics endpoint server
pub struct MetricsEndpoint {
    counters: Arc<EdgeCounters>,
    blobs: Arc<BlobService>,
    addr: SocketAddr,
}

impl MetricsEndpoint {
    pub fn new(counters: Arc<EdgeCounters>, blobs: Arc<BlobService>, addr: SocketAddr) -> Self {
        Self {
            counters,
            blobs,
            addr,
        }
    }

    /// Start the metrics endpoint server
    ///
    /// Listens on the configured address and serves `/metrics` and
    /// `/health`. Runs until the process is terminated.
    pub async fn start(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("Metrics endpoint listening on http://{}", self.addr);
        info!("Metrics available at http://{}/metrics", self.addr);

        let counters = self.counters;
        let blobs = self.blobs;
        loop {
            let (stream, _) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let counters = Arc::clone(&counters);
            let blobs = Arc::clone(&blobs);

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let counters = Arc::clone(&counters);
                    let blobs = Arc::clone(&blobs);
                    async move { handle_request(req, counters, blobs).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving metrics connection: {:?}", err);
                }
            });
        }
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    counters: Arc<EdgeCounters>,
    blobs: Arc<BlobService>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    match req.uri().path() {
        "/metrics" => Ok(metrics_response(counters, blobs)),
        "/health" => Ok(health_response()),
        _ => Ok(not_found_response()),
    }
}

fn metrics_response(counters: Arc<EdgeCounters>, blobs: Arc<BlobService>) -> Response<Full<Bytes>> {
    let body = format_prometheus_metrics(
        &counters.snapshot(),
        blobs.active_fetches(),
        blobs.queue_depth(),
        blobs.local_cache_entries(),
    );

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

/// Format the counters in Prometheus exposition format
///
/// Each metric carries a HELP comment describing what it measures and a
/// TYPE comment (counter or gauge).
fn format_prometheus_metrics(
    snapshot: &CountersSnapshot,
    active_fetches: usize,
    queue_depth: usize,
    cache_entries: usize,
) -> String {
    let mut output = String::new();

    let counters: &[(&str, &str, u64)] = &[
        (
            "blobedge_requests_total",
            "Total number of requests processed",
            snapshot.total_requests,
        ),
        (
            "blobedge_cache_hits_local_total",
            "Requests served from the process-local cache tier",
            snapshot.local_hits,
        ),
        (
            "blobedge_cache_hits_edge_total",
            "Requests served from the shared edge cache tier",
            snapshot.edge_hits,
        ),
        (
            "blobedge_origin_fetches_total",
            "Fetches admitted against the primary origin",
            snapshot.origin_fetches,
        ),
        (
            "blobedge_legacy_fallbacks_total",
            "Fetches recovered through the legacy streaming origin",
            snapshot.legacy_fallbacks,
        ),
        (
            "blobedge_coalesced_requests_total",
            "Requests that attached to an already in-flight fetch",
            snapshot.coalesced_requests,
        ),
        (
            "blobedge_rate_limited_total",
            "Requests shed by the admission controller",
            snapshot.rate_limited,
        ),
        (
            "blobedge_blocked_total",
            "Requests refused by the moderation gate",
            snapshot.blocked,
        ),
        (
            "blobedge_errors_total",
            "Requests that ended in a server error",
            snapshot.errors,
        ),
    ];
    for (name, help, value) in counters {
        output.push_str(&format!("# HELP {} {}\n", name, help));
        output.push_str(&format!("# TYPE {} counter\n", name));
        output.push_str(&format!("{} {}\n\n", name, value));
    }

    let gauges: &[(&str, &str, u64)] = &[
        (
            "blobedge_active_fetches",
            "Origin fetches currently in flight",
            active_fetches as u64,
        ),
        (
            "blobedge_queue_depth",
            "Requests waiting for an admission slot",
            queue_depth as u64,
        ),
        (
            "blobedge_cache_entries",
            "Entries currently in the process-local cache",
            cache_entries as u64,
        ),
    ];
    for (name, help, value) in gauges {
        output.push_str(&format!("# HELP {} {}\n", name, help));
        output.push_str(&format!("# TYPE {} gauge\n", name));
        output.push_str(&format!("{} {}\n\n", name, value));
    }

    output
}

fn health_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(r#"{"status":"healthy"}"#)))
        .unwrap()
}

fn not_found_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header("Content-Type", "text/plain")
        .body(Full::new(Bytes::from("404 Not Found")))
        .unwrap()
}
