//! Blobedge
//!
//! An edge proxy for content-addressed media blobs, keyed by SHA-256.
//! Requests are served from a two-tier cache (process-local map over a
//! shared edge cache), with concurrent misses for the same object
//! coalesced into a single origin fetch and origin concurrency bounded
//! by an admission controller with a FIFO wait queue.
//!
//! # Overview
//!
//! The primary origin is a content-addressed object store; objects that
//! have not been migrated yet are recovered from the legacy streaming
//! origin via metadata-index lookups. A moderation gate runs before any
//! cache or origin access, so blocked content answers 451 even while
//! cached.
//!
//! # Features
//!
//! - **Two-tier caching**: TTL + capacity bounded local tier with
//!   insertion-order eviction, shared edge tier with local backfill
//! - **Request coalescing**: one in-flight origin fetch per cache key,
//!   outcome fanned out to every waiting caller
//! - **Admission control**: bounded origin concurrency with a FIFO
//!   queue, wait timeout and dequeue-time staleness shedding
//! - **Byte ranges**: `bytes=<start>-<end>` and open-ended ranges with
//!   exact 206/416 semantics
//! - **Moderation gate**: per-hash block records, checked on every
//!   request ahead of the caches
//! - **Legacy fallback & passthrough**: hash -> legacy-id resolution,
//!   verbatim Range forwarding, transparent proxy for unmatched paths
//! - **Monitoring**: `X-CDN-*` headers on every response plus an
//!   optional Prometheus metrics endpoint
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use blobedge::{EdgeConfig, EdgeServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EdgeConfig::from_file("blobedge.yaml")?;
//!     let server = EdgeServer::build(config)?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded from a YAML file:
//!
//! ```yaml
//! listen_address: "0.0.0.0:8080"
//! object_store_url: "http://store.internal"
//! legacy_origin_url: "http://legacy.internal"
//! metadata_index_url: "http://index.internal"
//! cache_ttl_secs: 300
//! cache_capacity: 100
//! max_concurrent_fetches: 10
//! ```
//!
//! See [`EdgeConfig`] for the full set of options and their defaults.

pub mod admission;
pub mod blob_service;
pub mod cache;
pub mod coalescer;
pub mod config;
pub mod counters;
pub mod edge_cache;
pub mod error;
pub mod metrics_endpoint;
pub mod models;
pub mod moderation;
pub mod origin;
pub mod range;
pub mod router;
pub mod server;
pub mod thumbnail;
pub mod tiered_cache;

// Re-export commonly used types
pub use admission::{AdmissionController, AdmissionTicket};
pub use blob_service::{BlobOutcome, BlobRequest, BlobService};
pub use cache::LocalCache;
pub use coalescer::RequestCoalescer;
pub use config::{EdgeConfig, MetricsEndpointConfig};
pub use counters::{CountersSnapshot, EdgeCounters};
pub use edge_cache::{EdgeCache, HttpEdgeCache, MemoryEdgeCache, NullEdgeCache};
pub use error::{EdgeError, Result};
pub use metrics_endpoint::MetricsEndpoint;
pub use models::{BlockRecord, CachedResponse, LegacyRecord, ObjectLocator};
pub use moderation::{HttpModerationStore, MemoryModerationStore, ModerationStore};
pub use origin::{
    HttpMetadataIndex, HttpObjectStore, LegacyOrigin, MemoryMetadataIndex, MemoryObjectStore,
    MetadataIndex, ObjectStore, UpstreamResponse,
};
pub use range::{RangeSpec, ResolvedRange};
pub use router::{EdgeRequest, EdgeResponse, Router};
pub use server::EdgeServer;
pub use thumbnail::{MediaTransform, ThumbnailService};
pub use tiered_cache::{CacheTier, TieredCache};
