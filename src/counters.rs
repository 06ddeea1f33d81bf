//! Process-wide monitoring counters
//!
//! Monotonic counters attached to every response as `X-CDN-*` headers and
//! exported through the metrics endpoint. Side-effect only: nothing in
//! the request path ever gates on them. Reset only by process restart.

use http::HeaderMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe request counters
#[derive(Debug, Default)]
pub struct EdgeCounters {
    total_requests: AtomicU64,
    local_hits: AtomicU64,
    edge_hits: AtomicU64,
    origin_fetches: AtomicU64,
    legacy_fallbacks: AtomicU64,
    coalesced_requests: AtomicU64,
    rate_limited: AtomicU64,
    blocked: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub total_requests: u64,
    pub local_hits: u64,
    pub edge_hits: u64,
    pub origin_fetches: u64,
    pub legacy_fallbacks: u64,
    pub coalesced_requests: u64,
    pub rate_limited: u64,
    pub blocked: u64,
    pub errors: u64,
}

impl EdgeCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_local_hit(&self) {
        self.local_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_edge_hit(&self) {
        self.edge_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_origin_fetch(&self) {
        self.origin_fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_legacy_fallback(&self) {
        self.legacy_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_coalesced(&self) {
        self.coalesced_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_blocked(&self) {
        self.blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            local_hits: self.local_hits.load(Ordering::Relaxed),
            edge_hits: self.edge_hits.load(Ordering::Relaxed),
            origin_fetches: self.origin_fetches.load(Ordering::Relaxed),
            legacy_fallbacks: self.legacy_fallbacks.load(Ordering::Relaxed),
            coalesced_requests: self.coalesced_requests.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    /// Stamp the observability headers onto an outgoing response
    ///
    /// Gauges (active fetches, queue depth, cache size) are read live by
    /// the caller from their owning components.
    pub fn apply_headers(
        &self,
        headers: &mut HeaderMap,
        active_fetches: usize,
        queue_depth: usize,
        local_cache_entries: usize,
    ) {
        let snapshot = self.snapshot();
        let pairs = [
            ("x-cdn-requests", snapshot.total_requests),
            ("x-cdn-hits-local", snapshot.local_hits),
            ("x-cdn-hits-edge", snapshot.edge_hits),
            ("x-cdn-origin-fetches", snapshot.origin_fetches),
            ("x-cdn-legacy-fallbacks", snapshot.legacy_fallbacks),
            // Cumulative count; the per-request coalesced flag is a
            // separate x-cdn-coalesced header set on blob responses
            ("x-cdn-coalesced-total", snapshot.coalesced_requests),
            ("x-cdn-rate-limited", snapshot.rate_limited),
            ("x-cdn-errors", snapshot.errors),
            ("x-cdn-active-fetches", active_fetches as u64),
            ("x-cdn-queue-depth", queue_depth as u64),
            ("x-cdn-cache-entries", local_cache_entries as u64),
        ];
        for (name, value) in pairs {
            if let Ok(value) = value.to_string().parse() {
                headers.insert(name, value);
            }
        }
    }
}
