//! Error types for the blobedge proxy

use thiserror::Error;

/// Result type alias for proxy operations
pub type Result<T> = std::result::Result<T, EdgeError>;

/// Error types that can occur while serving a blob request
///
/// Variants carry owned strings so the error stays `Clone` — the request
/// coalescer fans a single failure out to every attached caller.
#[derive(Error, Debug, Clone)]
pub enum EdgeError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Object not found")]
    NotFound,

    #[error("Invalid range header: {0}")]
    InvalidRange(String),

    #[error("Range not satisfiable for object of {size} bytes")]
    RangeNotSatisfiable { size: u64 },

    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Content blocked: {reason}")]
    Blocked { reason: String },

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Missing backing service: {0}")]
    Misconfigured(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for EdgeError {
    fn from(err: std::io::Error) -> Self {
        EdgeError::Internal(err.to_string())
    }
}

impl EdgeError {
    /// Map this error to the HTTP status code surfaced to the client
    ///
    /// Malformed range headers are the client's fault (400); out-of-bounds
    /// ranges are 416 per RFC 7233. Everything upstream-shaped becomes 502,
    /// missing backing services and uncaught internals become 500.
    pub fn to_http_status(&self) -> u16 {
        match self {
            EdgeError::NotFound => 404,
            EdgeError::InvalidRange(_) => 400,
            EdgeError::RangeNotSatisfiable { .. } => 416,
            EdgeError::RateLimited { .. } => 429,
            EdgeError::Blocked { .. } => 451,
            EdgeError::Upstream(_) => 502,
            EdgeError::ConfigError(_) => 500,
            EdgeError::Misconfigured(_) => 500,
            EdgeError::Cache(_) => 500,
            EdgeError::Internal(_) => 500,
        }
    }

    /// Stable machine-readable code used in JSON error bodies
    ///
    /// Clients match on this field, never on the prose message.
    pub fn code(&self) -> &'static str {
        match self {
            EdgeError::NotFound => "not_found",
            EdgeError::InvalidRange(_) => "invalid_range",
            EdgeError::RangeNotSatisfiable { .. } => "range_not_satisfiable",
            EdgeError::RateLimited { .. } => "rate_limited",
            EdgeError::Blocked { .. } => "blocked",
            EdgeError::Upstream(_) => "upstream_error",
            EdgeError::ConfigError(_) => "config_error",
            EdgeError::Misconfigured(_) => "misconfigured",
            EdgeError::Cache(_) => "cache_error",
            EdgeError::Internal(_) => "internal_error",
        }
    }

    /// Whether a primary-origin failure may be recovered by falling back
    /// to the legacy streaming origin
    ///
    /// Moderation blocks, range violations and rate limiting are terminal:
    /// no fallback is attempted for them.
    pub fn allows_legacy_fallback(&self) -> bool {
        matches!(self, EdgeError::NotFound | EdgeError::Upstream(_))
    }

    /// Create an upstream error from an HTTP status returned by a backend
    pub fn from_upstream_status(status: u16, context: impl Into<String>) -> Self {
        EdgeError::Upstream(format!("{}: HTTP {}", context.into(), status))
    }
}
