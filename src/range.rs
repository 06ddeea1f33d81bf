//! HTTP byte-range parsing and validation
//!
//! Video players seek by issuing `Range: bytes=<start>-<end>` requests,
//! frequently with an open end (`bytes=<start>-`). Parsing is split from
//! resolution because the object size is only known after the origin has
//! been consulted: the raw spec participates in the cache key, the
//! resolved range drives the actual byte read.

use crate::error::{EdgeError, Result};

/// A client-requested byte range, before the object size is known
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RangeSpec {
    /// Starting byte position (inclusive)
    pub start: u64,
    /// Ending byte position (inclusive); `None` means "to end of object"
    pub end: Option<u64>,
}

/// A byte range validated against a concrete object size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRange {
    pub start: u64,
    pub end: u64,
    pub total_size: u64,
}

impl RangeSpec {
    /// Parse a `Range` header value
    ///
    /// Accepts `bytes=<start>-<end>` and `bytes=<start>-`. Multi-range and
    /// suffix-range forms are not served by this proxy and parse as
    /// `InvalidRange` (HTTP 400).
    pub fn parse(header: &str) -> Result<Self> {
        let header = header.trim();

        let range_part = header
            .strip_prefix("bytes=")
            .ok_or_else(|| {
                EdgeError::InvalidRange(format!("must start with 'bytes=', got: {}", header))
            })?
            .trim();

        if range_part.contains(',') {
            return Err(EdgeError::InvalidRange(
                "multi-range requests are not supported".to_string(),
            ));
        }

        let (start_str, end_str) = range_part.split_once('-').ok_or_else(|| {
            EdgeError::InvalidRange(format!("expected 'start-end', got: {}", range_part))
        })?;

        let start = start_str
            .trim()
            .parse::<u64>()
            .map_err(|e| EdgeError::InvalidRange(format!("invalid start value: {}", e)))?;

        let end_str = end_str.trim();
        let end = if end_str.is_empty() {
            None
        } else {
            Some(
                end_str
                    .parse::<u64>()
                    .map_err(|e| EdgeError::InvalidRange(format!("invalid end value: {}", e)))?,
            )
        };

        if let Some(end) = end {
            if start > end {
                return Err(EdgeError::InvalidRange(format!(
                    "start ({}) must be <= end ({})",
                    start, end
                )));
            }
        }

        Ok(RangeSpec { start, end })
    }

    /// Normalized form used as the range component of cache keys
    pub fn key_part(&self) -> String {
        match self.end {
            Some(end) => format!("{}-{}", self.start, end),
            None => format!("{}-", self.start),
        }
    }

    /// Render back to a `Range` header value, for verbatim forwarding
    pub fn to_header(&self) -> String {
        format!("bytes={}", self.key_part())
    }

    /// Validate against the actual object size
    ///
    /// An omitted end defaults to `size - 1`. Violating
    /// `0 <= start <= end < size` yields `RangeNotSatisfiable`, which the
    /// router renders as 416 with `Content-Range: bytes */<size>`.
    pub fn resolve(&self, size: u64) -> Result<ResolvedRange> {
        if size == 0 {
            return Err(EdgeError::RangeNotSatisfiable { size });
        }

        let end = self.end.unwrap_or(size - 1);

        if self.start > end || end >= size {
            return Err(EdgeError::RangeNotSatisfiable { size });
        }

        Ok(ResolvedRange {
            start: self.start,
            end,
            total_size: size,
        })
    }
}

impl ResolvedRange {
    /// Number of bytes covered, which must equal the 206 Content-Length
    ///
    /// Always at least 1: `start <= end` is guaranteed by construction,
    /// so no `is_empty` counterpart exists.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` value for the 206 response
    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, self.total_size)
    }
}

/// `Content-Range` value for a 416 response
pub fn unsatisfiable_content_range(size: u64) -> String {
    format!("bytes */{}", size)
}
