//! HTTP Range request handling
//!
//! Implements the single-range subset of RFC 7233 that media players use:
//! `bytes=start-end`, open-ended `bytes=start-` and suffix `bytes=-count`.
//! Anything else is treated as if no Range header had been sent.

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use hyper::header;

/// Inclusive byte range within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte served.
    pub start: u64,
    /// Last byte served, inclusive.
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes covered.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Always false; a range covers at least one byte.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// `Content-Range` value for a file of `total` bytes.
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

/// Outcome of interpreting a Range header against a file length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRequest {
    /// Serve the whole file with `200 OK`.
    Full,
    /// Serve the given range with `206 Partial Content`.
    Partial(ByteRange),
    /// No byte of the requested range exists; answer `416`.
    Unsatisfiable,
}

/// Parse HTTP Range header against a file of `total_size` bytes.
///
/// Malformed headers and multi-range requests fall back to
/// [`RangeRequest::Full`]. An end past the file is clamped to the last byte.
///
/// # Examples
/// ```
/// use undertow_web::handlers::range::{ByteRange, RangeRequest, parse_range_header};
/// let range = parse_range_header("bytes=100-199", 1000);
/// assert_eq!(range, RangeRequest::Partial(ByteRange { start: 100, end: 199 }));
/// ```
pub fn parse_range_header(range: &str, total_size: u64) -> RangeRequest {
    let Some(range_spec) = range.trim().strip_prefix("bytes=") else {
        return RangeRequest::Full;
    };

    if range_spec.contains(',') {
        return RangeRequest::Full;
    }

    let Some((start_str, end_str)) = range_spec.split_once('-') else {
        return RangeRequest::Full;
    };
    let (start_str, end_str) = (start_str.trim(), end_str.trim());

    if start_str.is_empty() {
        // Suffix form: the last `count` bytes.
        let Ok(count) = end_str.parse::<u64>() else {
            return RangeRequest::Full;
        };
        if count == 0 || total_size == 0 {
            return RangeRequest::Unsatisfiable;
        }
        return RangeRequest::Partial(ByteRange {
            start: total_size.saturating_sub(count),
            end: total_size - 1,
        });
    }

    let Ok(start) = start_str.parse::<u64>() else {
        return RangeRequest::Full;
    };
    let end = if end_str.is_empty() {
        None
    } else {
        match end_str.parse::<u64>() {
            Ok(end) if end >= start => Some(end),
            _ => return RangeRequest::Full,
        }
    };

    validate_range_bounds(start, end, total_size)
}

/// Clamp a requested range to a file of `available_size` bytes.
///
/// A start at or past the end of the file cannot be satisfied.
pub fn validate_range_bounds(start: u64, end: Option<u64>, available_size: u64) -> RangeRequest {
    if start >= available_size {
        return RangeRequest::Unsatisfiable;
    }

    let last = available_size - 1;
    RangeRequest::Partial(ByteRange {
        start,
        end: end.map_or(last, |end| end.min(last)),
    })
}

/// Extract the Range header, ignoring values that are not valid text.
pub fn extract_range_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::RANGE)
        .and_then(|range| range.to_str().ok())
}

/// `416 Range Not Satisfiable` naming the real file length.
pub fn unsatisfiable_response(total_size: u64) -> Response {
    Response::builder()
        .status(StatusCode::RANGE_NOT_SATISFIABLE)
        .header(header::CONTENT_RANGE, format!("bytes */{total_size}"))
        .header(header::ACCEPT_RANGES, "bytes")
        .body(Body::empty())
        .unwrap_or_else(|_| StatusCode::RANGE_NOT_SATISFIABLE.into_response())
}
