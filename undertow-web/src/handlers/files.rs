//! File streaming handlers
//!
//! Every GET opens a fresh [`SeekableStream`] so concurrent requests never
//! share a cursor. The first chunk is read before headers go out; a failure
//! there becomes a `500`, later failures abort the body.

use std::io;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream, StreamExt};
use hyper::header;
use tokio::io::AsyncReadExt;
use undertow_core::FileEntry;
use undertow_core::streaming::{SeekOrigin, SeekableStream, mime_type};

use super::range::{RangeRequest, extract_range_header, parse_range_header, unsatisfiable_response};
use crate::server::AppState;

/// `GET|HEAD /` in single-file mode.
pub async fn serve_selected(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    match &state.selected {
        Some(entry) => respond_with_file(&state, entry, &method, &headers).await,
        None => not_found().await,
    }
}

/// `GET|HEAD /{*path}` in playlist mode.
///
/// The decoded request path must equal a display path byte for byte; the
/// first match in manifest order wins.
pub async fn serve_by_path(
    State(state): State<AppState>,
    Path(path): Path<String>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    let Some(entry) = state.container.find_by_path(&path) else {
        tracing::debug!("No file named {}", path);
        return not_found().await;
    };

    respond_with_file(&state, entry, &method, &headers).await
}

/// 404 with the standard reason phrase as its body. Also the router's
/// fallback for paths outside the mode's routes.
pub async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not Found").into_response()
}

async fn respond_with_file(
    state: &AppState,
    entry: &FileEntry,
    method: &Method,
    headers: &HeaderMap,
) -> Response {
    let total = entry.length();
    let range = extract_range_header(headers)
        .map(|value| parse_range_header(value, total))
        .unwrap_or(RangeRequest::Full);

    let (status, start, length) = match range {
        RangeRequest::Full => (StatusCode::OK, 0, total),
        RangeRequest::Partial(range) => (StatusCode::PARTIAL_CONTENT, range.start, range.len()),
        RangeRequest::Unsatisfiable => {
            tracing::debug!("Unsatisfiable range for {} ({} bytes)", entry.path(), total);
            return unsatisfiable_response(total);
        }
    };

    let mut response = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, mime_type(entry.path()))
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_LENGTH, length.to_string())
        .header(header::LAST_MODIFIED, http_date_now());

    if let RangeRequest::Partial(range) = range {
        response = response.header(header::CONTENT_RANGE, range.content_range(total));
    }

    let body = if *method == Method::HEAD || length == 0 {
        Body::empty()
    } else {
        match open_body(state, entry, start, length).await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(
                    "Failed to serve {} from byte {}: {}",
                    entry.path(),
                    start,
                    e
                );
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
    };

    response
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Opens a stream at `start` and reads the first chunk up front.
async fn open_body(
    state: &AppState,
    entry: &FileEntry,
    start: u64,
    length: u64,
) -> io::Result<Body> {
    let mut file = state.container.open_stream(entry, state.readahead)?;
    if start > 0 {
        let offset = i64::try_from(start)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "range start overflows"))?;
        file.seek(offset, SeekOrigin::Start)?;
    }

    let first = read_chunk(&mut file, length, state.chunk_size).await?;
    let body = BodyState {
        stream: file,
        remaining: length - first.len() as u64,
        chunk_size: state.chunk_size,
    };

    Ok(Body::from_stream(
        stream::once(async move { Ok(first) }).chain(body_stream(body)),
    ))
}

struct BodyState {
    stream: SeekableStream,
    remaining: u64,
    chunk_size: usize,
}

fn body_stream(state: BodyState) -> impl Stream<Item = io::Result<Bytes>> + Send {
    stream::unfold(Some(state), |state| async move {
        let mut state = state?;
        if state.remaining == 0 {
            return None;
        }

        match read_chunk(&mut state.stream, state.remaining, state.chunk_size).await {
            Ok(bytes) => {
                state.remaining -= bytes.len() as u64;
                Some((Ok(bytes), Some(state)))
            }
            Err(e) => {
                tracing::warn!(
                    "Aborting {} at byte {}: {}",
                    state.stream.entry().path(),
                    state.stream.position(),
                    e
                );
                Some((Err(e), None))
            }
        }
    })
}

async fn read_chunk(
    stream: &mut SeekableStream,
    remaining: u64,
    chunk_size: usize,
) -> io::Result<Bytes> {
    let wanted = remaining.min(chunk_size as u64) as usize;
    let mut buffer = BytesMut::zeroed(wanted);

    let count = stream.read(&mut buffer).await?;
    if count == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "stream ended before the range was served",
        ));
    }

    buffer.truncate(count);
    Ok(buffer.freeze())
}

/// Current time as an IMF-fixdate; content is synthesized per request.
fn http_date_now() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}
