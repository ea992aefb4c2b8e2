//! M3U playlist generation

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use hyper::header;
use undertow_core::Container;
use undertow_core::streaming::{MediaFilter, PLAYLIST_MIME_TYPE};

use crate::server::AppState;

/// Renders an M3U playlist of every playable file in manifest order.
///
/// `host` is the `host:port` the player should connect back to. Path
/// segments are percent-encoded; `/` separators are kept.
pub fn render_playlist(container: &Container, filter: &dyn MediaFilter, host: &str) -> String {
    let mut playlist = String::from("#EXTM3U\n");

    for entry in container
        .files()
        .iter()
        .filter(|entry| filter.is_playable(entry.path()))
    {
        playlist.push_str(&format!("#EXTINFO:0,{}\n", entry.path()));
        playlist.push_str(&format!("http://{}/{}\n", host, encode_path(entry.path())));
    }

    playlist
}

fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// `GET /playlist.m3u`
pub async fn serve_playlist(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let host = headers
        .get(header::HOST)
        .and_then(|host| host.to_str().ok())
        .unwrap_or(state.advertised_address.as_str());

    let playlist = render_playlist(&state.container, state.filter.as_ref(), host);
    tracing::debug!(
        "Serving playlist for {} to {}",
        state.container.name(),
        host
    );

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, PLAYLIST_MIME_TYPE)
        .body(Body::from(playlist))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
