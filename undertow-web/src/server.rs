//! HTTP server exposing a container to media players
//!
//! Single-file mode binds one file to `/`. Playlist mode serves an M3U
//! document at `/playlist.m3u` and every file under its display path.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use undertow_core::config::StreamingConfig;
use undertow_core::streaming::{ExtensionMediaFilter, MediaFilter};
use undertow_core::{Container, FileEntry, ServingMode};

use crate::handlers::{not_found, serve_by_path, serve_playlist, serve_selected};

/// Errors raised while binding or running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Listener could not be bound.
    #[error("Failed to bind {address}: {source}")]
    Bind {
        /// Address that was requested.
        address: SocketAddr,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },

    /// Accept loop failed.
    #[error("Server error: {0}")]
    Serve(#[from] io::Error),
}

/// What the server exposes.
#[derive(Debug, Clone)]
pub enum ServeMode {
    /// One file at `/`.
    Single(FileEntry),
    /// Playlist plus per-file routes.
    Playlist,
}

impl ServeMode {
    /// Mode name shared with the progress monitor.
    pub fn serving_mode(&self) -> ServingMode {
        match self {
            ServeMode::Single(_) => ServingMode::SingleFile,
            ServeMode::Playlist => ServingMode::Playlist,
        }
    }
}

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub(crate) container: Arc<Container>,
    pub(crate) selected: Option<FileEntry>,
    pub(crate) readahead: u64,
    pub(crate) chunk_size: usize,
    pub(crate) filter: Arc<dyn MediaFilter>,
    pub(crate) advertised_address: String,
}

/// Streaming HTTP server for one container.
pub struct StreamServer {
    container: Arc<Container>,
    mode: ServeMode,
    streaming: StreamingConfig,
    filter: Arc<dyn MediaFilter>,
}

impl StreamServer {
    /// Creates a server for `container` in the given mode.
    pub fn new(container: Arc<Container>, mode: ServeMode, streaming: StreamingConfig) -> Self {
        Self {
            container,
            mode,
            streaming,
            filter: Arc::new(ExtensionMediaFilter),
        }
    }

    /// Replaces the policy deciding which files appear in the playlist.
    pub fn with_filter(mut self, filter: Arc<dyn MediaFilter>) -> Self {
        self.filter = filter;
        self
    }

    /// Serving mode of this server.
    pub fn mode(&self) -> &ServeMode {
        &self.mode
    }

    /// Builds the router. `advertised_address` is the `host:port` written
    /// into playlist URLs when a request carries no Host header.
    pub fn router(&self, advertised_address: &str) -> Router {
        let state = AppState {
            container: Arc::clone(&self.container),
            selected: match &self.mode {
                ServeMode::Single(entry) => Some(entry.clone()),
                ServeMode::Playlist => None,
            },
            readahead: self.streaming.readahead_bytes,
            chunk_size: self.streaming.chunk_size.max(1),
            filter: Arc::clone(&self.filter),
            advertised_address: advertised_address.to_string(),
        };

        let routes = match self.mode {
            ServeMode::Single(_) => Router::new().route("/", get(serve_selected)),
            ServeMode::Playlist => Router::new()
                .route("/playlist.m3u", get(serve_playlist))
                .route("/{*path}", get(serve_by_path)),
        };

        routes
            .fallback(not_found)
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Binds the listener. Routes only exist once the container is ready, so
    /// binding is the last step of startup.
    ///
    /// # Errors
    /// - `ServerError::Bind` - Address in use or not permitted
    pub async fn bind(self, address: SocketAddr) -> Result<BoundServer, ServerError> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| ServerError::Bind { address, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { address, source })?;

        let router = self.router(&local_addr.to_string());
        tracing::info!(
            "Serving {} in {:?} mode on http://{}",
            self.container.name(),
            self.mode.serving_mode(),
            local_addr
        );

        Ok(BoundServer {
            listener,
            router,
            local_addr,
        })
    }
}

/// Server whose listener is bound and ready to accept connections.
pub struct BoundServer {
    listener: TcpListener,
    router: Router,
    local_addr: SocketAddr,
}

impl BoundServer {
    /// Address the listener actually bound, useful with port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves connections until the returned future is dropped.
    ///
    /// # Errors
    /// - `ServerError::Serve` - Accept loop failed
    pub async fn serve(self) -> Result<(), ServerError> {
        axum::serve(self.listener, self.router).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request, StatusCode, header};
    use tower::ServiceExt;
    use undertow_core::engine::{MockHandle, pattern_byte};

    use super::*;

    const LIMIT: usize = 1024 * 1024;

    struct ServerFixture {
        handle: Arc<MockHandle>,
        container: Arc<Container>,
    }

    impl ServerFixture {
        fn new(files: &[(&str, u64)]) -> Self {
            let handle = Arc::new(MockHandle::new("Fixture", files));
            let container = Arc::new(Container::from_handle(handle.clone()).unwrap());
            Self { handle, container }
        }

        fn media() -> Self {
            Self::new(&[("movie.mp4", 1500), ("cover.jpg", 40), ("track.mp3", 300)])
        }

        fn single(&self, index: usize) -> Router {
            let entry = self.container.file(index).unwrap().clone();
            StreamServer::new(
                Arc::clone(&self.container),
                ServeMode::Single(entry),
                StreamingConfig {
                    readahead_bytes: 256,
                    chunk_size: 100,
                },
            )
            .router("127.0.0.1:8080")
        }

        fn playlist(&self) -> Router {
            StreamServer::new(
                Arc::clone(&self.container),
                ServeMode::Playlist,
                StreamingConfig {
                    readahead_bytes: 256,
                    chunk_size: 100,
                },
            )
            .router("127.0.0.1:8080")
        }
    }

    fn request(method: Method, uri: &str, range: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(range) = range {
            builder = builder.header(header::RANGE, range);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn expected(offset: u64, start: u64, end_inclusive: u64) -> Vec<u8> {
        (offset + start..=offset + end_inclusive)
            .map(pattern_byte)
            .collect()
    }

    #[tokio::test]
    async fn test_single_file_full_response() {
        let fixture = ServerFixture::media();
        let app = fixture.single(0);

        let response = app.oneshot(request(Method::GET, "/", None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "video/mp4");
        assert_eq!(headers[header::CONTENT_LENGTH], "1500");
        assert_eq!(headers[header::ACCEPT_RANGES], "bytes");
        assert!(headers.contains_key(header::LAST_MODIFIED));

        let body = to_bytes(response.into_body(), LIMIT).await.unwrap();
        assert_eq!(body.to_vec(), expected(0, 0, 1499));
    }

    #[tokio::test]
    async fn test_single_file_partial_response_maps_to_file_offset() {
        let fixture = ServerFixture::media();
        let app = fixture.single(2);

        let response = app
            .oneshot(request(Method::GET, "/", Some("bytes=10-19")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 10-19/300");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/mpeg");

        let body = to_bytes(response.into_body(), LIMIT).await.unwrap();
        assert_eq!(body.to_vec(), expected(1540, 10, 19));
    }

    #[tokio::test]
    async fn test_single_file_unsatisfiable_range() {
        let fixture = ServerFixture::media();
        let app = fixture.single(0);

        let response = app
            .oneshot(request(Method::GET, "/", Some("bytes=1500-")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */1500");
        assert_eq!(fixture.handle.readers_opened(), 0);
    }

    #[tokio::test]
    async fn test_head_sends_headers_without_opening_stream() {
        let fixture = ServerFixture::media();
        let app = fixture.single(0);

        let response = app.oneshot(request(Method::HEAD, "/", None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "1500");
        assert_eq!(fixture.handle.readers_opened(), 0);
    }

    #[tokio::test]
    async fn test_every_request_gets_its_own_reader() {
        let fixture = ServerFixture::media();
        let app = fixture.single(0);

        for _ in 0..3 {
            let response = app
                .clone()
                .oneshot(request(Method::GET, "/", Some("bytes=0-9")))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        }

        assert_eq!(fixture.handle.readers_opened(), 3);
        let log = fixture.handle.reader_log(0).unwrap();
        assert!(log.responsive);
        assert_eq!(log.readahead, 256);
    }

    #[tokio::test]
    async fn test_engine_failure_becomes_server_error() {
        let fixture = ServerFixture::media();
        fixture.handle.fail_reads();
        let app = fixture.single(0);

        let response = app.oneshot(request(Method::GET, "/", None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_playlist_lists_only_media() {
        let fixture = ServerFixture::media();
        let app = fixture.playlist();

        let response = app
            .oneshot(request(Method::GET, "/playlist.m3u", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/vnd.apple.mpegurl"
        );

        let body = to_bytes(response.into_body(), LIMIT).await.unwrap();
        assert_eq!(
            String::from_utf8(body.to_vec()).unwrap(),
            "#EXTM3U\n\
             #EXTINFO:0,movie.mp4\n\
             http://127.0.0.1:8080/movie.mp4\n\
             #EXTINFO:0,track.mp3\n\
             http://127.0.0.1:8080/track.mp3\n"
        );
    }

    #[tokio::test]
    async fn test_playlist_prefers_request_host() {
        let fixture = ServerFixture::media();
        let app = fixture.playlist();

        let request = Request::builder()
            .uri("/playlist.m3u")
            .header(header::HOST, "192.168.1.20:9000")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        let body = to_bytes(response.into_body(), LIMIT).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("http://192.168.1.20:9000/movie.mp4\n"));
    }

    #[tokio::test]
    async fn test_playlist_file_route_serves_ranges() {
        let fixture = ServerFixture::media();
        let app = fixture.playlist();

        let response = app
            .oneshot(request(Method::GET, "/track.mp3", Some("bytes=-50")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            response.headers()[header::CONTENT_RANGE],
            "bytes 250-299/300"
        );
        let body = to_bytes(response.into_body(), LIMIT).await.unwrap();
        assert_eq!(body.to_vec(), expected(1540, 250, 299));
    }

    #[tokio::test]
    async fn test_playlist_miss_opens_no_reader() {
        let fixture = ServerFixture::media();
        let app = fixture.playlist();

        let response = app
            .oneshot(request(Method::GET, "/nonexistent.mkv", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(fixture.handle.readers_opened(), 0);
        let body = to_bytes(response.into_body(), LIMIT).await.unwrap();
        assert_eq!(&body[..], b"Not Found");
    }

    #[tokio::test]
    async fn test_single_mode_unknown_path_is_not_found() {
        let fixture = ServerFixture::media();
        let app = fixture.single(0);

        let response = app
            .oneshot(request(Method::GET, "/movie.mp4", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = to_bytes(response.into_body(), LIMIT).await.unwrap();
        assert_eq!(&body[..], b"Not Found");
    }

    #[tokio::test]
    async fn test_nested_and_encoded_paths_route() {
        let fixture = ServerFixture::new(&[("Season 1/Episode 1.mkv", 64), ("notes.txt", 8)]);
        let app = fixture.playlist();

        let playlist = app
            .clone()
            .oneshot(request(Method::GET, "/playlist.m3u", None))
            .await
            .unwrap();
        let body = to_bytes(playlist.into_body(), LIMIT).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("#EXTINFO:0,Season 1/Episode 1.mkv\n"));
        assert!(text.contains("http://127.0.0.1:8080/Season%201/Episode%201.mkv\n"));
        assert!(!text.contains("notes.txt"));

        let response = app
            .oneshot(request(Method::GET, "/Season%201/Episode%201.mkv", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), LIMIT).await.unwrap();
        assert_eq!(body.to_vec(), expected(0, 0, 63));
    }

    #[tokio::test]
    async fn test_bind_reports_local_address() {
        let fixture = ServerFixture::media();
        let server = StreamServer::new(
            Arc::clone(&fixture.container),
            ServeMode::Playlist,
            StreamingConfig::default(),
        );

        let bound = server.bind("127.0.0.1:0".parse().unwrap()).await.unwrap();

        assert_ne!(bound.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let fixture = ServerFixture::media();
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = taken.local_addr().unwrap();

        let result = StreamServer::new(
            Arc::clone(&fixture.container),
            ServeMode::Playlist,
            StreamingConfig::default(),
        )
        .bind(address)
        .await;

        assert!(matches!(result, Err(ServerError::Bind { .. })));
    }
}
