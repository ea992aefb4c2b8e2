//! Session lifecycle: resolve a source, wait for metadata, tear down
//!
//! The controller owns the engine for the lifetime of one streaming session.
//! Every failure while opening names the stage it happened in so the binary
//! can report it without guessing.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::SessionConfig;
use crate::container::{Container, ContainerError};
use crate::engine::{EngineError, TransferEngine, TransferHandle};

/// Errors raised while opening or using a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Could not prepare working directory {path}: {source}")]
    WorkingDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to download descriptor from {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to read manifest file {path}: {source}")]
    ReadManifest {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse descriptor: {source}")]
    Parse {
        #[source]
        source: EngineError,
    },

    #[error("Engine refused descriptor: {source}")]
    Add {
        #[source]
        source: EngineError,
    },

    #[error("Metadata did not arrive within {after:?}")]
    MetadataTimeout { after: Duration },

    #[error("No container is open")]
    NotOpen,

    #[error(transparent)]
    Container(#[from] ContainerError),
}

impl SessionError {
    /// Maps an engine add failure onto the parse or add stage.
    fn from_engine(error: EngineError) -> Self {
        match error {
            EngineError::InvalidManifest { .. } => Self::Parse { source: error },
            other => Self::Add { source: other },
        }
    }
}

/// How a source string should be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Direct descriptor handed to the engine as is.
    Magnet,
    /// Descriptor downloaded over HTTP(S).
    Remote,
    /// Descriptor stored on the local filesystem.
    LocalFile,
}

impl SourceKind {
    /// Classifies `source` by its lexical form.
    pub fn classify(source: &str) -> Self {
        if source.starts_with("magnet:") {
            Self::Magnet
        } else if source.starts_with("http://") || source.starts_with("https://") {
            Self::Remote
        } else {
            Self::LocalFile
        }
    }
}

/// Owns one engine session and the container opened through it.
pub struct SessionController {
    engine: Arc<dyn TransferEngine>,
    config: SessionConfig,
    http: reqwest::Client,
    handle: Option<Arc<dyn TransferHandle>>,
    container: Option<Arc<Container>>,
    closed: bool,
}

impl SessionController {
    pub fn new(engine: Arc<dyn TransferEngine>, config: SessionConfig) -> Self {
        Self {
            engine,
            config,
            http: reqwest::Client::new(),
            handle: None,
            container: None,
            closed: false,
        }
    }

    /// Resolves `source`, adds it to the engine and waits for metadata.
    ///
    /// The wait is unbounded unless a metadata timeout is configured.
    ///
    /// # Errors
    /// - `SessionError::WorkingDir` - Working directory could not be created
    /// - `SessionError::Fetch` - Remote descriptor download failed
    /// - `SessionError::ReadManifest` - Local manifest could not be read
    /// - `SessionError::Parse` - Descriptor bytes are malformed
    /// - `SessionError::Add` - Engine refused the descriptor
    /// - `SessionError::MetadataTimeout` - Metadata did not arrive in time
    /// - `SessionError::Container` - Manifest is empty or inconsistent
    pub async fn open(&mut self, source: &str) -> Result<Arc<Container>, SessionError> {
        tokio::fs::create_dir_all(&self.config.working_dir)
            .await
            .map_err(|source| SessionError::WorkingDir {
                path: self.config.working_dir.clone(),
                source,
            })?;

        let kind = SourceKind::classify(source);
        tracing::info!("Resolving {:?} source {}", kind, source);

        let handle = match kind {
            SourceKind::Magnet => self
                .engine
                .add_magnet(source)
                .await
                .map_err(SessionError::from_engine)?,
            SourceKind::Remote => {
                let bytes = self.fetch_descriptor(source).await?;
                self.engine
                    .add_manifest_bytes(&bytes)
                    .await
                    .map_err(SessionError::from_engine)?
            }
            SourceKind::LocalFile => self.add_local_manifest(Path::new(source)).await?,
        };
        self.handle = Some(Arc::clone(&handle));

        self.wait_for_metadata(handle.as_ref()).await?;

        let container = Arc::new(Container::from_handle(handle)?);
        tracing::info!(
            "Metadata ready for {} ({} files)",
            container.name(),
            container.files().len()
        );

        self.container = Some(Arc::clone(&container));
        Ok(container)
    }

    /// Container opened by the last successful `open`.
    ///
    /// # Errors
    /// - `SessionError::NotOpen` - No container has been opened
    pub fn container(&self) -> Result<Arc<Container>, SessionError> {
        self.container.clone().ok_or(SessionError::NotOpen)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Releases the container and the engine, then removes the working
    /// directory if cleanup is enabled. Calling it again does nothing.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.container = None;
        if let Some(handle) = self.handle.take() {
            handle.close().await;
        }
        self.engine.close().await;

        if self.config.cleanup {
            match tokio::fs::remove_dir_all(&self.config.working_dir).await {
                Ok(()) => tracing::debug!(
                    "Removed working directory {}",
                    self.config.working_dir.display()
                ),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(
                    "Cleaning up {} failed: {}",
                    self.config.working_dir.display(),
                    e
                ),
            }
        }

        tracing::info!("Session closed");
    }

    async fn fetch_descriptor(&self, url: &str) -> Result<Vec<u8>, SessionError> {
        let fetch_error = |source: reqwest::Error| SessionError::Fetch {
            url: url.to_string(),
            source,
        };

        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(fetch_error)?;
        let bytes = response.bytes().await.map_err(fetch_error)?;

        tracing::debug!("Downloaded {} byte descriptor from {}", bytes.len(), url);
        Ok(bytes.to_vec())
    }

    async fn add_local_manifest(
        &self,
        path: &Path,
    ) -> Result<Arc<dyn TransferHandle>, SessionError> {
        self.engine
            .add_manifest_file(path)
            .await
            .map_err(|error| match error {
                EngineError::Io(source) => SessionError::ReadManifest {
                    path: path.to_path_buf(),
                    source,
                },
                other => SessionError::from_engine(other),
            })
    }

    async fn wait_for_metadata(&self, handle: &dyn TransferHandle) -> Result<(), SessionError> {
        match self.config.metadata_timeout {
            Some(after) => tokio::time::timeout(after, handle.metadata_ready())
                .await
                .map_err(|_| SessionError::MetadataTimeout { after }),
            None => {
                handle.metadata_ready().await;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{MockEngine, MockFailure, MockHandle};

    struct SessionFixture {
        handle: Arc<MockHandle>,
        engine: Arc<MockEngine>,
        workdir: tempfile::TempDir,
    }

    impl SessionFixture {
        fn new(handle: MockHandle) -> Self {
            let handle = Arc::new(handle);
            let engine = Arc::new(MockEngine::new(Arc::clone(&handle)));
            Self {
                handle,
                engine,
                workdir: tempfile::tempdir().unwrap(),
            }
        }

        fn failing(handle: MockHandle, failure: MockFailure) -> Self {
            let handle = Arc::new(handle);
            let engine = Arc::new(MockEngine::new(Arc::clone(&handle)).failing_with(failure));
            Self {
                handle,
                engine,
                workdir: tempfile::tempdir().unwrap(),
            }
        }

        fn data_dir(&self) -> PathBuf {
            self.workdir.path().join("undertow")
        }

        fn controller(
            &self,
            cleanup: bool,
            metadata_timeout: Option<Duration>,
        ) -> SessionController {
            let config = SessionConfig {
                working_dir: self.data_dir(),
                cleanup,
                metadata_timeout,
            };
            SessionController::new(self.engine.clone(), config)
        }
    }

    fn movie_handle() -> MockHandle {
        MockHandle::new("Movie", &[("movie.mkv", 4096), ("movie.srt", 128)])
    }

    #[test]
    fn test_source_classification() {
        assert_eq!(
            SourceKind::classify("magnet:?xt=urn:btih:abcd"),
            SourceKind::Magnet
        );
        assert_eq!(
            SourceKind::classify("http://example.com/a.torrent"),
            SourceKind::Remote
        );
        assert_eq!(
            SourceKind::classify("https://example.com/a.torrent"),
            SourceKind::Remote
        );
        assert_eq!(
            SourceKind::classify("downloads/a.torrent"),
            SourceKind::LocalFile
        );
        assert_eq!(
            SourceKind::classify("httpfile.torrent"),
            SourceKind::LocalFile
        );
    }

    #[tokio::test]
    async fn test_open_magnet_exposes_container() {
        let fixture = SessionFixture::new(movie_handle());
        let mut session = fixture.controller(false, None);

        let container = session.open("magnet:?xt=urn:btih:abcd").await.unwrap();

        assert_eq!(container.name(), "Movie");
        assert_eq!(container.files().len(), 2);
        assert_eq!(
            fixture.engine.added(),
            vec!["magnet:magnet:?xt=urn:btih:abcd"]
        );
        assert!(fixture.data_dir().is_dir());
        assert!(Arc::ptr_eq(&session.container().unwrap(), &container));
    }

    #[tokio::test]
    async fn test_open_local_manifest_file() {
        let fixture = SessionFixture::new(movie_handle());
        let manifest = fixture.workdir.path().join("movie.torrent");
        let contents = b"d4:infod4:name5:moviee";
        std::fs::write(&manifest, contents).unwrap();
        let mut session = fixture.controller(false, None);

        session.open(manifest.to_str().unwrap()).await.unwrap();

        assert_eq!(
            fixture.engine.added(),
            vec![format!("bytes:{}", contents.len())]
        );
    }

    #[tokio::test]
    async fn test_missing_local_manifest_is_read_error() {
        let fixture = SessionFixture::new(movie_handle());
        let mut session = fixture.controller(false, None);

        let result = session.open("/nonexistent/undertow/missing.torrent").await;

        assert!(matches!(result, Err(SessionError::ReadManifest { .. })));
    }

    #[tokio::test]
    async fn test_malformed_descriptor_is_parse_error() {
        let fixture = SessionFixture::failing(movie_handle(), MockFailure::InvalidManifest);
        let mut session = fixture.controller(false, None);

        let result = session.open("magnet:?xt=urn:btih:zz").await;

        assert!(matches!(
            result,
            Err(SessionError::Parse {
                source: EngineError::InvalidManifest { .. }
            })
        ));
    }

    #[tokio::test]
    async fn test_rejected_descriptor_is_add_error() {
        let fixture = SessionFixture::failing(movie_handle(), MockFailure::Rejected);
        let mut session = fixture.controller(false, None);

        let result = session.open("magnet:?xt=urn:btih:abcd").await;

        assert!(matches!(result, Err(SessionError::Add { .. })));
    }

    #[tokio::test]
    async fn test_unreachable_remote_is_fetch_error() {
        let fixture = SessionFixture::new(movie_handle());
        let mut session = fixture.controller(false, None);

        let result = session.open("http://127.0.0.1:1/movie.torrent").await;

        match result {
            Err(SessionError::Fetch { url, .. }) => {
                assert_eq!(url, "http://127.0.0.1:1/movie.torrent");
            }
            other => panic!("expected fetch error, got {other:?}"),
        }
        assert!(fixture.engine.added().is_empty());
    }

    #[tokio::test]
    async fn test_open_waits_for_metadata() {
        let fixture = SessionFixture::new(movie_handle().with_pending_metadata());
        let mut session = fixture.controller(false, None);

        let handle = Arc::clone(&fixture.handle);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.publish_metadata();
        });

        let container = session.open("magnet:?xt=urn:btih:abcd").await.unwrap();
        assert_eq!(container.total_bytes(), 4224);
    }

    #[tokio::test]
    async fn test_metadata_timeout() {
        let fixture = SessionFixture::new(movie_handle().with_pending_metadata());
        let mut session = fixture.controller(false, Some(Duration::from_millis(50)));

        let result = session.open("magnet:?xt=urn:btih:abcd").await;

        assert!(matches!(result, Err(SessionError::MetadataTimeout { .. })));
        assert!(matches!(session.container(), Err(SessionError::NotOpen)));
    }

    #[tokio::test]
    async fn test_empty_container_is_rejected() {
        let fixture = SessionFixture::new(MockHandle::new("Nothing", &[]));
        let mut session = fixture.controller(false, None);

        let result = session.open("magnet:?xt=urn:btih:abcd").await;

        assert!(matches!(
            result,
            Err(SessionError::Container(ContainerError::Empty))
        ));
    }

    #[tokio::test]
    async fn test_close_cleans_up_and_is_idempotent() {
        let fixture = SessionFixture::new(movie_handle());
        let mut session = fixture.controller(true, None);
        session.open("magnet:?xt=urn:btih:abcd").await.unwrap();
        assert!(fixture.data_dir().is_dir());

        session.close().await;
        session.close().await;

        assert!(fixture.handle.is_closed());
        assert!(fixture.engine.is_closed());
        assert!(!fixture.data_dir().exists());
        assert!(matches!(session.container(), Err(SessionError::NotOpen)));
    }

    #[tokio::test]
    async fn test_close_without_cleanup_keeps_data() {
        let fixture = SessionFixture::new(movie_handle());
        let mut session = fixture.controller(false, None);
        session.open("magnet:?xt=urn:btih:abcd").await.unwrap();

        session.close().await;

        assert!(fixture.data_dir().is_dir());
        assert!(fixture.engine.is_closed());
    }

    #[tokio::test]
    async fn test_close_before_open_still_releases_engine() {
        let fixture = SessionFixture::new(movie_handle());
        let mut session = fixture.controller(true, None);

        session.close().await;

        assert!(fixture.engine.is_closed());
        assert!(!fixture.handle.is_closed());
    }
}
