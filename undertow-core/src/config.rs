//! Centralized configuration for Undertow.
//!
//! The readahead size lives here instead of in a constant because it feeds
//! two places: the per-stream readahead window and the readiness threshold
//! of the progress monitor.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Default bytes kept in flight past a stream cursor.
pub const DEFAULT_READAHEAD_BYTES: u64 = 5 * 1024 * 1024;

/// Default HTTP port.
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Name of the data directory created under the working directory.
pub const DATA_DIR_NAME: &str = "undertow";

/// Central configuration for all Undertow components.
#[derive(Debug, Clone, Default)]
pub struct UndertowConfig {
    pub session: SessionConfig,
    pub server: ServerConfig,
    pub streaming: StreamingConfig,
}

/// Transfer session and working directory settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Directory the engine stores downloaded data in
    pub working_dir: PathBuf,
    /// Remove the working directory when the session closes
    pub cleanup: bool,
    /// Give up waiting for metadata after this long (None = wait forever)
    pub metadata_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            working_dir: std::env::temp_dir().join(DATA_DIR_NAME),
            cleanup: true,
            metadata_timeout: None,
        }
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: IpAddr,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_HTTP_PORT,
        }
    }
}

impl ServerConfig {
    pub fn socket_address(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

/// Stream and readiness settings.
#[derive(Debug, Clone)]
pub struct StreamingConfig {
    /// Readahead window per stream, also the "ready to open" threshold
    pub readahead_bytes: u64,
    /// Size of body chunks read from a stream per HTTP write
    pub chunk_size: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            readahead_bytes: DEFAULT_READAHEAD_BYTES,
            chunk_size: 64 * 1024, // 64 KiB
        }
    }
}

impl UndertowConfig {
    /// Creates a configuration suited to tests: ephemeral port, tiny
    /// readahead and no cleanup of shared temp directories.
    pub fn for_testing() -> Self {
        Self {
            session: SessionConfig {
                cleanup: false,
                metadata_timeout: Some(Duration::from_secs(5)),
                ..Default::default()
            },
            server: ServerConfig {
                port: 0,
                ..Default::default()
            },
            streaming: StreamingConfig {
                readahead_bytes: 1024,
                chunk_size: 256,
            },
        }
    }
}
