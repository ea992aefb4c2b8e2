//! Undertow Core - Streaming adapter over a piece-oriented transfer engine
//!
//! This crate turns one file inside a swarm-fetched container into a
//! seekable byte stream, reports download progress and readiness, and
//! drives the session that opens and closes the container.

pub mod config;
pub mod container;
pub mod engine;
pub mod progress;
pub mod session;
pub mod streaming;

// Re-export main types for convenient access
pub use config::UndertowConfig;
pub use container::{Container, ContainerError, FileEntry};
pub use engine::{EngineError, EngineReader, ManifestFile, TransferEngine, TransferHandle};
pub use progress::{ProgressMonitor, ProgressSample, Readiness, ServingMode};
pub use session::{SessionController, SessionError, SourceKind};
pub use streaming::{SeekOrigin, SeekableStream, StreamError};

/// Core errors that can bubble up from any Undertow subsystem.
#[derive(Debug, thiserror::Error)]
pub enum UndertowError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Container error: {0}")]
    Container(#[from] ContainerError),

    #[error("Streaming error: {0}")]
    Stream(#[from] StreamError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl UndertowError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            UndertowError::Session(e) => match e {
                SessionError::Fetch { url, .. } => format!("Could not download {url}"),
                SessionError::ReadManifest { path, .. } => {
                    format!("Could not read {}", path.display())
                }
                SessionError::Parse { source } => format!("Invalid descriptor: {source}"),
                SessionError::Add { .. } => {
                    "The transfer engine refused the descriptor".to_string()
                }
                SessionError::MetadataTimeout { after } => {
                    format!("No metadata received after {} seconds", after.as_secs())
                }
                SessionError::Container(ContainerError::Empty) => {
                    "The container has no files to stream".to_string()
                }
                _ => "Session error occurred".to_string(),
            },
            UndertowError::Engine(_) => "Transfer engine error occurred".to_string(),
            UndertowError::Container(_) => "Container metadata is inconsistent".to_string(),
            UndertowError::Stream(_) => "Streaming error occurred".to_string(),
            UndertowError::Configuration { reason } => format!("Configuration error: {reason}"),
            UndertowError::Io(e) => format!("I/O error: {e}"),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            UndertowError::Configuration { .. }
                | UndertowError::Session(SessionError::Parse { .. })
                | UndertowError::Session(SessionError::ReadManifest { .. })
                | UndertowError::Session(SessionError::Container(ContainerError::Empty))
        )
    }
}

pub type Result<T> = std::result::Result<T, UndertowError>;
