//! Transfer engine contract
//!
//! The swarm protocol, piece verification and storage live behind these
//! traits. Undertow only consumes them: it adds a descriptor, waits for the
//! manifest, polls completion counters and opens container-wide readers.

use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncRead;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_mocks;

#[cfg(any(test, feature = "test-utils"))]
pub use test_mocks::{MockEngine, MockFailure, MockHandle, MockReaderLog, pattern_byte};

/// Errors reported by a transfer engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Descriptor bytes could not be decoded into a manifest.
    #[error("Invalid manifest: {reason}")]
    InvalidManifest {
        /// Why decoding failed.
        reason: String,
    },

    /// Descriptor was understood but the engine refused to add it.
    #[error("Engine rejected descriptor: {reason}")]
    Rejected {
        /// Why the engine refused.
        reason: String,
    },

    /// I/O failure while loading a descriptor.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Engine has been shut down.
    #[error("Engine is closed")]
    Closed,
}

/// One file entry as described by the fetched manifest.
///
/// `path` is the display path with components joined by `/`. `offset` is the
/// position of the file's first byte in the container's flat address space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestFile {
    pub path: String,
    pub offset: u64,
    pub length: u64,
}

impl ManifestFile {
    /// Lays out `(path, length)` pairs back to back starting at offset zero.
    ///
    /// # Errors
    /// - `EngineError::InvalidManifest` - Lengths add up past `u64::MAX`
    pub fn sequential<I, S>(entries: I) -> Result<Vec<Self>, EngineError>
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        let mut offset = 0u64;
        let mut files = Vec::new();
        for (path, length) in entries {
            let path = path.into();
            let end = offset
                .checked_add(length)
                .ok_or_else(|| EngineError::InvalidManifest {
                    reason: format!("File {path} ends past the addressable range"),
                })?;
            files.push(Self {
                path,
                offset,
                length,
            });
            offset = end;
        }
        Ok(files)
    }
}

/// Container-wide byte reader handed out by the engine.
///
/// Positions are absolute offsets in the container's flat address space.
/// Reads suspend until the requested bytes have been fetched. Dropping the
/// reader releases whatever fetch priority it was holding.
pub trait EngineReader: AsyncRead + Send + Unpin {
    /// Prefer pieces around the cursor over strict piece-index order.
    fn set_responsive(&mut self);

    /// Number of bytes past the cursor the engine should keep in flight.
    fn set_readahead(&mut self, bytes: u64);

    /// Moves the cursor to an absolute container offset.
    ///
    /// # Errors
    /// - `io::ErrorKind::InvalidInput` - Position beyond the container end
    fn seek(&mut self, position: u64) -> io::Result<()>;

    /// Current absolute container offset.
    fn position(&self) -> u64;
}

/// Handle to one container added to the engine.
#[async_trait]
pub trait TransferHandle: Send + Sync {
    /// Resolves once the manifest (file list and sizes) is known.
    ///
    /// Fires at most once; awaiting again after that returns immediately.
    async fn metadata_ready(&self);

    /// Display name from the manifest, if known yet.
    fn name(&self) -> Option<String>;

    /// Bytes fetched and verified so far across the whole container.
    fn completed_bytes(&self) -> u64;

    /// Total container length, `None` until metadata has arrived.
    fn total_length(&self) -> Option<u64>;

    /// Manifest entries in manifest order. Empty until metadata has arrived.
    fn files(&self) -> Vec<ManifestFile>;

    /// Opens a fresh reader positioned at container offset zero.
    fn new_reader(&self) -> Box<dyn EngineReader>;

    /// Drops the container from the engine.
    async fn close(&self);
}

/// Entry point of a transfer engine.
#[async_trait]
pub trait TransferEngine: Send + Sync {
    /// Adds a container from a magnet-style direct descriptor.
    ///
    /// # Errors
    /// - `EngineError::InvalidManifest` - Descriptor could not be decoded
    /// - `EngineError::Rejected` - Engine refused the container
    async fn add_magnet(&self, uri: &str) -> Result<Arc<dyn TransferHandle>, EngineError>;

    /// Adds a container from raw manifest bytes.
    ///
    /// # Errors
    /// - `EngineError::InvalidManifest` - Manifest bytes are malformed
    /// - `EngineError::Rejected` - Engine refused the container
    async fn add_manifest_bytes(
        &self,
        bytes: &[u8],
    ) -> Result<Arc<dyn TransferHandle>, EngineError>;

    /// Adds a container from a manifest file on disk.
    ///
    /// # Errors
    /// - `EngineError::Io` - File could not be read
    /// - `EngineError::InvalidManifest` - File contents are malformed
    /// - `EngineError::Rejected` - Engine refused the container
    async fn add_manifest_file(&self, path: &Path)
    -> Result<Arc<dyn TransferHandle>, EngineError>;

    /// Shuts the engine down.
    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_layout_offsets() {
        let files =
            ManifestFile::sequential([("a.mkv", 100), ("b.srt", 20), ("c.nfo", 5)]).unwrap();

        assert_eq!(files[0].offset, 0);
        assert_eq!(files[1].offset, 100);
        assert_eq!(files[2].offset, 120);
        assert_eq!(files[2].length, 5);
    }

    #[test]
    fn test_sequential_layout_rejects_overflow() {
        let huge = i64::MAX as u64;
        let result = ManifestFile::sequential([("a", huge), ("b", huge), ("c", huge)]);

        assert!(matches!(result, Err(EngineError::InvalidManifest { .. })));
    }

    #[test]
    fn test_engine_error_display() {
        let error = EngineError::InvalidManifest {
            reason: "missing info".to_string(),
        };
        assert_eq!(error.to_string(), "Invalid manifest: missing info");
        assert_eq!(EngineError::Closed.to_string(), "Engine is closed");
    }
}
