//! Fetched container and its file entries
//!
//! A container is built once, after the engine reports metadata, and never
//! changes afterwards. Its file list is shared read-only between request
//! handlers and the progress monitor.

use std::sync::Arc;

use crate::engine::TransferHandle;
use crate::streaming::{SeekableStream, StreamError};

/// Errors raised while building a container from engine metadata.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("Container metadata is not available yet")]
    MetadataUnavailable,

    #[error("Container has no files")]
    Empty,

    #[error("File {path} ({offset}+{length}) exceeds container length {total}")]
    EntryOutOfBounds {
        path: String,
        offset: u64,
        length: u64,
        total: u64,
    },
}

/// One logical file within a container's flat byte address space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    index: usize,
    path: String,
    offset: u64,
    length: u64,
}

impl FileEntry {
    /// Creates an entry at manifest position `index`.
    pub fn new(index: usize, path: impl Into<String>, offset: u64, length: u64) -> Self {
        Self {
            index,
            path: path.into(),
            offset,
            length,
        }
    }

    /// Position in manifest order.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Display path, also used for routing.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Offset of the first byte within the container.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    /// Container offset one past the last byte of this file.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Container of files described by one fetched manifest.
pub struct Container {
    name: String,
    files: Vec<FileEntry>,
    total_length: u64,
    handle: Arc<dyn TransferHandle>,
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("name", &self.name)
            .field("files", &self.files)
            .field("total_length", &self.total_length)
            .finish_non_exhaustive()
    }
}

impl Container {
    /// Builds a container from a handle whose metadata has arrived.
    ///
    /// # Errors
    /// - `ContainerError::MetadataUnavailable` - Handle reports no total length yet
    /// - `ContainerError::Empty` - Manifest lists no files
    /// - `ContainerError::EntryOutOfBounds` - An entry reaches past the container end
    pub fn from_handle(handle: Arc<dyn TransferHandle>) -> Result<Self, ContainerError> {
        let total_length = handle
            .total_length()
            .ok_or(ContainerError::MetadataUnavailable)?;

        let files: Vec<FileEntry> = handle
            .files()
            .into_iter()
            .enumerate()
            .map(|(index, file)| FileEntry::new(index, file.path, file.offset, file.length))
            .collect();

        if files.is_empty() {
            return Err(ContainerError::Empty);
        }

        if let Some(entry) = files.iter().find(|entry| entry.end() > total_length) {
            return Err(ContainerError::EntryOutOfBounds {
                path: entry.path.clone(),
                offset: entry.offset,
                length: entry.length,
                total: total_length,
            });
        }

        let name = handle.name().unwrap_or_else(|| files[0].path.clone());

        tracing::debug!(
            "Container {} ready: {} files, {} bytes",
            name,
            files.len(),
            total_length
        );

        Ok(Self {
            name,
            files,
            total_length,
            handle,
        })
    }

    /// Display name from the manifest.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Every file in manifest order.
    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    pub fn file(&self, index: usize) -> Option<&FileEntry> {
        self.files.get(index)
    }

    /// Largest file, earliest in manifest order on ties.
    pub fn largest_file(&self) -> Option<&FileEntry> {
        self.files.iter().fold(None, |largest, entry| match largest {
            Some(current) if current.length >= entry.length => Some(current),
            _ => Some(entry),
        })
    }

    /// First file whose display path equals `path` byte for byte.
    pub fn find_by_path(&self, path: &str) -> Option<&FileEntry> {
        self.files.iter().find(|entry| entry.path == path)
    }

    /// Bytes completed across the whole container.
    pub fn completed_bytes(&self) -> u64 {
        self.handle.completed_bytes()
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_length
    }

    /// Opens an independent stream over `entry` with its own engine reader.
    ///
    /// # Errors
    /// - `StreamError::Engine` - Engine reader could not be positioned
    pub fn open_stream(
        &self,
        entry: &FileEntry,
        readahead: u64,
    ) -> Result<SeekableStream, StreamError> {
        SeekableStream::new(entry.clone(), self.handle.new_reader(), readahead)
    }

    /// Underlying engine handle.
    pub fn handle(&self) -> &Arc<dyn TransferHandle> {
        &self.handle
    }
}
