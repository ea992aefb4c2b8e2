//! Byte sources backing simulated containers
//!
//! The swarm only decides *when* bytes become available. What those bytes
//! are comes from a content source: deterministic pseudo-random data, or
//! real files from a seed directory laid out like the manifest.

use std::io::{self, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use undertow_core::ManifestFile;

use crate::manifest::Manifest;

/// Supplies container bytes for pieces the swarm has completed.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Reads `len` bytes starting at container offset `offset`.
    ///
    /// # Errors
    /// - `io::Error` - Backing data is missing or unreadable
    async fn read_range(&self, offset: u64, len: usize) -> io::Result<Bytes>;
}

/// How content sources are created for newly added containers.
#[derive(Debug, Clone)]
pub enum ContentMode {
    /// Deterministic bytes derived from a seed.
    Synthetic { seed: u64 },
    /// Files read from a directory that mirrors the manifest paths.
    SeedDirectory(PathBuf),
}

impl Default for ContentMode {
    fn default() -> Self {
        ContentMode::Synthetic { seed: 0 }
    }
}

impl ContentMode {
    pub(crate) fn source_for(&self, manifest: &Manifest) -> Arc<dyn ContentSource> {
        match self {
            ContentMode::Synthetic { seed } => Arc::new(SyntheticContent::new(*seed, manifest)),
            ContentMode::SeedDirectory(root) => {
                Arc::new(SeedDirectory::new(root.clone(), manifest))
            }
        }
    }
}

/// Pseudo-random container bytes, reproducible per piece.
///
/// Each piece is generated from a ChaCha stream seeded with the source
/// seed and the piece index, so any range can be produced on demand.
#[derive(Debug, Clone)]
pub struct SyntheticContent {
    seed: u64,
    piece_length: u64,
    total_length: u64,
}

impl SyntheticContent {
    pub fn new(seed: u64, manifest: &Manifest) -> Self {
        Self {
            seed,
            piece_length: manifest.piece_length,
            total_length: manifest.total_length,
        }
    }

    /// Generates container bytes `[offset, offset + len)`, clamped to the end.
    pub fn generate(&self, offset: u64, len: usize) -> Bytes {
        let end = (offset + len as u64).min(self.total_length);
        let mut out = BytesMut::with_capacity(end.saturating_sub(offset) as usize);

        let mut position = offset;
        while position < end {
            let index = position / self.piece_length;
            let piece_start = index * self.piece_length;
            let piece_end = (piece_start + self.piece_length).min(self.total_length);

            let piece = self.piece(index, (piece_end - piece_start) as usize);
            let from = (position - piece_start) as usize;
            let to = (end.min(piece_end) - piece_start) as usize;
            out.extend_from_slice(&piece[from..to]);
            position = piece_start + to as u64;
        }

        out.freeze()
    }

    fn piece(&self, index: u64, len: usize) -> Vec<u8> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed ^ index.rotate_left(32));
        let mut piece = vec![0u8; len];
        rng.fill_bytes(&mut piece);
        piece
    }
}

#[async_trait]
impl ContentSource for SyntheticContent {
    async fn read_range(&self, offset: u64, len: usize) -> io::Result<Bytes> {
        Ok(self.generate(offset, len))
    }
}

/// Serves manifest files from a local directory.
#[derive(Debug, Clone)]
pub struct SeedDirectory {
    root: PathBuf,
    files: Vec<ManifestFile>,
}

impl SeedDirectory {
    pub fn new(root: PathBuf, manifest: &Manifest) -> Self {
        Self {
            root,
            files: manifest.files.clone(),
        }
    }
}

#[async_trait]
impl ContentSource for SeedDirectory {
    async fn read_range(&self, offset: u64, len: usize) -> io::Result<Bytes> {
        let end = offset + len as u64;
        let mut out = BytesMut::with_capacity(len);

        for file in &self.files {
            let file_end = file.offset + file.length;
            if file_end <= offset || file.offset >= end {
                continue;
            }

            let from = offset.max(file.offset);
            let to = end.min(file_end);
            let path = self.root.join(&file.path);

            let mut handle = tokio::fs::File::open(&path).await.map_err(|e| {
                io::Error::new(e.kind(), format!("seed file {}: {e}", path.display()))
            })?;
            handle.seek(SeekFrom::Start(from - file.offset)).await?;

            let mut chunk = vec![0u8; (to - from) as usize];
            handle.read_exact(&mut chunk).await?;
            out.extend_from_slice(&chunk);
        }

        Ok(out.freeze())
    }
}
