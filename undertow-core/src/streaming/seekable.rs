//! Seekable byte stream over one file of a container
//!
//! The engine reader addresses the whole container; this stream exposes a
//! single file's window with positions relative to the file's first byte.
//! Every seek translates `engine position = file offset + stream position`.

use std::io::{self, SeekFrom};
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};

use crate::container::FileEntry;
use crate::engine::EngineReader;

/// Errors produced by a seekable stream.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Computed seek target falls outside `[0, length]`.
    #[error("Seek target {target} outside file of length {length}")]
    OutOfRange {
        /// Target position the seek resolved to.
        target: i128,
        /// Length of the file.
        length: u64,
    },

    /// Engine reader failed.
    #[error("Engine reader error: {0}")]
    Engine(#[from] io::Error),
}

impl From<StreamError> for io::Error {
    fn from(error: StreamError) -> Self {
        match error {
            StreamError::OutOfRange { .. } => io::Error::new(io::ErrorKind::InvalidInput, error),
            StreamError::Engine(inner) => inner,
        }
    }
}

/// Reference point for [`SeekableStream::seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOrigin {
    /// Offset is an absolute position in the file.
    Start,
    /// Offset is added to the current position.
    Current,
    /// Offset is a distance back from the end of the file.
    End,
}

/// Per-request cursor over one file of a container.
///
/// Each instance owns its engine reader, so concurrent requests never share
/// a cursor or a readahead window. Dropping the stream drops the reader and
/// any read it was waiting on.
pub struct SeekableStream {
    entry: FileEntry,
    reader: Box<dyn EngineReader>,
    position: u64,
    readahead: u64,
}

impl std::fmt::Debug for SeekableStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeekableStream")
            .field("entry", &self.entry)
            .field("position", &self.position)
            .field("readahead", &self.readahead)
            .finish_non_exhaustive()
    }
}

impl SeekableStream {
    /// Wraps `reader` so that it serves `entry`.
    ///
    /// Switches the reader to responsive mode, applies the readahead window
    /// and positions it at the file's first byte.
    ///
    /// # Errors
    /// - `StreamError::Engine` - Reader rejected the initial seek
    pub fn new(
        entry: FileEntry,
        mut reader: Box<dyn EngineReader>,
        readahead: u64,
    ) -> Result<Self, StreamError> {
        reader.set_responsive();
        reader.set_readahead(readahead);
        reader.seek(entry.offset())?;

        Ok(Self {
            entry,
            reader,
            position: 0,
            readahead,
        })
    }

    /// File this stream serves.
    pub fn entry(&self) -> &FileEntry {
        &self.entry
    }

    /// Current position relative to the file start.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn len(&self) -> u64 {
        self.entry.length()
    }

    pub fn is_empty(&self) -> bool {
        self.entry.length() == 0
    }

    /// Bytes left between the cursor and the end of the file.
    pub fn remaining(&self) -> u64 {
        self.entry.length() - self.position
    }

    pub fn readahead(&self) -> u64 {
        self.readahead
    }

    /// Moves the cursor and returns the new file-relative position.
    ///
    /// `End` counts backwards: `seek(0, End)` lands on end-of-file and
    /// `seek(10, End)` ten bytes before it. On error the cursor stays put.
    ///
    /// # Errors
    /// - `StreamError::OutOfRange` - Target below zero or past the file length
    /// - `StreamError::Engine` - Engine reader rejected the translated seek
    pub fn seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<u64, StreamError> {
        let length = self.entry.length();
        let offset = i128::from(offset);
        let target = match origin {
            SeekOrigin::Start => offset,
            SeekOrigin::Current => i128::from(self.position) + offset,
            SeekOrigin::End => i128::from(length) - offset,
        };

        if target < 0 || target > i128::from(length) {
            return Err(StreamError::OutOfRange { target, length });
        }

        let target = target as u64;
        self.reader.seek(self.entry.offset() + target)?;
        self.position = target;

        tracing::trace!(
            "Stream {} seek to {} (engine {})",
            self.entry.path(),
            target,
            self.entry.offset() + target
        );

        Ok(target)
    }
}

impl AsyncRead for SeekableStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        let remaining = this.remaining();
        if remaining == 0 || buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        // Never let the engine reader run into the next file's bytes.
        let limit = remaining.min(buf.remaining() as u64) as usize;
        let mut window = ReadBuf::new(buf.initialize_unfilled_to(limit));
        ready!(Pin::new(&mut this.reader).poll_read(cx, &mut window))?;

        let count = window.filled().len();
        buf.advance(count);
        this.position += count as u64;

        Poll::Ready(Ok(()))
    }
}

impl AsyncSeek for SeekableStream {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        let this = self.get_mut();
        let (offset, origin) = match position {
            SeekFrom::Start(offset) => (
                i64::try_from(offset).map_err(|_| {
                    io::Error::new(io::ErrorKind::InvalidInput, "seek offset overflows i64")
                })?,
                SeekOrigin::Start,
            ),
            SeekFrom::Current(offset) => (offset, SeekOrigin::Current),
            SeekFrom::End(offset) => (
                offset.checked_neg().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidInput, "seek offset overflows i64")
                })?,
                SeekOrigin::End,
            ),
        };

        this.seek(offset, origin)?;
        Ok(())
    }

    fn poll_complete(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Poll::Ready(Ok(self.position))
    }
}
