//! File streaming over container-wide engine readers.
//!
//! [`SeekableStream`] turns one file's window of the container into an
//! independent, seekable byte stream. [`MediaFilter`] decides which files
//! count as playable media.

pub mod media;
pub mod seekable;

pub use media::{ExtensionMediaFilter, MediaFilter, PLAYLIST_MIME_TYPE, mime_type};
pub use seekable::{SeekOrigin, SeekableStream, StreamError};
