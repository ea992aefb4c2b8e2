//! Undertow Web - HTTP streaming surface

#![warn(missing_docs)]
#![warn(clippy::missing_errors_doc)]
#![deny(clippy::missing_panics_doc)]
#![warn(clippy::too_many_lines)]
//!
//! Serves one file of a container at `/`, or every playable file behind an
//! M3U playlist, with byte-range support so media players can seek.

pub mod handlers;
pub mod server;

// Re-export main types
pub use server::{AppState, BoundServer, ServeMode, ServerError, StreamServer};
