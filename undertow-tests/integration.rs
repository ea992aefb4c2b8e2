//! Integration tests for Undertow
//!
//! These tests run the HTTP server on a real listener against the simulated
//! engine and talk to it with an HTTP client.

#[path = "integration/fixtures.rs"]
mod fixtures;

#[path = "integration/playlist.rs"]
mod playlist;
#[path = "integration/session_sources.rs"]
mod session_sources;
#[path = "integration/single_file.rs"]
mod single_file;
