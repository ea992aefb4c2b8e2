//! End-to-end tests for Undertow
//!
//! These tests run a whole session the way the binary does: seed files,
//! resolve a magnet link, serve over HTTP while pieces arrive, report
//! progress, then shut down and clean up.

mod streaming_workflow;
