//! Undertow simulation engine - an in-process transfer engine for demos and tests.

#![warn(clippy::missing_errors_doc)]
#![deny(clippy::missing_panics_doc)]
#![warn(clippy::too_many_lines)]
//!
//! Containers are described by ordinary bencoded manifests, but nothing
//! touches the network: a driver task completes pieces at a configured
//! rate, in the order readers ask for them, and bytes come from a
//! [`ContentSource`].
//!
//! # Example
//!
//! ```rust,no_run
//! use undertow_core::TransferEngine;
//! use undertow_sim::{ManifestBuilder, SimulatedEngine, SwarmConfig};
//!
//! # async fn demo() -> Result<(), undertow_core::EngineError> {
//! let engine = SimulatedEngine::new(SwarmConfig::default());
//! let manifest = ManifestBuilder::single_file("movie.mkv", 64 * 1024 * 1024).build();
//!
//! let handle = engine.add_manifest_bytes(&manifest).await?;
//! handle.metadata_ready().await;
//! println!("{:?} is {:?} bytes", handle.name(), handle.total_length());
//! # Ok(())
//! # }
//! ```

pub mod content;
pub mod engine;
pub mod manifest;
pub mod reader;
pub mod swarm;

pub use content::{ContentMode, ContentSource, SeedDirectory, SyntheticContent};
pub use engine::{DEFAULT_RATE, SimulatedEngine, SimulatedHandle, SwarmConfig};
pub use manifest::{DEFAULT_PIECE_LENGTH, InfoHash, MagnetLink, Manifest, ManifestBuilder};
pub use reader::SimulatedReader;
pub use swarm::{ReaderInterest, Swarm, pick_piece};
