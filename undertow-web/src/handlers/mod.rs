//! HTTP request handlers organized by functionality

pub mod files;
pub mod playlist;
pub mod range;

// Re-export handler functions
pub use files::{not_found, serve_by_path, serve_selected};
pub use playlist::{render_playlist, serve_playlist};
pub use range::{ByteRange, RangeRequest, parse_range_header};
