//! Media type detection for container files
//!
//! Detection works from the file extension alone. Sniffing content would
//! require fetching the first bytes of every file before a playlist could be
//! listed.

use mime_guess::mime;

/// MIME type used for generated M3U playlists.
pub const PLAYLIST_MIME_TYPE: &str = "application/vnd.apple.mpegurl";

/// Decides which container files are offered to media players.
pub trait MediaFilter: Send + Sync {
    /// Returns true if `path` names audio or video content.
    fn is_playable(&self, path: &str) -> bool;
}

/// Accepts files whose primary extension type is `video/*` or `audio/*`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtensionMediaFilter;

impl MediaFilter for ExtensionMediaFilter {
    fn is_playable(&self, path: &str) -> bool {
        // Same guess as `mime_type`, so the playlist never lists a file
        // that is then served as something other than audio or video.
        mime_guess::from_path(path)
            .first()
            .is_some_and(|guess| guess.type_() == mime::VIDEO || guess.type_() == mime::AUDIO)
    }
}

/// Content type announced for `path`, `application/octet-stream` if unknown.
pub fn mime_type(path: &str) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}
