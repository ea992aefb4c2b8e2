//! Shared setup: a simulated container served on an ephemeral port.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinHandle;
use undertow_core::config::StreamingConfig;
use undertow_core::{Container, FileEntry};
use undertow_sim::{
    Manifest, ManifestBuilder, SimulatedEngine, SimulatedHandle, SwarmConfig, SyntheticContent,
};
use undertow_web::{ServeMode, StreamServer};

pub struct Served {
    pub handle: Arc<SimulatedHandle>,
    pub container: Arc<Container>,
    pub address: SocketAddr,
    content: SyntheticContent,
    server: JoinHandle<()>,
}

impl Served {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.address, path)
    }

    /// Bytes the container holds at `[offset, offset + len)`.
    pub fn expected(&self, offset: u64, len: usize) -> Vec<u8> {
        self.content.generate(offset, len).to_vec()
    }

    /// Expected bytes of a whole file.
    pub fn file_bytes(&self, entry: &FileEntry) -> Vec<u8> {
        self.expected(entry.offset(), entry.length() as usize)
    }

    pub fn file(&self, path: &str) -> FileEntry {
        self.container
            .find_by_path(path)
            .cloned()
            .unwrap_or_else(|| panic!("no file {path}"))
    }
}

impl Drop for Served {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Three-file pack; the movie sits between two other files so file
/// offsets matter.
pub fn pack() -> ManifestBuilder {
    ManifestBuilder::multi_file("pack")
        .file("cover.jpg", 700)
        .file("Season 1/episode one.mkv", 5000)
        .file("track.mp3", 1300)
        .piece_length(512)
}

/// Serves `builder` with manual piece completion.
pub async fn serve(
    builder: ManifestBuilder,
    select: impl FnOnce(&Container) -> ServeMode,
    complete: bool,
) -> Served {
    let engine = SimulatedEngine::new(SwarmConfig::manual());
    let manifest_bytes = builder.build();
    let manifest = Manifest::from_bytes(&manifest_bytes).unwrap();

    let handle = engine.add_manifest_handle(&manifest_bytes).await.unwrap();
    if complete {
        handle.complete_all();
    }

    let container = Arc::new(Container::from_handle(handle.clone()).unwrap());
    let mode = select(&container);
    let streaming = StreamingConfig {
        readahead_bytes: 1024,
        chunk_size: 256,
    };

    let bound = StreamServer::new(Arc::clone(&container), mode, streaming)
        .bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let address = bound.local_addr();
    let server = tokio::spawn(async move {
        let _ = bound.serve().await;
    });

    Served {
        handle,
        container,
        address,
        content: SyntheticContent::new(0, &manifest),
        server,
    }
}

/// Single-file mode on the movie of [`pack`].
pub async fn serve_movie(complete: bool) -> Served {
    serve(
        pack(),
        |container| {
            ServeMode::Single(
                container
                    .find_by_path("Season 1/episode one.mkv")
                    .cloned()
                    .unwrap(),
            )
        },
        complete,
    )
    .await
}
