//! Seed directory to HTTP playback, with a rate-limited swarm.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::RANGE;
use undertow_core::config::{SessionConfig, StreamingConfig};
use undertow_core::progress::ServingMode;
use undertow_core::{ProgressMonitor, SessionController, TransferEngine};
use undertow_sim::{ContentMode, ManifestBuilder, SimulatedEngine, SwarmConfig};
use undertow_web::{ServeMode, StreamServer};

fn media(len: usize, salt: u8) -> Vec<u8> {
    (0..len).map(|i| (i % 253) as u8 ^ salt).collect()
}

#[tokio::test]
async fn test_seeded_playlist_session() {
    let seed = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    std::fs::create_dir(seed.path().join("extras")).unwrap();
    let movie = media(300_000, 0x5a);
    let clip = media(40_000, 0x17);
    std::fs::write(seed.path().join("movie.mp4"), &movie).unwrap();
    std::fs::write(seed.path().join("extras/clip one.mkv"), &clip).unwrap();
    std::fs::write(seed.path().join("notes.txt"), b"liner notes").unwrap();

    let engine = Arc::new(SimulatedEngine::new(SwarmConfig {
        rate: Some(2_000_000),
        tick: Duration::from_millis(10),
        content: ContentMode::SeedDirectory(seed.path().to_path_buf()),
    }));
    let manifest = ManifestBuilder::from_directory(seed.path())
        .await
        .unwrap()
        .piece_length(16 * 1024)
        .build();
    let info_hash = engine.publish(&manifest).unwrap();

    let working_dir = work.path().join("undertow");
    let mut session = SessionController::new(
        Arc::clone(&engine) as Arc<dyn TransferEngine>,
        SessionConfig {
            working_dir: working_dir.clone(),
            cleanup: true,
            metadata_timeout: Some(Duration::from_secs(5)),
        },
    );
    let container = session
        .open(&format!("magnet:?xt=urn:btih:{info_hash}"))
        .await
        .unwrap();
    assert_eq!(container.files().len(), 3);

    let streaming = StreamingConfig {
        readahead_bytes: 32 * 1024,
        chunk_size: 8 * 1024,
    };
    let bound = StreamServer::new(
        Arc::clone(&container),
        ServeMode::Playlist,
        streaming.clone(),
    )
    .bind("127.0.0.1:0".parse().unwrap())
    .await
    .unwrap();
    let address = bound.local_addr();
    let server = tokio::spawn(async move {
        let _ = bound.serve().await;
    });

    let mut monitor = ProgressMonitor::new(
        Arc::clone(&container),
        ServingMode::Playlist,
        streaming.readahead_bytes,
        address.to_string(),
    );
    assert!(monitor.next_frame().contains(&format!("http://{address}/playlist.m3u")));

    let playlist = reqwest::get(format!("http://{address}/playlist.m3u"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(playlist.contains(&format!("http://{address}/extras/clip%20one.mkv\n")));
    assert!(playlist.contains(&format!("http://{address}/movie.mp4\n")));
    assert!(!playlist.contains("notes.txt"));

    let client = reqwest::Client::new();
    let tail = tokio::time::timeout(Duration::from_secs(10), async {
        client
            .get(format!("http://{address}/movie.mp4"))
            .header(RANGE, "bytes=250000-")
            .send()
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap()
    })
    .await
    .unwrap();
    assert_eq!(&tail[..], &movie[250_000..]);

    let whole = tokio::time::timeout(Duration::from_secs(10), async {
        reqwest::get(format!("http://{address}/extras/clip%20one.mkv"))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap()
    })
    .await
    .unwrap();
    assert_eq!(&whole[..], &clip[..]);

    assert!(container.completed_bytes() > 0);

    server.abort();
    session.close().await;
    assert!(!working_dir.exists());
}
