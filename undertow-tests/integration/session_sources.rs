//! Source resolution through the session controller.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use tempfile::TempDir;
use undertow_core::config::SessionConfig;
use undertow_core::{SessionController, SessionError, TransferEngine};
use undertow_sim::{Manifest, ManifestBuilder, SimulatedEngine, SwarmConfig};

use crate::fixtures::pack;

struct Fixture {
    engine: Arc<SimulatedEngine>,
    session: SessionController,
    workspace: TempDir,
}

fn fixture(metadata_timeout: Option<Duration>) -> Fixture {
    let workspace = tempfile::tempdir().unwrap();
    let engine = Arc::new(SimulatedEngine::new(SwarmConfig::manual()));
    let config = SessionConfig {
        working_dir: workspace.path().join("undertow"),
        cleanup: true,
        metadata_timeout,
    };
    let session = SessionController::new(Arc::clone(&engine) as Arc<dyn TransferEngine>, config);

    Fixture {
        engine,
        session,
        workspace,
    }
}

/// Serves `body` at `/pack.torrent` on an ephemeral port.
async fn descriptor_server(body: Vec<u8>) -> String {
    let app = Router::new().route("/pack.torrent", get(move || async move { body }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{address}")
}

#[tokio::test]
async fn test_open_local_manifest_and_clean_up() {
    let mut fixture = fixture(None);
    let path = fixture.workspace.path().join("pack.torrent");
    std::fs::write(&path, pack().build()).unwrap();

    let container = fixture.session.open(path.to_str().unwrap()).await.unwrap();

    assert_eq!(container.name(), "pack");
    assert_eq!(container.files().len(), 3);
    assert_eq!(
        container.largest_file().unwrap().path(),
        "Season 1/episode one.mkv"
    );
    assert!(fixture.workspace.path().join("undertow").is_dir());

    fixture.session.close().await;
    fixture.session.close().await;
    assert!(!fixture.workspace.path().join("undertow").exists());
    assert!(fixture.engine.is_closed());
}

#[tokio::test]
async fn test_open_remote_manifest() {
    let mut fixture = fixture(None);
    let base = descriptor_server(pack().build()).await;

    let container = fixture
        .session
        .open(&format!("{base}/pack.torrent"))
        .await
        .unwrap();

    assert_eq!(container.total_bytes(), 7000);
}

#[tokio::test]
async fn test_remote_not_found_is_fetch_error() {
    let mut fixture = fixture(None);
    let base = descriptor_server(pack().build()).await;

    let error = fixture
        .session
        .open(&format!("{base}/missing.torrent"))
        .await
        .unwrap_err();

    assert!(matches!(error, SessionError::Fetch { .. }), "{error}");
}

#[tokio::test]
async fn test_remote_garbage_is_parse_error() {
    let mut fixture = fixture(None);
    let base = descriptor_server(b"<html>not a manifest</html>".to_vec()).await;

    let error = fixture
        .session
        .open(&format!("{base}/pack.torrent"))
        .await
        .unwrap_err();

    assert!(matches!(error, SessionError::Parse { .. }), "{error}");
}

#[tokio::test]
async fn test_missing_local_file_is_read_error() {
    let mut fixture = fixture(None);

    let error = fixture
        .session
        .open("/nonexistent/pack.torrent")
        .await
        .unwrap_err();

    assert!(
        matches!(error, SessionError::ReadManifest { .. }),
        "{error}"
    );
}

#[tokio::test]
async fn test_magnet_waits_for_metadata() {
    let mut fixture = fixture(Some(Duration::from_secs(5)));
    let manifest_bytes = pack().build();
    let magnet = Manifest::from_bytes(&manifest_bytes).unwrap().magnet_uri();
    let engine = Arc::clone(&fixture.engine);

    let publisher = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        engine.publish(&manifest_bytes).unwrap();
    });

    let container = fixture.session.open(&magnet).await.unwrap();
    publisher.await.unwrap();

    assert_eq!(container.name(), "pack");
    assert_eq!(container.files().len(), 3);
}

#[tokio::test]
async fn test_magnet_metadata_timeout() {
    let mut fixture = fixture(Some(Duration::from_millis(100)));
    let magnet = Manifest::from_bytes(&pack().build()).unwrap().magnet_uri();

    let error = fixture.session.open(&magnet).await.unwrap_err();

    assert!(
        matches!(error, SessionError::MetadataTimeout { .. }),
        "{error}"
    );
}

#[tokio::test]
async fn test_empty_manifest_rejected() {
    let mut fixture = fixture(None);
    let path = fixture.workspace.path().join("empty.torrent");
    std::fs::write(&path, ManifestBuilder::multi_file("empty").build()).unwrap();

    let result = fixture.session.open(path.to_str().unwrap()).await;

    assert!(result.is_err());
}
