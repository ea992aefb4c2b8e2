//! In-process transfer engine backed by simulated swarms
//!
//! Manifests added as bytes or files are decoded immediately. Magnet links
//! resolve once a manifest with the same info hash has been published to
//! the engine's catalog, which lets tests and demos exercise the metadata
//! wait.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use undertow_core::{EngineError, EngineReader, ManifestFile, TransferEngine, TransferHandle};

use crate::content::ContentMode;
use crate::manifest::{InfoHash, MagnetLink, Manifest};
use crate::reader::{DetachedReader, SimulatedReader};
use crate::swarm::{Swarm, spawn_driver};

/// Default simulated download rate, in bytes per second.
pub const DEFAULT_RATE: u64 = 4 * 1024 * 1024;

/// Behavior of every swarm an engine creates.
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    /// Bytes completed per second; `None` completes pieces only on request.
    pub rate: Option<u64>,
    /// Driver tick interval.
    pub tick: Duration,
    pub content: ContentMode,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            rate: Some(DEFAULT_RATE),
            tick: Duration::from_millis(100),
            content: ContentMode::default(),
        }
    }
}

impl SwarmConfig {
    /// Manual completion with synthetic content, for tests.
    pub fn manual() -> Self {
        Self {
            rate: None,
            ..Self::default()
        }
    }
}

/// One container inside the simulated engine.
pub struct SimulatedHandle {
    info_hash: InfoHash,
    display_name: Option<String>,
    config: SwarmConfig,
    swarm: watch::Sender<Option<Arc<Swarm>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl SimulatedHandle {
    fn new(info_hash: InfoHash, display_name: Option<String>, config: SwarmConfig) -> Self {
        Self {
            info_hash,
            display_name,
            config,
            swarm: watch::Sender::new(None),
            tasks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    /// Swarm state, once metadata is known.
    pub fn swarm(&self) -> Option<Arc<Swarm>> {
        self.swarm.borrow().clone()
    }

    /// Completes one piece. Returns false before metadata or if the piece
    /// was already complete.
    pub fn complete_piece(&self, index: u32) -> bool {
        self.swarm()
            .is_some_and(|swarm| swarm.complete_piece(index))
    }

    /// Completes every piece.
    pub fn complete_all(&self) {
        if let Some(swarm) = self.swarm() {
            swarm.complete_all();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn activate(&self, manifest: Arc<Manifest>) {
        if self.is_closed() {
            return;
        }

        let mut created = None;
        self.swarm.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            let content = self.config.content.source_for(&manifest);
            let swarm = Arc::new(Swarm::new(Arc::clone(&manifest), content));
            *slot = Some(Arc::clone(&swarm));
            created = Some(swarm);
            true
        });

        let Some(swarm) = created else {
            return;
        };
        tracing::debug!(
            "Metadata ready for {} ({} pieces)",
            manifest.name,
            manifest.piece_count()
        );

        if let Some(rate) = self.config.rate {
            let driver = spawn_driver(swarm, rate, self.config.tick);
            self.tasks.lock().push(driver);
        }
    }

    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        if let Some(swarm) = self.swarm() {
            swarm.close();
        }
        tracing::debug!("Closed transfer {}", self.info_hash);
    }
}

#[async_trait]
impl TransferHandle for SimulatedHandle {
    async fn metadata_ready(&self) {
        let mut changes = self.swarm.subscribe();
        // The sender lives in self, so the wait only ends on metadata.
        let _ = changes.wait_for(Option::is_some).await;
    }

    fn name(&self) -> Option<String> {
        match self.swarm() {
            Some(swarm) => Some(swarm.manifest().name.clone()),
            None => self.display_name.clone(),
        }
    }

    fn completed_bytes(&self) -> u64 {
        self.swarm().map_or(0, |swarm| swarm.completed_bytes())
    }

    fn total_length(&self) -> Option<u64> {
        self.swarm().map(|swarm| swarm.manifest().total_length)
    }

    fn files(&self) -> Vec<ManifestFile> {
        self.swarm()
            .map(|swarm| swarm.manifest().files.clone())
            .unwrap_or_default()
    }

    fn new_reader(&self) -> Box<dyn EngineReader> {
        match self.swarm() {
            Some(swarm) => Box::new(SimulatedReader::new(swarm)),
            None => Box::new(DetachedReader),
        }
    }

    async fn close(&self) {
        self.shutdown();
    }
}

type Catalog = HashMap<InfoHash, Arc<Manifest>>;

/// Engine whose containers download from simulated swarms.
pub struct SimulatedEngine {
    config: SwarmConfig,
    catalog: watch::Sender<Catalog>,
    handles: Mutex<HashMap<InfoHash, Arc<SimulatedHandle>>>,
    closed: AtomicBool,
}

impl SimulatedEngine {
    pub fn new(config: SwarmConfig) -> Self {
        Self {
            config,
            catalog: watch::Sender::new(HashMap::new()),
            handles: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Makes a manifest resolvable by magnet link.
    ///
    /// # Errors
    /// - `EngineError::InvalidManifest` - Bytes do not decode
    pub fn publish(&self, manifest_bytes: &[u8]) -> Result<InfoHash, EngineError> {
        let manifest = Arc::new(Manifest::from_bytes(manifest_bytes)?);
        Ok(self.publish_manifest(manifest))
    }

    fn publish_manifest(&self, manifest: Arc<Manifest>) -> InfoHash {
        let info_hash = manifest.info_hash;
        self.catalog.send_modify(|catalog| {
            catalog.insert(info_hash, manifest);
        });
        info_hash
    }

    /// Adds a magnet link. The handle activates as soon as the catalog holds
    /// a manifest with the link's info hash.
    ///
    /// # Errors
    /// - `EngineError::InvalidManifest` - Malformed magnet link
    /// - `EngineError::Closed` - Engine already closed
    pub async fn add_magnet_handle(&self, uri: &str) -> Result<Arc<SimulatedHandle>, EngineError> {
        self.ensure_open()?;
        let link = MagnetLink::parse(uri)?;

        let (handle, created) = self.handle_for(link.info_hash, link.display_name);
        if !created {
            return Ok(handle);
        }

        let info_hash = link.info_hash;
        let known = self.catalog.borrow().get(&info_hash).cloned();
        match known {
            Some(manifest) => handle.activate(manifest),
            None => {
                tracing::debug!("Waiting for metadata of {}", info_hash);
                let mut catalog = self.catalog.subscribe();
                let waiter = Arc::clone(&handle);
                let task = tokio::spawn(async move {
                    let manifest = catalog
                        .wait_for(|catalog| catalog.contains_key(&info_hash))
                        .await
                        .ok()
                        .and_then(|catalog| catalog.get(&info_hash).cloned());
                    if let Some(manifest) = manifest {
                        waiter.activate(manifest);
                    }
                });
                handle.tasks.lock().push(task);
            }
        }

        Ok(handle)
    }

    /// Adds a manifest from its bencoded bytes.
    ///
    /// # Errors
    /// - `EngineError::InvalidManifest` - Bytes do not decode
    /// - `EngineError::Closed` - Engine already closed
    pub async fn add_manifest_handle(
        &self,
        manifest_bytes: &[u8],
    ) -> Result<Arc<SimulatedHandle>, EngineError> {
        self.ensure_open()?;
        let manifest = Arc::new(Manifest::from_bytes(manifest_bytes)?);
        let info_hash = self.publish_manifest(Arc::clone(&manifest));

        let (handle, _) = self.handle_for(info_hash, Some(manifest.name.clone()));
        handle.activate(manifest);
        Ok(handle)
    }

    /// Handle previously added for `info_hash`.
    pub fn handle(&self, info_hash: &InfoHash) -> Option<Arc<SimulatedHandle>> {
        self.handles.lock().get(info_hash).cloned()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.is_closed() {
            return Err(EngineError::Closed);
        }
        Ok(())
    }

    fn handle_for(
        &self,
        info_hash: InfoHash,
        display_name: Option<String>,
    ) -> (Arc<SimulatedHandle>, bool) {
        let mut handles = self.handles.lock();
        if let Some(existing) = handles.get(&info_hash) {
            return (Arc::clone(existing), false);
        }

        let handle = Arc::new(SimulatedHandle::new(
            info_hash,
            display_name,
            self.config.clone(),
        ));
        handles.insert(info_hash, Arc::clone(&handle));
        (handle, true)
    }
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new(SwarmConfig::default())
    }
}

#[async_trait]
impl TransferEngine for SimulatedEngine {
    async fn add_magnet(&self, uri: &str) -> Result<Arc<dyn TransferHandle>, EngineError> {
        let handle: Arc<dyn TransferHandle> = self.add_magnet_handle(uri).await?;
        Ok(handle)
    }

    async fn add_manifest_bytes(
        &self,
        manifest_bytes: &[u8],
    ) -> Result<Arc<dyn TransferHandle>, EngineError> {
        let handle: Arc<dyn TransferHandle> = self.add_manifest_handle(manifest_bytes).await?;
        Ok(handle)
    }

    async fn add_manifest_file(&self, path: &Path) -> Result<Arc<dyn TransferHandle>, EngineError> {
        let manifest_bytes = tokio::fs::read(path).await?;
        self.add_manifest_bytes(&manifest_bytes).await
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let handles: Vec<_> = self.handles.lock().values().cloned().collect();
        for handle in handles {
            handle.shutdown();
        }
        tracing::debug!("Simulated engine closed");
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::content::SyntheticContent;
    use crate::manifest::ManifestBuilder;

    fn movie() -> Vec<u8> {
        ManifestBuilder::single_file("movie.mkv", 1000)
            .piece_length(100)
            .build()
    }

    #[tokio::test]
    async fn test_manifest_handle_is_ready_immediately() {
        let engine = SimulatedEngine::new(SwarmConfig::manual());

        let handle = engine.add_manifest_bytes(&movie()).await.unwrap();
        handle.metadata_ready().await;

        assert_eq!(handle.name().as_deref(), Some("movie.mkv"));
        assert_eq!(handle.total_length(), Some(1000));
        assert_eq!(handle.files().len(), 1);
        assert_eq!(handle.completed_bytes(), 0);
    }

    #[tokio::test]
    async fn test_invalid_manifest_rejected() {
        let engine = SimulatedEngine::default();

        let result = engine.add_manifest_bytes(b"not bencode").await;

        assert!(matches!(result, Err(EngineError::InvalidManifest { .. })));
    }

    #[tokio::test]
    async fn test_magnet_waits_for_catalog() {
        let engine = SimulatedEngine::new(SwarmConfig::manual());
        let manifest = Manifest::from_bytes(&movie()).unwrap();

        let handle = engine.add_magnet(&manifest.magnet_uri()).await.unwrap();
        assert_eq!(handle.total_length(), None);
        assert_eq!(handle.name().as_deref(), Some("movie.mkv"));

        engine.publish(&movie()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle.metadata_ready())
            .await
            .unwrap();

        assert_eq!(handle.total_length(), Some(1000));
    }

    #[tokio::test]
    async fn test_duplicate_add_returns_same_handle() {
        let engine = SimulatedEngine::new(SwarmConfig::manual());

        let first = engine.add_manifest_handle(&movie()).await.unwrap();
        let second = engine.add_manifest_handle(&movie()).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_reader_sees_completed_pieces() {
        let engine = SimulatedEngine::new(SwarmConfig::manual());
        let handle = engine.add_manifest_handle(&movie()).await.unwrap();
        handle.complete_all();

        let mut reader = handle.new_reader();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();

        let manifest = Manifest::from_bytes(&movie()).unwrap();
        let expected = SyntheticContent::new(0, &manifest).generate(0, 1000);
        assert_eq!(out, expected.to_vec());
        assert_eq!(handle.completed_bytes(), 1000);
    }

    #[tokio::test]
    async fn test_driver_downloads_at_rate() {
        let engine = SimulatedEngine::new(SwarmConfig {
            rate: Some(100_000),
            tick: Duration::from_millis(10),
            content: ContentMode::default(),
        });
        let handle = engine.add_manifest_handle(&movie()).await.unwrap();

        let mut reader = handle.new_reader();
        let mut out = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), reader.read_to_end(&mut out))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(out.len(), 1000);
    }

    #[tokio::test]
    async fn test_reader_before_metadata_fails() {
        let engine = SimulatedEngine::new(SwarmConfig::manual());
        let manifest = Manifest::from_bytes(&movie()).unwrap();
        let handle = engine.add_magnet(&manifest.magnet_uri()).await.unwrap();

        let mut reader = handle.new_reader();
        let mut buffer = [0u8; 4];

        assert!(reader.read(&mut buffer).await.is_err());
    }

    #[tokio::test]
    async fn test_close_rejects_new_transfers() {
        let engine = SimulatedEngine::new(SwarmConfig::manual());
        let handle = engine.add_manifest_handle(&movie()).await.unwrap();

        engine.close().await;
        engine.close().await;

        assert!(handle.is_closed());
        assert!(matches!(
            engine.add_manifest_bytes(&movie()).await,
            Err(EngineError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_manifest_file_missing() {
        let engine = SimulatedEngine::default();

        let result = engine
            .add_manifest_file(Path::new("/nonexistent/movie.torrent"))
            .await;

        assert!(matches!(result, Err(EngineError::Io(_))));
    }
}
