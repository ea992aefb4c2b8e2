//! Mock transfer engine for tests.
//!
//! Container bytes follow a fixed pattern so tests can compute the expected
//! contents of any range without keeping a copy around.

use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll, ready};

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::watch;

use super::{EngineError, EngineReader, ManifestFile, TransferEngine, TransferHandle};

/// Byte stored at `offset` of every mock container.
pub fn pattern_byte(offset: u64) -> u8 {
    (offset % 251) as u8
}

/// Prioritisation hints and seeks applied to one mock reader.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MockReaderLog {
    pub responsive: bool,
    pub readahead: u64,
    pub seeks: Vec<u64>,
}

/// Mock container handle with controllable metadata, availability and failures.
pub struct MockHandle {
    name: String,
    files: Vec<ManifestFile>,
    data: Arc<[u8]>,
    completed: AtomicU64,
    metadata: watch::Sender<bool>,
    available: watch::Sender<u64>,
    fail_reads: Arc<AtomicBool>,
    readers: Mutex<Vec<Arc<Mutex<MockReaderLog>>>>,
    closed: AtomicBool,
}

impl MockHandle {
    /// Creates a handle whose metadata is already available and whose bytes
    /// are all readable.
    pub fn new(name: &str, files: &[(&str, u64)]) -> Self {
        let files = ManifestFile::sequential(files.iter().map(|(path, len)| (*path, *len)))
            .expect("mock layout fits in u64");
        let total: u64 = files.iter().map(|file| file.length).sum();
        let data: Arc<[u8]> = (0..total).map(pattern_byte).collect();

        Self {
            name: name.to_string(),
            files,
            data,
            completed: AtomicU64::new(0),
            metadata: watch::Sender::new(true),
            available: watch::Sender::new(total),
            fail_reads: Arc::new(AtomicBool::new(false)),
            readers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Holds metadata back until `publish_metadata` is called.
    pub fn with_pending_metadata(self) -> Self {
        self.metadata.send_replace(false);
        self
    }

    /// Makes the manifest visible and wakes metadata waiters.
    pub fn publish_metadata(&self) {
        self.metadata.send_replace(true);
    }

    /// Sets the completed byte counter reported to progress polling.
    pub fn set_completed(&self, bytes: u64) {
        self.completed.store(bytes, Ordering::SeqCst);
    }

    /// Only bytes below `limit` can be read; reads past it suspend.
    pub fn set_available(&self, limit: u64) {
        self.available.send_replace(limit);
    }

    /// Makes every subsequent read fail.
    pub fn fail_reads(&self) {
        self.fail_reads.store(true, Ordering::SeqCst);
    }

    /// Expected container bytes in `[start, end)`.
    pub fn container_bytes(&self, start: u64, end: u64) -> Vec<u8> {
        self.data[start as usize..end as usize].to_vec()
    }

    /// Number of readers created so far.
    pub fn readers_opened(&self) -> usize {
        self.readers.lock().len()
    }

    /// Snapshot of the hints applied to the reader opened `index`-th.
    pub fn reader_log(&self, index: usize) -> Option<MockReaderLog> {
        self.readers.lock().get(index).map(|log| log.lock().clone())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn has_metadata(&self) -> bool {
        *self.metadata.borrow()
    }
}

#[async_trait]
impl TransferHandle for MockHandle {
    async fn metadata_ready(&self) {
        let mut ready = self.metadata.subscribe();
        let _ = ready.wait_for(|published| *published).await;
    }

    fn name(&self) -> Option<String> {
        self.has_metadata().then(|| self.name.clone())
    }

    fn completed_bytes(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    fn total_length(&self) -> Option<u64> {
        self.has_metadata().then_some(self.data.len() as u64)
    }

    fn files(&self) -> Vec<ManifestFile> {
        if self.has_metadata() {
            self.files.clone()
        } else {
            Vec::new()
        }
    }

    fn new_reader(&self) -> Box<dyn EngineReader> {
        let log = Arc::new(Mutex::new(MockReaderLog::default()));
        self.readers.lock().push(Arc::clone(&log));

        Box::new(MockReader {
            data: Arc::clone(&self.data),
            position: 0,
            available: self.available.subscribe(),
            fail_reads: Arc::clone(&self.fail_reads),
            log,
            waiting: None,
        })
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct MockReader {
    data: Arc<[u8]>,
    position: u64,
    available: watch::Receiver<u64>,
    fail_reads: Arc<AtomicBool>,
    log: Arc<Mutex<MockReaderLog>>,
    waiting: Option<BoxFuture<'static, bool>>,
}

impl AsyncRead for MockReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        loop {
            if this.fail_reads.load(Ordering::SeqCst) {
                return Poll::Ready(Err(io::Error::other("mock fetch failure")));
            }

            let end = this.data.len() as u64;
            if this.position >= end || buf.remaining() == 0 {
                return Poll::Ready(Ok(()));
            }

            let available = (*this.available.borrow_and_update()).min(end);
            if this.position < available {
                let count = (available - this.position).min(buf.remaining() as u64) as usize;
                let start = this.position as usize;
                buf.put_slice(&this.data[start..start + count]);
                this.position += count as u64;
                this.waiting = None;
                return Poll::Ready(Ok(()));
            }

            let waiting = this.waiting.get_or_insert_with(|| {
                let mut changes = this.available.clone();
                Box::pin(async move { changes.changed().await.is_ok() })
            });
            let sender_alive = ready!(waiting.as_mut().poll(cx));
            this.waiting = None;

            if !sender_alive {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "mock handle dropped",
                )));
            }
        }
    }
}

impl EngineReader for MockReader {
    fn set_responsive(&mut self) {
        self.log.lock().responsive = true;
    }

    fn set_readahead(&mut self, bytes: u64) {
        self.log.lock().readahead = bytes;
    }

    fn seek(&mut self, position: u64) -> io::Result<()> {
        if position > self.data.len() as u64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("seek to {position} past container end"),
            ));
        }
        self.position = position;
        self.waiting = None;
        self.log.lock().seeks.push(position);
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }
}

/// Failure the mock engine should report when a descriptor is added.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    InvalidManifest,
    Rejected,
}

/// Mock engine that hands out a single prepared handle.
pub struct MockEngine {
    handle: Arc<MockHandle>,
    failure: Option<MockFailure>,
    added: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl MockEngine {
    /// Creates an engine that returns `handle` for every accepted descriptor.
    pub fn new(handle: Arc<MockHandle>) -> Self {
        Self {
            handle,
            failure: None,
            added: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Makes every add call fail with `failure`.
    pub fn failing_with(mut self, failure: MockFailure) -> Self {
        self.failure = Some(failure);
        self
    }

    /// Descriptors received so far, tagged by the add method used.
    pub fn added(&self) -> Vec<String> {
        self.added.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn accept(&self, record: String) -> Result<Arc<dyn TransferHandle>, EngineError> {
        self.added.lock().push(record);

        match self.failure {
            Some(MockFailure::InvalidManifest) => Err(EngineError::InvalidManifest {
                reason: "mock manifest is malformed".to_string(),
            }),
            Some(MockFailure::Rejected) => Err(EngineError::Rejected {
                reason: "mock engine refused container".to_string(),
            }),
            None => Ok(Arc::clone(&self.handle) as Arc<dyn TransferHandle>),
        }
    }
}

#[async_trait]
impl TransferEngine for MockEngine {
    async fn add_magnet(&self, uri: &str) -> Result<Arc<dyn TransferHandle>, EngineError> {
        self.accept(format!("magnet:{uri}"))
    }

    async fn add_manifest_bytes(
        &self,
        bytes: &[u8],
    ) -> Result<Arc<dyn TransferHandle>, EngineError> {
        if bytes.is_empty() {
            return Err(EngineError::InvalidManifest {
                reason: "empty manifest".to_string(),
            });
        }
        self.accept(format!("bytes:{}", bytes.len()))
    }

    async fn add_manifest_file(
        &self,
        path: &Path,
    ) -> Result<Arc<dyn TransferHandle>, EngineError> {
        let bytes = tokio::fs::read(path).await?;
        self.add_manifest_bytes(&bytes).await
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
