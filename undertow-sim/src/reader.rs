//! Readers over a simulated container
//!
//! A read blocks until the piece under the cursor is complete, then pulls
//! bytes from the content source up to the end of that piece. Pending
//! fetches and waits live in the reader so a dropped read future loses
//! nothing.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::watch;
use undertow_core::EngineReader;

use crate::swarm::Swarm;

/// Reader handed out by a simulated handle once metadata is known.
pub struct SimulatedReader {
    swarm: Arc<Swarm>,
    id: u64,
    position: u64,
    progress: watch::Receiver<u32>,
    fetch: Option<BoxFuture<'static, io::Result<Bytes>>>,
    waiting: Option<BoxFuture<'static, bool>>,
}

impl SimulatedReader {
    pub(crate) fn new(swarm: Arc<Swarm>) -> Self {
        let id = swarm.register_reader();
        let progress = swarm.subscribe();
        Self {
            swarm,
            id,
            position: 0,
            progress,
            fetch: None,
            waiting: None,
        }
    }

    fn publish_position(&self) {
        let position = self.position;
        self.swarm
            .update_interest(self.id, |interest| interest.position = position);
    }
}

impl AsyncRead for SimulatedReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        loop {
            if this.swarm.is_closed() {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "transfer closed",
                )));
            }

            let total = this.swarm.manifest().total_length;
            if this.position >= total || buf.remaining() == 0 {
                return Poll::Ready(Ok(()));
            }

            if let Some(fetch) = this.fetch.as_mut() {
                let result = ready!(fetch.as_mut().poll(cx));
                this.fetch = None;

                let bytes = result?;
                if bytes.is_empty() {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("no content at byte {}", this.position),
                    )));
                }

                let count = bytes.len().min(buf.remaining());
                buf.put_slice(&bytes[..count]);
                this.position += count as u64;
                this.publish_position();
                return Poll::Ready(Ok(()));
            }

            this.progress.borrow_and_update();
            let manifest = this.swarm.manifest();
            let piece = manifest.piece_at(this.position);

            if this.swarm.is_piece_complete(piece) {
                let (_, piece_end) = manifest.piece_range(piece);
                let len = (piece_end - this.position).min(buf.remaining() as u64) as usize;
                let content = Arc::clone(this.swarm.content());
                let offset = this.position;

                this.waiting = None;
                this.fetch = Some(Box::pin(
                    async move { content.read_range(offset, len).await },
                ));
                continue;
            }

            let waiting = this.waiting.get_or_insert_with(|| {
                let mut changes = this.progress.clone();
                Box::pin(async move { changes.changed().await.is_ok() })
            });
            let sender_alive = ready!(waiting.as_mut().poll(cx));
            this.waiting = None;

            if !sender_alive {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "swarm dropped",
                )));
            }
        }
    }
}

impl EngineReader for SimulatedReader {
    fn set_responsive(&mut self) {
        self.swarm
            .update_interest(self.id, |interest| interest.responsive = true);
    }

    fn set_readahead(&mut self, bytes: u64) {
        self.swarm
            .update_interest(self.id, |interest| interest.readahead = bytes);
    }

    fn seek(&mut self, position: u64) -> io::Result<()> {
        let total = self.swarm.manifest().total_length;
        if position > total {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("seek to {position} past container end {total}"),
            ));
        }

        self.position = position;
        self.fetch = None;
        self.waiting = None;
        self.publish_position();
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }
}

impl Drop for SimulatedReader {
    fn drop(&mut self) {
        self.swarm.remove_reader(self.id);
    }
}

/// Stand-in returned when a reader is requested before metadata arrives.
pub(crate) struct DetachedReader;

impl AsyncRead for DetachedReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::new(
            io::ErrorKind::NotConnected,
            "metadata not available",
        )))
    }
}

impl EngineReader for DetachedReader {
    fn set_responsive(&mut self) {}

    fn set_readahead(&mut self, _bytes: u64) {}

    fn seek(&mut self, _position: u64) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::NotConnected,
            "metadata not available",
        ))
    }

    fn position(&self) -> u64 {
        0
    }
}
