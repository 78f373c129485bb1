//! Worker threads driving socket I/O for one connection.
//!
//! A [`Connection`] owns two threads: a writer that drains queued frames onto
//! the socket and a reader that watches for the peer closing or resetting the
//! stream. Queued bytes are accounted in a [`WriteBuffer`] which asks the
//! listener to pause writers above the high water mark and to resume them
//! once the backlog falls to the low water mark.

use std::{
    io::{self, ErrorKind, Read, Write},
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{debug, warn};
use tokio::sync::watch;

use crate::error::SenderError;

use super::stream::RawStream;

/// Callbacks raised by a connection's worker threads.
///
/// Every callback carries the id of the connection raising it so the
/// receiver can ignore events from connections it has already replaced.
pub trait TransportListener: Send + Sync {
    /// The peer closed or reset the stream. `err` is `None` on a clean EOF.
    fn connection_lost(&self, id: u64, err: Option<io::Error>);
    /// Queued bytes exceeded the high water mark.
    fn pause_writing(&self, id: u64);
    /// Queued bytes fell to the low water mark.
    fn resume_writing(&self, id: u64);
}

/// Byte thresholds for asserting and releasing backpressure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteLimits {
    pub high: usize,
    pub low: usize,
}

/// Upper bound on the low water mark derived from a high water mark.
pub const MAX_DERIVED_LOW_WATER: usize = 16 * 1024;

impl WriteLimits {
    /// Limits with the low water mark derived as `min(16 KiB, high)`.
    pub fn from_high(high: usize) -> Self {
        Self {
            high,
            low: high.min(MAX_DERIVED_LOW_WATER),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct BufferState {
    size: usize,
    paused: bool,
}

/// Accounts for bytes accepted by [`Connection::write`] but not yet written.
pub(crate) struct WriteBuffer {
    id: u64,
    limits: WriteLimits,
    state: watch::Sender<BufferState>,
    listener: Weak<dyn TransportListener>,
}

impl WriteBuffer {
    pub(crate) fn new(id: u64, limits: WriteLimits, listener: Weak<dyn TransportListener>) -> Self {
        let (state, _) = watch::channel(BufferState::default());
        Self {
            id,
            limits,
            state,
            listener,
        }
    }

    pub(crate) fn reserve(&self, len: usize) {
        self.state.send_modify(|state| {
            state.size = state.size.saturating_add(len);
            if !state.paused && state.size > self.limits.high {
                state.paused = true;
                if let Some(listener) = self.listener.upgrade() {
                    listener.pause_writing(self.id);
                }
            }
        });
    }

    pub(crate) fn release(&self, len: usize) {
        self.state.send_modify(|state| {
            state.size = state.size.saturating_sub(len);
            if state.paused && state.size <= self.limits.low {
                state.paused = false;
                if let Some(listener) = self.listener.upgrade() {
                    listener.resume_writing(self.id);
                }
            }
        });
    }

    fn clear(&self) {
        self.release(usize::MAX);
    }

    pub(crate) fn size(&self) -> usize {
        self.state.borrow().size
    }

    async fn drained(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| state.size == 0).await;
    }
}

struct WorkerContext {
    id: u64,
    closing: Arc<AtomicBool>,
    listener: Weak<dyn TransportListener>,
}

impl WorkerContext {
    fn report_lost(&self, err: Option<io::Error>) {
        if self.closing.load(Ordering::Acquire) {
            return;
        }
        if let Some(listener) = self.listener.upgrade() {
            listener.connection_lost(self.id, err);
        }
    }
}

/// A live socket plus the threads that service it.
pub struct Connection {
    id: u64,
    tx: Sender<Vec<u8>>,
    buffer: Arc<WriteBuffer>,
    control: RawStream,
    closing: Arc<AtomicBool>,
}

impl Connection {
    /// Take ownership of `stream` and start its writer and reader threads.
    pub fn open(
        id: u64,
        stream: RawStream,
        limits: WriteLimits,
        listener: Weak<dyn TransportListener>,
    ) -> io::Result<Self> {
        let reader = stream.try_clone()?;
        let control = stream.try_clone()?;
        let closing = Arc::new(AtomicBool::new(false));
        let buffer = Arc::new(WriteBuffer::new(id, limits, listener.clone()));
        let (tx, rx) = unbounded();

        let writer_ctx = WorkerContext {
            id,
            closing: Arc::clone(&closing),
            listener: listener.clone(),
        };
        let writer_buffer = Arc::clone(&buffer);
        thread::Builder::new()
            .name(format!("femtofluent-writer-{id}"))
            .spawn(move || writer_loop(stream, rx, writer_buffer, writer_ctx))?;

        let reader_ctx = WorkerContext {
            id,
            closing: Arc::clone(&closing),
            listener,
        };
        if let Err(err) = thread::Builder::new()
            .name(format!("femtofluent-reader-{id}"))
            .spawn(move || reader_loop(reader, reader_ctx))
        {
            closing.store(true, Ordering::Release);
            let _ = control.shutdown();
            return Err(err);
        }

        Ok(Self {
            id,
            tx,
            buffer,
            control,
            closing,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queue `bytes` for the writer thread. Success means the bytes were
    /// accepted, not that the peer received them.
    pub fn write(&self, bytes: &[u8]) -> Result<(), SenderError> {
        if self.closing.load(Ordering::Acquire) {
            return Err(SenderError::NotConnected);
        }
        let len = bytes.len();
        self.buffer.reserve(len);
        self.tx.send(bytes.to_vec()).map_err(|_| {
            self.buffer.release(len);
            SenderError::ConnectionLost
        })
    }

    /// Bytes accepted but not yet written to the socket.
    pub fn buffered(&self) -> usize {
        self.buffer.size()
    }

    /// Resolve once every queued byte has been written or discarded.
    pub async fn drain(&self) {
        self.buffer.drained().await;
    }

    /// Stop both threads without reporting the closure as a loss.
    pub fn shutdown(&self) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(err) = self.control.shutdown()
            && err.kind() != ErrorKind::NotConnected
        {
            debug!("FluentSender connection {} shutdown failed: {err}", self.id);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("buffered", &self.buffered())
            .field("closing", &self.closing.load(Ordering::Relaxed))
            .finish()
    }
}

fn writer_loop(
    mut stream: RawStream,
    rx: Receiver<Vec<u8>>,
    buffer: Arc<WriteBuffer>,
    ctx: WorkerContext,
) {
    while let Ok(frame) = rx.recv() {
        if let Err(err) = stream.write_all(&frame).and_then(|()| stream.flush()) {
            buffer.clear();
            if !ctx.closing.load(Ordering::Acquire) {
                warn!("FluentSender write failed on connection {}: {err}", ctx.id);
            }
            ctx.report_lost(Some(err));
            return;
        }
        buffer.release(frame.len());
    }
}

fn reader_loop(mut stream: RawStream, ctx: WorkerContext) {
    let mut scratch = [0u8; 1024];
    loop {
        match stream.read(&mut scratch) {
            Ok(0) => {
                debug!("FluentSender connection {} closed by peer", ctx.id);
                ctx.report_lost(None);
                return;
            }
            // The forward protocol without acks sends nothing back.
            Ok(_) => continue,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                ctx.report_lost(Some(err));
                return;
            }
        }
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
