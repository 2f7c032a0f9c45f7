//! DuplexChannel - the send/receive pump of an established link
//!
//! A DuplexChannel provides:
//! - One background read loop per session, dispatching every read to the
//!   receive listener through the callback executor
//! - Serialized writes: each `send` is written whole and flushed while
//!   holding the write lock, so concurrent senders never interleave
//! - Reuse across sessions: `stop` returns the channel to idle and
//!   `start` may then bind a fresh stream
//!
//! Only one session runs at a time. `start` on a running channel is refused.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::common::Stream;
use crate::executor::CallbackExecutor;
use crate::listener::{ListenerSlot, ReceiveListener};
use crate::metrics::{BYTES_RECEIVED, BYTES_SENT};

/// Default read buffer size (1KB), one receive callback per filled read
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

/// Write side of one running session
struct SessionIo {
    writer: tokio::sync::Mutex<WriteHalf<Stream>>,
    closed: AtomicBool,
    notify: Notify,
}

impl SessionIo {
    fn new(writer: WriteHalf<Stream>) -> Self {
        Self {
            writer: tokio::sync::Mutex::new(writer),
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Mark the session closed and wake every pending writer
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Wait until the session is closed
    async fn closed(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Registered before the flag check so a concurrent close is not missed
        notified.as_mut().enable();
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        notified.await;
    }
}

struct Running {
    generation: u64,
    io: Arc<SessionIo>,
    reader: JoinHandle<()>,
}

struct ChannelInner {
    executor: Arc<dyn CallbackExecutor>,
    read_buffer_size: usize,
    receiver: ListenerSlot<dyn ReceiveListener>,
    running: Mutex<Option<Running>>,
    generation: AtomicU64,
    /// Session whose reads may still reach the listener, 0 for none
    delivering: AtomicU64,
}

impl ChannelInner {
    fn current_io(&self) -> Option<Arc<SessionIo>> {
        self.running.lock().as_ref().map(|r| Arc::clone(&r.io))
    }

    /// Queue one read for the receive listener. The generation check runs on
    /// the executor, so reads queued before `stop` never reach a listener.
    fn deliver(self: &Arc<Self>, generation: u64, data: Bytes) {
        let inner = Arc::clone(self);
        self.executor.execute(Box::new(move || {
            if inner.delivering.load(Ordering::SeqCst) != generation {
                trace!("Channel: dropping {} bytes from stale session", data.len());
                return;
            }
            if let Some(listener) = inner.receiver.get() {
                let text = String::from_utf8_lossy(&data);
                listener.on_received(&text, &data);
            }
        }));
    }
}

/// Resolves when a session's read loop ends on its own (EOF or read error).
pub struct ChannelClosed {
    rx: oneshot::Receiver<()>,
}

impl ChannelClosed {
    /// Returns `true` if the stream closed under the read loop,
    /// `false` if the session was stopped locally.
    pub async fn wait(self) -> bool {
        self.rx.await.is_ok()
    }
}

/// Send/receive pump bound to at most one stream at a time
pub struct DuplexChannel {
    inner: Arc<ChannelInner>,
}

impl DuplexChannel {
    pub fn new(executor: Arc<dyn CallbackExecutor>) -> Self {
        Self::with_read_buffer_size(executor, DEFAULT_READ_BUFFER_SIZE)
    }

    pub fn with_read_buffer_size(executor: Arc<dyn CallbackExecutor>, read_buffer_size: usize) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                executor,
                read_buffer_size: read_buffer_size.max(1),
                receiver: ListenerSlot::new(),
                running: Mutex::new(None),
                generation: AtomicU64::new(0),
                delivering: AtomicU64::new(0),
            }),
        }
    }

    /// Bind `stream` and launch the read loop, replacing any receive
    /// listener left over from a previous session with `listener`.
    ///
    /// Returns `None` without touching `stream`'s peer if a session is
    /// already running; the rejected stream is dropped.
    pub fn start(
        &self,
        stream: Stream,
        listener: Option<Arc<dyn ReceiveListener>>,
    ) -> Option<ChannelClosed> {
        let mut running = self.inner.running.lock();
        if let Some(current) = running.as_ref() {
            warn!(
                "Channel: start refused, session {} still running",
                current.generation
            );
            return None;
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.delivering.store(generation, Ordering::SeqCst);
        match listener {
            Some(listener) => {
                self.inner.receiver.set(listener);
            }
            None => {
                self.inner.receiver.clear();
            }
        }

        let (reader, writer) = tokio::io::split(stream);
        let (closed_tx, closed_rx) = oneshot::channel();
        let reader = tokio::spawn(read_loop(
            Arc::clone(&self.inner),
            reader,
            generation,
            closed_tx,
        ));

        *running = Some(Running {
            generation,
            io: Arc::new(SessionIo::new(writer)),
            reader,
        });

        debug!("Channel: session {} started", generation);
        Some(ChannelClosed { rx: closed_rx })
    }

    /// Detach the receive listener, stop the read loop and release both
    /// halves of the stream. A `send` blocked on a full stream returns
    /// `false` instead of finishing its write. Idempotent.
    pub fn stop(&self) {
        let running = self.inner.running.lock().take();
        self.inner.delivering.store(0, Ordering::SeqCst);
        self.inner.receiver.clear();

        if let Some(running) = running {
            running.io.close();
            running.reader.abort();
            debug!("Channel: session {} stopped", running.generation);
        }
    }

    /// Return to idle after the peer closed the stream. Unlike [`stop`],
    /// reads already queued for the listener are still delivered.
    ///
    /// [`stop`]: DuplexChannel::stop
    pub fn release(&self) {
        if let Some(running) = self.inner.running.lock().take() {
            running.io.close();
            running.reader.abort();
            debug!("Channel: session {} released", running.generation);
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.lock().is_some()
    }

    /// Replace the receive listener. Last writer wins.
    pub fn set_receive_listener(&self, listener: Arc<dyn ReceiveListener>) {
        self.inner.receiver.set(listener);
    }

    /// Write `data` whole. Returns `false` if idle or on any write error;
    /// a failed write does not stop the channel.
    pub async fn send(&self, data: &[u8]) -> bool {
        let io = match self.inner.current_io() {
            Some(io) => io,
            None => {
                debug!("Channel: send on idle channel");
                return false;
            }
        };

        let result = tokio::select! {
            biased;
            _ = io.closed() => {
                debug!("Channel: send of {} bytes cut short by stop", data.len());
                return false;
            }
            result = async {
                let mut writer = io.writer.lock().await;
                writer.write_all(data).await?;
                writer.flush().await
            } => result,
        };

        match result {
            Ok(()) => {
                BYTES_SENT.inc_by(data.len() as u64);
                trace!("Channel: sent {} bytes", data.len());
                true
            }
            Err(e) => {
                warn!("Channel: write failed: {}", e);
                false
            }
        }
    }

    /// Write the UTF-8 bytes of `text`
    pub async fn send_text(&self, text: &str) -> bool {
        self.send(text.as_bytes()).await
    }

    /// Write `len` bytes of `data` starting at `offset`. Out-of-range
    /// requests write nothing and return `false`.
    pub async fn send_range(&self, data: &[u8], offset: usize, len: usize) -> bool {
        match offset.checked_add(len).and_then(|end| data.get(offset..end)) {
            Some(slice) => self.send(slice).await,
            None => {
                warn!(
                    "Channel: range {}+{} out of bounds for {} bytes",
                    offset,
                    len,
                    data.len()
                );
                false
            }
        }
    }
}

impl Drop for DuplexChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn read_loop(
    inner: Arc<ChannelInner>,
    mut reader: ReadHalf<Stream>,
    generation: u64,
    closed_tx: oneshot::Sender<()>,
) {
    let mut buf = BytesMut::with_capacity(inner.read_buffer_size);
    buf.resize(inner.read_buffer_size, 0);

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                debug!("Channel: session {} reached end of stream", generation);
                break;
            }
            Ok(n) => n,
            Err(e) => {
                debug!("Channel: session {} read failed: {}", generation, e);
                break;
            }
        };

        BYTES_RECEIVED.inc_by(n as u64);
        inner.deliver(generation, Bytes::copy_from_slice(&buf[..n]));
    }

    let _ = closed_tx.send(());
}
