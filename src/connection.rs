//! The connection worker.
//!
//! One `ConnectionWorker` is spawned per accepted client. It owns the
//! transport and an elastic receive buffer exclusively; the only state it
//! shares with the rest of the process is the log store (for appends and
//! stream-backs) and its own completion flag in the registry.

use crate::log_store::LogStore;
use crate::shutdown::Shutdown;
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tracing::{debug, error, info};

/// Bytes read from the transport per `read` call. An implementation
/// parameter only: records may be, and routinely are, larger than this.
const CHUNK_SIZE: usize = 1024;

/// A transport a worker can serve: readable, writable, and safe to move into
/// a spawned task.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// Per-connection state: the transport, the peer address (diagnostics only),
/// and the receive buffer.
pub struct ConnectionWorker<S> {
    stream: S,
    peer: SocketAddr,
    buffer: BytesMut,
    log: LogStore,
    shutdown: Shutdown,
    completed: Arc<AtomicBool>,
}

impl<S: Transport> ConnectionWorker<S> {
    pub fn new(
        stream: S,
        peer: SocketAddr,
        log: LogStore,
        shutdown: Shutdown,
        completed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            stream,
            peer,
            buffer: BytesMut::with_capacity(CHUNK_SIZE),
            log,
            shutdown,
            completed,
        }
    }

    /// Runs the worker to completion: read, split on newline, append each
    /// record and stream the log back, until end-of-stream, a fatal I/O
    /// error, or shutdown. Sets the completion flag as the very last action.
    pub async fn run(mut self) {
        info!(peer = %self.peer, "Accepted connection from {}", self.peer.ip());

        loop {
            let read = tokio::select! {
                res = self.stream.read_buf(&mut self.buffer) => res,
                _ = self.shutdown.notified() => {
                    debug!(peer = %self.peer, "shutdown requested, ending connection");
                    break;
                }
            };

            let n = match read {
                Ok(n) => n,
                Err(err) => {
                    error!(peer = %self.peer, %err, "failed to receive data");
                    break;
                }
            };

            if n == 0 {
                // Peer closed. Any bytes left in `self.buffer` are a
                // trailing record with no newline: discarded, never
                // appended.
                break;
            }

            if self.drain_complete_records().await.is_err() {
                break;
            }

            if self.shutdown.is_set() {
                break;
            }
        }

        info!(peer = %self.peer, "Closed connection from {}", self.peer.ip());
        self.completed.store(true, Ordering::Release);
    }

    /// Appends and streams back every complete (newline-terminated) record
    /// currently in the buffer, in arrival order. Returns `Err(())` if a
    /// stream-back failed, which is per-connection-fatal and must end the
    /// run loop without attempting to process any further buffered records.
    async fn drain_complete_records(&mut self) -> std::result::Result<(), ()> {
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let record = self.buffer.split_to(pos + 1);

            if let Err(err) = self.log.append(&record).await {
                error!(peer = %self.peer, %err, "failed to append record to log");
                // A lost append is not fatal to the connection: proceed to
                // stream back, which will simply reflect the loss.
            }

            if let Err(err) = self.log.stream_to(&mut self.stream).await {
                error!(peer = %self.peer, %err, "failed to stream log back to client");
                return Err(());
            }
        }

        Ok(())
    }
}
