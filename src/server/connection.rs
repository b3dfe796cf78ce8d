//! Per-listener relay connection
//!
//! Copies queued chunks to one listener while watching the listener's
//! inbound side for disconnection.
//!
//! The loop waits on three sources at once, checked in this order:
//!
//! 1. shutdown token cancelled (chunks already queued are flushed within
//!    `drain_timeout`, then the loop ends)
//! 2. listener socket readable (EOF/reset ends the loop, data is discarded)
//! 3. delivery queue (closed queue ends the loop, a chunk is written out)

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::WriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::config::RelayConfig;
use crate::registry::{ConnectionRegistry, RelayHandle};

/// Why a relay loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Shutdown was requested through the handle
    Shutdown,
    /// Listener closed its side of the connection
    PeerClosed,
    /// Listener reset the connection or an I/O error occurred
    PeerError,
    /// Every producer handle was dropped
    QueueClosed,
}

/// Relay loop for one accepted listener
pub struct RelayConnection {
    /// Connection ID
    id: u64,

    /// Listener socket
    socket: TcpStream,

    /// Remote listener address
    peer_addr: SocketAddr,

    /// Chunks waiting to be written
    queue: mpsc::UnboundedReceiver<Bytes>,

    /// Cancelled on shutdown request
    shutdown: CancellationToken,

    /// Owning registry, used only to deregister on exit
    registry: Weak<ConnectionRegistry>,

    /// Size of the drain buffer for listener input
    read_buffer_size: usize,

    /// Upper bound on flushing queued chunks after shutdown
    drain_timeout: Duration,

    /// Total bytes written to the listener
    bytes_sent: u64,
}

impl RelayConnection {
    /// Create a relay connection and the handle that feeds it.
    ///
    /// The caller registers the handle before spawning [`run`](Self::run).
    pub fn new(
        socket: TcpStream,
        peer_addr: SocketAddr,
        registry: &Arc<ConnectionRegistry>,
        config: &RelayConfig,
    ) -> (Self, RelayHandle) {
        let id = registry.next_id();
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let handle = RelayHandle::new(id, peer_addr, tx, shutdown.clone());
        let connection = Self {
            id,
            socket,
            peer_addr,
            queue: rx,
            shutdown,
            registry: Arc::downgrade(registry),
            read_buffer_size: config.read_buffer_size,
            drain_timeout: config.drain_timeout,
            bytes_sent: 0,
        };

        (connection, handle)
    }

    /// Connection ID
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Run the relay loop until the listener goes away or shutdown is requested.
    ///
    /// Always deregisters from the registry and closes the socket before
    /// returning.
    pub async fn run(mut self) -> CloseReason {
        tracing::info!(peer = %self.peer_addr, "New connection");

        let reason = self.relay_loop().await;
        self.cleanup(reason).await;

        reason
    }

    async fn relay_loop(&mut self) -> CloseReason {
        let Self {
            socket,
            queue,
            shutdown,
            read_buffer_size,
            drain_timeout,
            bytes_sent,
            ..
        } = self;
        let drain_timeout = *drain_timeout;
        let mut buf = vec![0u8; *read_buffer_size];
        let (mut reader, mut writer) = socket.split();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    return drain(queue, &mut writer, bytes_sent, drain_timeout).await;
                }

                result = reader.read(&mut buf) => match result {
                    Ok(0) => {
                        tracing::info!("Disconnected");
                        return CloseReason::PeerClosed;
                    }
                    Ok(n) => {
                        // Listeners have nothing to say; drain so EOF stays visible
                        tracing::trace!(bytes = n, "Discarded listener input");
                    }
                    Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                        tracing::info!("Abruptly disconnected");
                        return CloseReason::PeerError;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Read error");
                        return CloseReason::PeerError;
                    }
                },

                chunk = queue.recv() => {
                    let Some(data) = chunk else {
                        return CloseReason::QueueClosed;
                    };

                    // A chunk in flight gets the drain grace once shutdown is requested
                    let grace_expired = async {
                        shutdown.cancelled().await;
                        sleep(drain_timeout).await;
                    };
                    let written = tokio::select! {
                        result = writer.write_all(&data) => result,
                        _ = grace_expired => {
                            tracing::info!("Listener stalled during shutdown");
                            return CloseReason::Shutdown;
                        }
                    };

                    match written {
                        Ok(()) => *bytes_sent += data.len() as u64,
                        Err(e) if is_disconnect(&e) => {
                            tracing::info!("Abruptly disconnected");
                            return CloseReason::PeerError;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Write error");
                            return CloseReason::PeerError;
                        }
                    }
                }
            }
        }
    }

    async fn cleanup(&mut self, reason: CloseReason) {
        tracing::info!(
            reason = ?reason,
            bytes_sent = self.bytes_sent,
            "Relay stopping"
        );

        if let Some(registry) = self.registry.upgrade() {
            registry.deregister(self.id).await;
        }

        self.queue.close();
        if let Err(e) = self.socket.shutdown().await {
            tracing::trace!(error = %e, "Socket shutdown failed");
        }
    }
}

/// Flush chunks queued before shutdown, bounded by `drain_timeout`.
async fn drain(
    queue: &mut mpsc::UnboundedReceiver<Bytes>,
    writer: &mut WriteHalf<'_>,
    bytes_sent: &mut u64,
    drain_timeout: Duration,
) -> CloseReason {
    let flush = async {
        while let Ok(data) = queue.try_recv() {
            writer.write_all(&data).await?;
            *bytes_sent += data.len() as u64;
        }
        Ok::<_, io::Error>(())
    };

    match timeout(drain_timeout, flush).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!(error = %e, "Drain aborted"),
        Err(_) => tracing::info!("Listener stalled during shutdown"),
    }

    CloseReason::Shutdown
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionAborted
    )
}
