//! Upstream reader
//!
//! Holds the single connection to the publisher and broadcasts everything it
//! reads to the listeners of its acceptor.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::registry::ConnectionRegistry;
use crate::server::{AcceptorHandle, ListenerAcceptor};

/// Why the stream loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// Shutdown was requested through the handle
    Shutdown,
    /// Publisher closed the connection
    SourceClosed,
    /// Publisher reset the connection or a read failed
    SourceError,
}

/// Live upstream session: publisher socket plus the acceptor it owns
pub struct UpstreamReader {
    socket: TcpStream,
    publisher_addr: SocketAddr,
    acceptor: AcceptorHandle,
    shutdown: CancellationToken,
    read_buffer_size: usize,
}

impl UpstreamReader {
    /// Connect to the publisher, retrying until it answers, then start accepting listeners.
    ///
    /// Refusals and timeouts are retried after `retry_backoff` with no cap.
    /// Returns [`Error::Interrupted`] once `interrupt` is cancelled, and an
    /// I/O error if the listen socket cannot be bound.
    pub async fn connect(config: &RelayConfig, interrupt: &CancellationToken) -> Result<Self> {
        let socket = tokio::select! {
            biased;
            _ = interrupt.cancelled() => return Err(Error::Interrupted),
            socket = connect_with_retry(config) => socket,
        };
        tracing::info!(publisher = %config.publisher_addr, "Connection successful");

        let acceptor = ListenerAcceptor::bind(config)?.spawn();

        Ok(Self {
            socket,
            publisher_addr: config.publisher_addr,
            acceptor,
            shutdown: CancellationToken::new(),
            read_buffer_size: config.read_buffer_size,
        })
    }

    /// Address the acceptor is listening on
    pub fn listen_addr(&self) -> SocketAddr {
        self.acceptor.local_addr()
    }

    /// Registry of this session's listeners
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        self.acceptor.registry()
    }

    /// Start the stream loop on its own task
    pub fn spawn(self) -> UpstreamHandle {
        let shutdown = self.shutdown.clone();
        let listen_addr = self.listen_addr();
        let registry = Arc::clone(self.registry());

        let span = tracing::info_span!("reader", publisher = %self.publisher_addr);
        let task = tokio::spawn(self.run().instrument(span));

        UpstreamHandle {
            listen_addr,
            registry,
            shutdown,
            task: Some(task),
        }
    }

    /// Stream until the publisher goes away or shutdown is requested.
    ///
    /// The acceptor and every relay connection are always torn down before
    /// this returns.
    pub async fn run(mut self) -> StreamEnd {
        let end = self.stream_loop().await;

        drop(self.socket);
        self.acceptor.shutdown_and_join().await;
        tracing::debug!(end = ?end, "Reader stopped");

        end
    }

    async fn stream_loop(&mut self) -> StreamEnd {
        let mut buf = vec![0u8; self.read_buffer_size];
        let registry = Arc::clone(self.acceptor.registry());

        loop {
            let n = tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    tracing::info!("Reader is shutting down");
                    return StreamEnd::Shutdown;
                }

                result = self.socket.read(&mut buf) => match result {
                    Ok(0) => {
                        tracing::info!("Source disconnected, shutting down");
                        return StreamEnd::SourceClosed;
                    }
                    Ok(n) => n,
                    Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                        tracing::error!("Source disconnected abruptly, shutting down");
                        return StreamEnd::SourceError;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Read from source failed, shutting down");
                        return StreamEnd::SourceError;
                    }
                },
            };

            let listeners = registry.broadcast(Bytes::copy_from_slice(&buf[..n])).await;
            tracing::trace!(bytes = n, listeners, "Chunk broadcast");
        }
    }
}

/// Handle to a running upstream session
pub struct UpstreamHandle {
    listen_addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<StreamEnd>>,
}

impl UpstreamHandle {
    /// Address the session's acceptor is listening on
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// Number of listeners currently attached
    pub async fn listener_count(&self) -> usize {
        self.registry.len().await
    }

    /// Request an orderly shutdown of the whole session
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait for the session to end and its acceptor to be torn down.
    ///
    /// Cancel-safe: a dropped `join` future leaves the task attached, so a
    /// later call still waits for it. Returns `None` if already joined or
    /// the task panicked.
    pub async fn join(&mut self) -> Option<StreamEnd> {
        let result = self.task.as_mut()?.await;
        self.task = None;

        match result {
            Ok(end) => Some(end),
            Err(e) => {
                tracing::error!(error = %e, "Reader task failed");
                None
            }
        }
    }
}

impl Drop for UpstreamHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Connect to the publisher, retrying forever.
async fn connect_with_retry(config: &RelayConfig) -> TcpStream {
    let addr = config.publisher_addr;

    loop {
        tracing::info!(publisher = %addr, "Connecting");

        match tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(socket)) => return socket,
            Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => {
                tracing::debug!("Connection refused");
            }
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "Connection failed");
            }
            Err(_) => {
                tracing::debug!(timeout = ?config.connect_timeout, "Connection timed out");
            }
        }

        tokio::time::sleep(config.retry_backoff).await;
    }
}
