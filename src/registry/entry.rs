//! Registry entry for a single relay connection
//!
//! A [`RelayHandle`] is the producer side of one listener's delivery queue.
//! The consumer side lives in [`RelayConnection`](crate::server::RelayConnection).

use std::net::SocketAddr;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Handle to one registered relay connection
///
/// Cheap to clone. Holding a handle does not keep the connection alive: once
/// the relay loop exits, [`enqueue`](Self::enqueue) becomes a no-op that
/// requests shutdown.
#[derive(Debug, Clone)]
pub struct RelayHandle {
    /// Registry-assigned connection ID
    id: u64,

    /// Remote listener address
    peer_addr: SocketAddr,

    /// Outbound chunks awaiting delivery to the peer
    queue: mpsc::UnboundedSender<Bytes>,

    /// Cancelled when shutdown is requested
    shutdown: CancellationToken,
}

impl RelayHandle {
    pub(crate) fn new(
        id: u64,
        peer_addr: SocketAddr,
        queue: mpsc::UnboundedSender<Bytes>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            id,
            peer_addr,
            queue,
            shutdown,
        }
    }

    /// Connection ID
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remote listener address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Hand one chunk to the relay loop.
    ///
    /// Never fails: if the relay loop is already gone the connection is
    /// asked to shut down instead, so a broadcast never aborts part-way.
    pub fn enqueue(&self, data: Bytes) {
        if self.queue.send(data).is_err() {
            tracing::info!(
                conn_id = self.id,
                peer = %self.peer_addr,
                "Could not enqueue data, shutting down"
            );
            self.shutdown();
        }
    }

    /// Request shutdown of the relay loop.
    ///
    /// Wakes the loop even when it is blocked waiting on the peer.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            tracing::debug!(conn_id = self.id, peer = %self.peer_addr, "Relay shutdown requested");
        }
        self.shutdown.cancel();
    }

    /// Whether shutdown has been requested
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
