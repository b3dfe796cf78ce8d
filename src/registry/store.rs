//! Connection registry implementation
//!
//! The set of relay connections belonging to one upstream session.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::sync::RwLock;

use super::entry::RelayHandle;

/// Registry of live relay connections
///
/// Thread-safe via `RwLock`. The acceptor inserts, each relay connection
/// removes itself, and the upstream reader broadcasts under the read lock,
/// so a connection can never be removed half-way through a broadcast.
pub struct ConnectionRegistry {
    /// Registered connections keyed by connection ID
    connections: RwLock<BTreeMap<u64, RelayHandle>>,

    /// Next connection ID to hand out
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate a connection ID
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Add a relay connection
    pub async fn register(&self, handle: RelayHandle) {
        let mut connections = self.connections.write().await;
        let id = handle.id();
        let peer = handle.peer_addr();
        connections.insert(id, handle);

        tracing::debug!(
            conn_id = id,
            peer = %peer,
            listeners = connections.len(),
            "Relay connection registered"
        );
    }

    /// Remove a relay connection
    ///
    /// Called only by the connection's own cleanup.
    pub async fn deregister(&self, id: u64) {
        let mut connections = self.connections.write().await;

        if connections.remove(&id).is_some() {
            tracing::debug!(
                conn_id = id,
                listeners = connections.len(),
                "Relay connection deregistered"
            );
        }
    }

    /// Hand a chunk to every connection registered right now.
    ///
    /// Returns the number of connections the chunk was queued for.
    pub async fn broadcast(&self, data: Bytes) -> usize {
        let connections = self.connections.read().await;

        for handle in connections.values() {
            handle.enqueue(data.clone());
        }

        connections.len()
    }

    /// Request shutdown of every registered connection.
    ///
    /// Entries are left in place; each connection deregisters itself when
    /// its loop exits.
    pub async fn shutdown_all(&self) {
        let connections = self.connections.read().await;

        for handle in connections.values() {
            handle.shutdown();
        }
    }

    /// Number of registered connections
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Whether no connection is registered
    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
