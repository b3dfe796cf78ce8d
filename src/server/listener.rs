//! Listener acceptor
//!
//! Handles the TCP accept loop and spawns a relay connection per listener.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::registry::ConnectionRegistry;
use crate::server::connection::RelayConnection;

/// Pending-connection backlog for the listen socket
const LISTEN_BACKLOG: u32 = 1024;

/// Accepts listeners on the loopback listen endpoint
pub struct ListenerAcceptor {
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    config: RelayConfig,
}

impl ListenerAcceptor {
    /// Bind the listen socket.
    ///
    /// Refuses any address outside the loopback range.
    pub fn bind(config: &RelayConfig) -> Result<Self> {
        let addr = config.listen_addr;
        if !addr.ip().is_loopback() {
            return Err(Error::NonLoopbackListen(addr));
        }

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(LISTEN_BACKLOG)?;
        let local_addr = listener.local_addr()?;

        tracing::info!(addr = %local_addr, "Listening to incoming connections");

        Ok(Self {
            listener,
            local_addr,
            registry: Arc::new(ConnectionRegistry::new()),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            config: config.clone(),
        })
    }

    /// Bound address (resolves port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Registry of connections accepted by this acceptor
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Start the accept loop on its own task
    pub fn spawn(self) -> AcceptorHandle {
        let local_addr = self.local_addr;
        let registry = Arc::clone(&self.registry);
        let shutdown = self.shutdown.clone();

        let span = tracing::info_span!("acceptor", listen = %local_addr);
        let task = tokio::spawn(self.run().instrument(span));

        AcceptorHandle {
            local_addr,
            registry,
            shutdown,
            task: Some(task),
        }
    }

    /// Run the accept loop, then tear down every relay connection
    pub async fn run(self) {
        self.accept_loop().await;
        self.cleanup().await;
    }

    async fn accept_loop(&self) {
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,

                result = self.listener.accept() => match result {
                    Ok((socket, peer_addr)) => self.handle_connection(socket, peer_addr).await,
                    // The shutdown arm wins whenever cancellation is already visible
                    Err(_) if self.shutdown.is_cancelled() => break,
                    Err(e) => {
                        tracing::error!(error = %e, "Error when accepting connection");
                        break;
                    }
                },
            }
        }
    }

    async fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        if let Err(e) = self.configure_socket(&socket) {
            tracing::warn!(peer = %peer_addr, error = %e, "Failed to configure socket");
        }

        let (connection, handle) =
            RelayConnection::new(socket, peer_addr, &self.registry, &self.config);

        tracing::debug!(conn_id = connection.id(), peer = %peer_addr, "Accepted connection");

        // Registered before the loop starts; the loop deregisters on exit
        self.registry.register(handle).await;

        let span = tracing::info_span!("relay", peer = %peer_addr);
        self.tracker.spawn(connection.run().instrument(span));
    }

    fn configure_socket(&self, socket: &TcpStream) -> io::Result<()> {
        if self.config.tcp_nodelay {
            socket.set_nodelay(true)?;
        }
        Ok(())
    }

    async fn cleanup(self) {
        tracing::info!("Stopping listening to incoming connections");
        drop(self.listener);

        self.registry.shutdown_all().await;
        self.tracker.close();
        self.tracker.wait().await;

        tracing::debug!("All relay connections stopped");
    }
}

/// Handle to a running acceptor
pub struct AcceptorHandle {
    local_addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl AcceptorHandle {
    /// Bound listen address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Registry of connections accepted by this acceptor
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Request shutdown of the accept loop and, through it, every relay connection
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait until the accept loop and every relay connection have finished.
    ///
    /// Cancel-safe: the task stays attached until it has completed.
    pub async fn join(&mut self) {
        let Some(task) = self.task.as_mut() else {
            return;
        };
        let result = task.await;
        self.task = None;

        if let Err(e) = result {
            tracing::error!(error = %e, "Acceptor task failed");
        }
    }

    /// Request shutdown and wait for it to complete
    pub async fn shutdown_and_join(&mut self) {
        self.shutdown();
        self.join().await;
    }
}

impl Drop for AcceptorHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
