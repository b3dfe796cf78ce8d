//! Session supervisor
//!
//! Rebuilds the reader, acceptor and relay connections from scratch each time
//! the publisher connection is lost, until interrupted.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::client::UpstreamReader;
use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::registry::ConnectionRegistry;

/// Top-level restart loop
pub struct Supervisor {
    config: RelayConfig,
    shutdown: CancellationToken,
    /// Listener registry of the live session, if any
    session: RwLock<Option<Arc<ConnectionRegistry>>>,
}

impl Supervisor {
    /// Create a supervisor, validating the configuration
    pub fn new(config: RelayConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            shutdown: CancellationToken::new(),
            session: RwLock::new(None),
        })
    }

    /// Request an orderly shutdown of the live session and stop restarting
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Number of listeners attached to the live session (0 if none)
    pub async fn listener_count(&self) -> usize {
        let session = self.session.read().await.clone();
        match session {
            Some(registry) => registry.len().await,
            None => 0,
        }
    }

    /// Run sessions back to back until [`shutdown`](Self::shutdown) is called
    pub async fn run(&self) {
        loop {
            let span = tracing::info_span!("reader", publisher = %self.config.publisher_addr);
            let connected = UpstreamReader::connect(&self.config, &self.shutdown)
                .instrument(span)
                .await;

            let reader = match connected {
                Ok(reader) => reader,
                Err(Error::Interrupted) => {
                    tracing::info!("Interrupted while connecting");
                    return;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to start session");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return,
                        _ = tokio::time::sleep(self.config.retry_backoff) => continue,
                    }
                }
            };

            *self.session.write().await = Some(Arc::clone(reader.registry()));
            let mut handle = reader.spawn();

            let end = tokio::select! {
                end = handle.join() => end,
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Shutting down session");
                    handle.shutdown();
                    handle.join().await
                }
            };

            *self.session.write().await = None;

            if self.shutdown.is_cancelled() {
                tracing::info!("Supervisor stopped");
                return;
            }

            tracing::info!(end = ?end, "Upstream session ended, reconnecting");
        }
    }

    /// Run until `signal` completes, then shut the live session down
    pub async fn run_until<F>(&self, signal: F)
    where
        F: Future<Output = ()>,
    {
        let run = self.run();
        tokio::pin!(run);

        tokio::select! {
            _ = &mut run => return,
            _ = signal => {
                tracing::info!("Shutdown signal received");
                self.shutdown();
            }
        }

        run.await;
    }
}
