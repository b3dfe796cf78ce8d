//! # tcp-fanout
//!
//! Single-upstream, multi-downstream TCP byte-stream relay.
//!
//! The relay keeps one connection to a publisher and copies every byte it
//! receives, unchanged and in order, to every listener currently connected
//! to a loopback listen endpoint.
//!
//! ```text
//!  publisher ──► UpstreamReader ──► ConnectionRegistry ──► RelayConnection ──► listener
//!                     │                                ├─► RelayConnection ──► listener
//!                     └── owns ListenerAcceptor        └─► RelayConnection ──► listener
//! ```
//!
//! Shutdown cascades the same way: when the publisher goes away the reader
//! stops its acceptor, which stops every relay connection, and the
//! [`Supervisor`] builds a fresh session.
//!
//! # Example
//!
//! ```no_run
//! use tcp_fanout::{RelayConfig, Supervisor};
//!
//! # async fn example() -> tcp_fanout::Result<()> {
//! let config = RelayConfig::default()
//!     .publisher("127.0.0.1:2000".parse().unwrap())
//!     .listen("127.0.0.1:2001".parse().unwrap());
//!
//! let supervisor = Supervisor::new(config)?;
//! supervisor
//!     .run_until(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod registry;
pub mod server;
pub mod supervisor;

pub use client::{StreamEnd, UpstreamHandle, UpstreamReader};
pub use config::RelayConfig;
pub use error::{Error, Result};
pub use registry::{ConnectionRegistry, RelayHandle};
pub use server::{AcceptorHandle, CloseReason, ListenerAcceptor, RelayConnection};
pub use supervisor::Supervisor;
