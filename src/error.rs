//! Error types
//!
//! Only construction paths (configuration, bind, connect) return errors.
//! Running loops handle their own failures and log them.

use std::io;
use std::net::SocketAddr;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for relay operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Underlying socket error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Address string could not be parsed
    #[error("invalid address '{0}': expected IP:PORT, IP or 'localhost'")]
    InvalidAddress(String),

    /// Listen endpoint is reachable from outside the host
    #[error("refusing to listen on non-loopback address {0}")]
    NonLoopbackListen(SocketAddr),

    /// Configuration value out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// An external interrupt arrived before the operation completed
    #[error("interrupted")]
    Interrupted,
}
