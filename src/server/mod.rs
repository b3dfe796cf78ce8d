//! Listener side of the relay
//!
//! - [`ListenerAcceptor`]: accept loop on the loopback listen endpoint
//! - [`RelayConnection`]: per-listener delivery loop

pub mod connection;
pub mod listener;

pub use connection::{CloseReason, RelayConnection};
pub use listener::{AcceptorHandle, ListenerAcceptor};
