//! Publisher side of the relay
//!
//! Connects to the publisher with retry and streams everything it sends to
//! the listeners of the current session.

pub mod upstream;

pub use upstream::{StreamEnd, UpstreamHandle, UpstreamReader};
