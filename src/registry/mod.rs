//! Connection registry for fan-out routing
//!
//! The registry holds the relay connections of one upstream session and
//! routes every chunk read from the publisher to each of them.
//!
//! # Architecture
//!
//! ```text
//!                      Arc<ConnectionRegistry>
//!                 ┌────────────────────────────┐
//!                 │ connections: BTreeMap<id,  │
//!                 │   RelayHandle {            │
//!                 │     queue: mpsc::Tx,       │
//!                 │     shutdown: Token,       │
//!                 │   }                        │
//!                 │ >                          │
//!                 └─────────────┬──────────────┘
//!                               │
//!        ┌──────────────────────┼──────────────────────┐
//!        │                      │                      │
//!        ▼                      ▼                      ▼
//!  [UpstreamReader]      [RelayConnection]      [RelayConnection]
//!   socket.read()          queue.recv()           queue.recv()
//!        │                      │                      │
//!        └──► registry.broadcast() ──► write_all() ──► TCP
//! ```
//!
//! Chunks are `bytes::Bytes`, so every queue shares the same allocation.
//! Each queue is unbounded: a stalled listener only delays itself.

pub mod entry;
pub mod store;

pub use entry::RelayHandle;
pub use store::ConnectionRegistry;
