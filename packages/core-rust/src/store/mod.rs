//! Store protocol consumed by the collections.
//!
//! The key-value store and its connection pool are external collaborators;
//! this module fixes the narrow interface the collections use:
//!
//! - [`Command`] / [`Batch`]: write primitives and ordered groups of them
//! - [`Connection`]: read primitives plus pipelined and atomic batch execution
//! - [`ConnectionPool`]: connection checkout with distinct healthy and broken
//!   return paths
//! - [`StoreError`]: connection faults versus application-level failures
//!
//! [`MemoryPool`] is an in-process implementation of the whole protocol.

pub mod command;
pub mod connection;
pub mod error;
pub mod memory;

pub use command::{Batch, Command};
pub use connection::{Connection, ConnectionPool};
pub use error::{StoreError, StoreResult};
pub use memory::{MemoryConnection, MemoryPool, MemoryStore, PoolStats, StoreStats};
