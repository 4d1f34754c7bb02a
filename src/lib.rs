//! Rubidium: a Redis-compatible in-memory key-value server
//!
//! Speaks RESP over TCP and implements strings with expiry, lists,
//! append-only streams with blocking reads, MULTI/EXEC transactions and
//! master-replica replication with WAIT-based quorum acknowledgement.

pub mod commands;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod replication;
pub mod storage;

pub use error::{Result, RubidiumError};
pub use network::Server;

/// Version of the Rubidium server
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
