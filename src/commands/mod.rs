//! Command dispatch and handlers
//!
//! Commands arrive as RESP arrays of bulk strings. The executor resolves
//! the verb, enforces transaction queuing, runs the handler and decides
//! whether the write gets propagated to replicas. Handlers that cannot
//! answer immediately (blocking XREAD, WAIT) return an outcome the event
//! loop turns into a parked session.

pub mod admin;
pub mod executor;
pub mod lists;
pub mod streams;
pub mod strings;
pub mod table;
pub mod transactions;

pub use executor::{apply_replicated, execute, execute_parts};
pub use table::{lookup_command, CommandKind};

use crate::config::Config;
use crate::error::{CommandError, Result, RubidiumError};
use crate::network::BlockingManager;
use crate::protocol::RespFrame;
use crate::replication::ReplicationManager;
use crate::storage::{Store, StreamId};
use std::sync::Arc;
use std::time::Instant;

/// Shared server state handed to every command handler
pub struct ServerContext {
    pub store: Arc<Store>,
    pub repl: Arc<ReplicationManager>,
    pub config: Arc<Config>,

    /// Parked-XREAD registry. Lives here rather than on the event loop so
    /// every append path, including EXEC and the replication link, can
    /// wake readers.
    pub blocking: Arc<BlockingManager>,
}

/// Per-connection transaction state
#[derive(Debug, Default)]
pub enum TxnState {
    /// No transaction open
    #[default]
    Idle,

    /// MULTI seen; commands queue instead of executing
    Queuing(Vec<Vec<Vec<u8>>>),

    /// EXEC is draining the queue
    Executing,
}

/// Per-connection command state, separate from the socket so the
/// dispatcher can be exercised without one
pub struct Session {
    pub id: u64,
    pub txn: TxnState,
}

impl Session {
    pub fn new(id: u64) -> Self {
        Session {
            id,
            txn: TxnState::Idle,
        }
    }

    pub fn in_transaction(&self) -> bool {
        matches!(self.txn, TxnState::Queuing(_))
    }
}

/// What the event loop should do with a dispatched command
#[derive(Debug)]
pub enum CommandOutcome {
    /// Send this frame to the client
    Reply(RespFrame),

    /// Nothing to send (replica ACK bookkeeping)
    NoReply,

    /// Park the session until one of the streams grows past its id or the
    /// deadline passes. `deadline` of None blocks forever.
    BlockXread {
        keys: Vec<Vec<u8>>,
        after: Vec<StreamId>,
        deadline: Option<Instant>,
    },

    /// Park the session until `needed` replicas are caught up or the
    /// deadline passes, probing with GETACK meanwhile
    Wait {
        needed: usize,
        deadline: Option<Instant>,
    },

    /// PSYNC accepted: send FULLRESYNC plus a snapshot, then register the
    /// connection as a replica
    BeginReplicaSync,
}

/// Flatten a command frame into its argument byte strings
pub fn frame_to_parts(frame: &RespFrame) -> Result<Vec<Vec<u8>>> {
    let elements = match frame {
        RespFrame::Array(Some(elements)) if !elements.is_empty() => elements,
        _ => {
            return Err(RubidiumError::Protocol(
                "Expected non-empty array for command".into(),
            ))
        }
    };

    elements
        .iter()
        .map(|el| {
            el.as_bytes()
                .map(|b| b.to_vec())
                .ok_or_else(|| RubidiumError::Protocol("Expected bulk string argument".into()))
        })
        .collect()
}

/// Uppercased command verb
pub fn verb_of(parts: &[Vec<u8>]) -> String {
    String::from_utf8_lossy(&parts[0]).to_ascii_uppercase()
}

pub(crate) fn arg_str(parts: &[Vec<u8>], idx: usize) -> Result<&str> {
    std::str::from_utf8(&parts[idx])
        .map_err(|_| CommandError::SyntaxError("invalid UTF-8 argument".into()).into())
}

pub(crate) fn arg_u64(parts: &[Vec<u8>], idx: usize) -> Result<u64> {
    arg_str(parts, idx)?
        .parse::<u64>()
        .map_err(|_| CommandError::NotInteger.into())
}

pub(crate) fn arg_i64(parts: &[Vec<u8>], idx: usize) -> Result<i64> {
    arg_str(parts, idx)?
        .parse::<i64>()
        .map_err(|_| CommandError::NotInteger.into())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_to_parts() {
        let frame = RespFrame::command(&["SET", "key", "value"]);
        let parts = frame_to_parts(&frame).unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(verb_of(&parts), "SET");
    }

    #[test]
    fn test_frame_to_parts_rejects_non_arrays() {
        assert!(frame_to_parts(&RespFrame::Integer(1)).is_err());
        assert!(frame_to_parts(&RespFrame::Array(Some(vec![]))).is_err());
        assert!(frame_to_parts(&RespFrame::Array(Some(vec![RespFrame::Integer(1)]))).is_err());
    }

    #[test]
    fn test_verb_is_case_insensitive() {
        let parts = vec![b"ping".to_vec()];
        assert_eq!(verb_of(&parts), "PING");
    }
}
