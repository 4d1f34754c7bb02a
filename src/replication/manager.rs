//! Master-side replication state
//!
//! Tracks the server's role, its replication id and offset, and the set of
//! connected replicas. Write commands are fanned out here after they have
//! been applied locally.

use super::{generate_repl_id, ReplicaHandle, Role};
use crate::protocol::{serialize_to_vec, RespFrame};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

pub struct ReplicationManager {
    role: Role,
    repl_id: String,
    repl_offset: AtomicU64,
    replicas: RwLock<Vec<Arc<ReplicaHandle>>>,
}

impl ReplicationManager {
    pub fn new(role: Role) -> Self {
        ReplicationManager {
            role,
            repl_id: generate_repl_id(),
            repl_offset: AtomicU64::new(0),
            replicas: RwLock::new(Vec::new()),
        }
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn repl_id(&self) -> &str {
        &self.repl_id
    }

    /// Master replication offset: total bytes of propagated commands
    pub fn repl_offset(&self) -> u64 {
        self.repl_offset.load(Ordering::SeqCst)
    }

    /// Register a connection that completed PSYNC as a replica
    pub fn register_replica(&self, conn_id: u64, addr: String) -> Arc<ReplicaHandle> {
        let handle = Arc::new(ReplicaHandle::new(conn_id, addr, self.repl_offset()));
        if let Ok(mut replicas) = self.replicas.write() {
            replicas.push(Arc::clone(&handle));
        }
        handle
    }

    /// Drop the replica registered for a closed connection
    pub fn unregister_replica(&self, conn_id: u64) {
        if let Ok(mut replicas) = self.replicas.write() {
            replicas.retain(|r| r.conn_id != conn_id);
        }
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.read().map(|r| r.len()).unwrap_or(0)
    }

    /// Replicas whose acknowledged offset covers everything sent to them
    pub fn caught_up_count(&self) -> usize {
        self.replicas
            .read()
            .map(|replicas| replicas.iter().filter(|r| r.is_caught_up()).count())
            .unwrap_or(0)
    }

    /// Queue a write command for every replica and advance the master
    /// offset. A master with no replicas still advances its offset.
    pub fn propagate(&self, frame: &RespFrame) {
        let bytes = match serialize_to_vec(frame) {
            Ok(bytes) => bytes,
            Err(_) => return,
        };
        self.repl_offset.fetch_add(bytes.len() as u64, Ordering::SeqCst);
        if let Ok(replicas) = self.replicas.read() {
            for replica in replicas.iter() {
                replica.queue_bytes(&bytes);
            }
        }
    }

    /// Queue a REPLCONF GETACK probe for every replica that still has
    /// unacknowledged bytes
    pub fn broadcast_getack(&self) {
        let frame = RespFrame::command(&["REPLCONF", "GETACK", "*"]);
        let bytes = match serialize_to_vec(&frame) {
            Ok(bytes) => bytes,
            Err(_) => return,
        };
        self.repl_offset.fetch_add(bytes.len() as u64, Ordering::SeqCst);
        if let Ok(replicas) = self.replicas.read() {
            for replica in replicas.iter() {
                if !replica.is_caught_up() {
                    replica.queue_probe(&bytes);
                }
            }
        }
    }

    /// Record an ACK offset from the replica on `conn_id`
    pub fn record_ack(&self, conn_id: u64, offset: u64) {
        if let Ok(replicas) = self.replicas.read() {
            if let Some(replica) = replicas.iter().find(|r| r.conn_id == conn_id) {
                replica.record_ack(offset);
            }
        }
    }

    /// Snapshot of replica handles, for flushing outboxes
    pub fn replicas(&self) -> Vec<Arc<ReplicaHandle>> {
        self.replicas.read().map(|r| r.clone()).unwrap_or_default()
    }

    /// INFO replication section
    pub fn info(&self) -> String {
        let mut out = String::new();
        out.push_str("# Replication\r\n");
        out.push_str(&format!("role:{}\r\n", self.role.name()));
        out.push_str(&format!("connected_slaves:{}\r\n", self.replica_count()));
        out.push_str(&format!("master_replid:{}\r\n", self.repl_id));
        out.push_str(&format!("master_repl_offset:{}\r\n", self.repl_offset()));
        out
    }
}
