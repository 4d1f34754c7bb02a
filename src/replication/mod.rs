//! Replication subsystem
//!
//! A master registers one handle per connected replica and fans every
//! accepted write command out to them, counting propagated bytes. Replicas
//! report back how many bytes they have processed via REPLCONF ACK, which
//! WAIT uses to decide whether a quorum of replicas has caught up.
//!
//! A replica runs a background thread holding the link to its master; see
//! the `client` module.

pub mod client;
pub mod manager;

pub use client::ReplicaClient;
pub use manager::ReplicationManager;

use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Role of this server in replication
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Master,
    Replica,
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Replica => "slave",
        }
    }
}

/// Generate a 40-character hex replication id
pub fn generate_repl_id() -> String {
    let mut rng = rand::thread_rng();
    (0..40)
        .map(|_| {
            let digit: u8 = rng.gen_range(0..16);
            char::from_digit(digit as u32, 16).unwrap_or('0')
        })
        .collect()
}

/// Per-replica connection state tracked by the master.
///
/// Bytes queued for the replica are buffered in an outbox that the event
/// loop flushes to the socket; `propagated` counts every byte ever queued
/// and `acked` the replica's last reported offset. A pending GETACK probe's
/// encoded length is tracked so that a replica which acknowledged
/// everything before the probe still counts as caught up.
pub struct ReplicaHandle {
    /// Connection id of the replica's socket
    pub conn_id: u64,

    /// Peer address, for logs and INFO
    pub addr: String,

    /// Master offset at full resync; replica ACKs are absolute from this
    /// point while `propagated` counts bytes queued since registration
    base_offset: u64,

    outbox: Mutex<Vec<u8>>,
    propagated: AtomicU64,
    acked: AtomicU64,
    inflight_probe: AtomicU64,
}

impl ReplicaHandle {
    pub fn new(conn_id: u64, addr: String, base_offset: u64) -> Self {
        ReplicaHandle {
            conn_id,
            addr,
            base_offset,
            outbox: Mutex::new(Vec::new()),
            propagated: AtomicU64::new(0),
            acked: AtomicU64::new(0),
            inflight_probe: AtomicU64::new(0),
        }
    }

    /// Queue propagated command bytes for delivery
    pub fn queue_bytes(&self, bytes: &[u8]) {
        if let Ok(mut outbox) = self.outbox.lock() {
            outbox.extend_from_slice(bytes);
        }
        self.propagated.fetch_add(bytes.len() as u64, Ordering::SeqCst);
    }

    /// Queue a GETACK probe, remembering its encoded length
    pub fn queue_probe(&self, bytes: &[u8]) {
        self.inflight_probe.store(bytes.len() as u64, Ordering::SeqCst);
        self.queue_bytes(bytes);
    }

    /// Record an offset reported by REPLCONF ACK
    pub fn record_ack(&self, offset: u64) {
        let relative = offset.saturating_sub(self.base_offset);
        self.acked.store(relative, Ordering::SeqCst);
        if relative >= self.propagated.load(Ordering::SeqCst) {
            self.inflight_probe.store(0, Ordering::SeqCst);
        }
    }

    /// Whether the replica has processed everything sent to it. A replica
    /// whose only unacknowledged bytes are an in-flight probe counts too.
    pub fn is_caught_up(&self) -> bool {
        let propagated = self.propagated.load(Ordering::SeqCst);
        let acked = self.acked.load(Ordering::SeqCst);
        let probe = self.inflight_probe.load(Ordering::SeqCst);
        acked == propagated || acked + probe == propagated
    }

    /// Bytes waiting to be flushed to the replica socket
    pub fn take_outbox(&self) -> Vec<u8> {
        match self.outbox.lock() {
            Ok(mut outbox) => std::mem::take(&mut *outbox),
            Err(_) => Vec::new(),
        }
    }

    pub fn propagated_bytes(&self) -> u64 {
        self.propagated.load(Ordering::SeqCst)
    }

    pub fn acked_bytes(&self) -> u64 {
        self.acked.load(Ordering::SeqCst)
    }
}
