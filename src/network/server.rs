//! The server event loop
//!
//! A single thread polls the listener and every client socket in turn,
//! parses complete frames, dispatches them and writes replies. Blocked
//! clients (XREAD BLOCK, WAIT) stay in the connection table with their
//! input buffered; wakeups, timeouts and replica acknowledgements are
//! serviced between polls. The only other thread is a replica's link to
//! its master.

use crate::commands::{execute_parts, frame_to_parts, streams, CommandOutcome, ServerContext};
use crate::config::Config;
use crate::error::Result;
use crate::network::blocking::{BlockingManager, StreamWaiter};
use crate::network::connection::Connection;
use crate::network::listener::Listener;
use crate::protocol::RespFrame;
use crate::replication::{ReplicaClient, ReplicationManager, Role};
use crate::storage::snapshot::{empty_snapshot_bytes, load_snapshot};
use crate::storage::Store;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// How often parked WAITs probe replicas with GETACK
const GETACK_INTERVAL: Duration = Duration::from_millis(20);

/// How often expired keys are reaped
const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// A parked WAIT command
struct PendingWait {
    conn_id: u64,
    needed: usize,
    deadline: Option<Instant>,
}

pub struct Server {
    listener: Listener,
    ctx: Arc<ServerContext>,
    connections: HashMap<u64, Connection>,
    next_conn_id: u64,
    pending_waits: Vec<PendingWait>,
    last_getack: Instant,
    last_sweep: Instant,
}

impl Server {
    pub fn new(config: Config) -> Result<Self> {
        let role = if config.is_replica() {
            Role::Replica
        } else {
            Role::Master
        };

        let ctx = Arc::new(ServerContext {
            store: Arc::new(Store::new()),
            repl: Arc::new(ReplicationManager::new(role)),
            config: Arc::new(config.clone()),
            blocking: Arc::new(BlockingManager::new()),
        });

        let loaded = load_snapshot(&config.snapshot_path(), &ctx.store)?;
        if loaded > 0 {
            println!("Loaded {} keys from {}", loaded, config.snapshot_path().display());
        }

        let listener = Listener::bind(&config.bind_addr, config.port)?;

        if let Some(master) = &config.replicaof {
            println!("Replicating from {}:{}", master.host, master.port);
            ReplicaClient::spawn(Arc::clone(&ctx), master.clone(), config.port);
        }

        Ok(Server {
            listener,
            ctx,
            connections: HashMap::new(),
            next_conn_id: 1,
            pending_waits: Vec::new(),
            last_getack: Instant::now() - GETACK_INTERVAL,
            last_sweep: Instant::now(),
        })
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the event loop. Does not return under normal operation.
    pub fn run(&mut self) -> Result<()> {
        loop {
            self.tick()?;
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// One pass over all work sources
    pub fn tick(&mut self) -> Result<()> {
        self.accept_new_connections()?;
        self.service_connections();
        self.service_wakeups();
        self.service_blocking_timeouts();
        self.service_waits();
        self.flush_replica_outboxes();
        self.sweep_expired_keys();
        self.reap_closed_connections();
        Ok(())
    }

    fn accept_new_connections(&mut self) -> Result<()> {
        while let Some((stream, addr)) = self.listener.accept()? {
            let id = self.next_conn_id;
            self.next_conn_id += 1;
            match Connection::new(id, stream, addr) {
                Ok(conn) => {
                    self.connections.insert(id, conn);
                }
                Err(err) => eprintln!("Failed to set up connection from {}: {}", addr, err),
            }
        }
        Ok(())
    }

    fn service_connections(&mut self) {
        let ids: Vec<u64> = self.connections.keys().copied().collect();
        for id in ids {
            let mut conn = match self.connections.remove(&id) {
                Some(conn) => conn,
                None => continue,
            };
            self.service_connection(&mut conn);
            if conn.is_closing() {
                self.teardown(conn);
            } else {
                self.connections.insert(id, conn);
            }
        }
    }

    fn service_connection(&mut self, conn: &mut Connection) {
        // Drain the socket; a blocked connection still reads so that a
        // disconnect tears its waiters down promptly
        loop {
            match conn.read() {
                Ok(true) => {}
                Ok(false) => break,
                Err(_) => {
                    conn.mark_closing();
                    return;
                }
            }
        }

        while !conn.blocked && !conn.is_closing() {
            match conn.parse_frame() {
                Ok(Some((frame, _))) => self.dispatch(conn, frame),
                Ok(None) => break,
                Err(err) => {
                    // Framing is unrecoverable
                    let _ = conn.send_frame(&RespFrame::error(format!("ERR {}", err)));
                    conn.mark_closing();
                    break;
                }
            }
        }

        if conn.has_pending_writes() {
            let _ = conn.flush();
        }
    }

    fn dispatch(&mut self, conn: &mut Connection, frame: RespFrame) {
        let parts = match frame_to_parts(&frame) {
            Ok(parts) => parts,
            Err(err) => {
                let _ = conn.send_frame(&RespFrame::error(format!("ERR {}", err)));
                conn.mark_closing();
                return;
            }
        };

        match execute_parts(&self.ctx, &mut conn.session, parts) {
            Ok(CommandOutcome::Reply(reply)) => {
                let _ = conn.send_frame(&reply);
            }
            Ok(CommandOutcome::NoReply) => {}
            Ok(CommandOutcome::BlockXread { keys, after, deadline }) => {
                self.ctx.blocking.register(StreamWaiter {
                    conn_id: conn.id,
                    keys,
                    after,
                    deadline,
                });
                conn.blocked = true;
            }
            Ok(CommandOutcome::Wait { needed, deadline }) => {
                self.pending_waits.push(PendingWait {
                    conn_id: conn.id,
                    needed,
                    deadline,
                });
                conn.blocked = true;
            }
            Ok(CommandOutcome::BeginReplicaSync) => {
                if let Err(err) = self.start_replica_sync(conn) {
                    eprintln!("Full resync for {} failed: {}", conn.addr, err);
                    conn.mark_closing();
                }
            }
            Err(err) => {
                eprintln!("Connection {} dispatch failed: {}", conn.id, err);
                conn.mark_closing();
            }
        }
    }

    /// Answer PSYNC: FULLRESYNC header, then the snapshot as a bulk
    /// payload without trailing CRLF, then register the replica
    fn start_replica_sync(&mut self, conn: &mut Connection) -> Result<()> {
        let header = format!(
            "+FULLRESYNC {} {}\r\n",
            self.ctx.repl.repl_id(),
            self.ctx.repl.repl_offset()
        );
        conn.send_raw(header.as_bytes())?;

        let snapshot = empty_snapshot_bytes()?;
        conn.send_raw(format!("${}\r\n", snapshot.len()).as_bytes())?;
        conn.send_raw(&snapshot)?;

        self.ctx.repl.register_replica(conn.id, conn.addr.to_string());
        conn.is_replica = true;
        println!("Replica connected from {}", conn.addr);
        Ok(())
    }

    /// Re-run reads for clients whose watched streams grew
    fn service_wakeups(&mut self) {
        for wakeup in self.ctx.blocking.process_wakeups() {
            let conn = match self.connections.get_mut(&wakeup.conn_id) {
                Some(conn) => conn,
                None => continue,
            };
            match streams::read_streams(&self.ctx, &wakeup.waiter.keys, &wakeup.waiter.after) {
                Ok(Some(reply)) => {
                    let _ = conn.send_frame(&reply);
                    conn.blocked = false;
                }
                Ok(None) => {
                    // The append did not pass this waiter's id; park again
                    self.ctx.blocking.register(wakeup.waiter);
                }
                Err(err) => {
                    let _ = conn.send_frame(&RespFrame::error(err.to_string()));
                    conn.blocked = false;
                }
            }
        }
    }

    fn service_blocking_timeouts(&mut self) {
        for waiter in self.ctx.blocking.process_timeouts() {
            if let Some(conn) = self.connections.get_mut(&waiter.conn_id) {
                let _ = conn.send_frame(&RespFrame::null_array());
                conn.blocked = false;
            }
        }
    }

    /// Resolve parked WAITs and probe lagging replicas
    fn service_waits(&mut self) {
        if self.pending_waits.is_empty() {
            return;
        }

        let caught_up = self.ctx.repl.caught_up_count();
        let now = Instant::now();
        let mut still_pending = Vec::with_capacity(self.pending_waits.len());

        for wait in self.pending_waits.drain(..) {
            let timed_out = wait.deadline.map(|d| now >= d).unwrap_or(false);
            if caught_up >= wait.needed || timed_out {
                if let Some(conn) = self.connections.get_mut(&wait.conn_id) {
                    let _ = conn.send_frame(&RespFrame::Integer(caught_up as i64));
                    conn.blocked = false;
                }
            } else {
                still_pending.push(wait);
            }
        }
        self.pending_waits = still_pending;

        if !self.pending_waits.is_empty() && self.last_getack.elapsed() >= GETACK_INTERVAL {
            self.ctx.repl.broadcast_getack();
            self.last_getack = Instant::now();
        }
    }

    /// Push buffered propagation bytes out to replica sockets
    fn flush_replica_outboxes(&mut self) {
        for handle in self.ctx.repl.replicas() {
            let bytes = handle.take_outbox();
            if bytes.is_empty() {
                continue;
            }
            if let Some(conn) = self.connections.get_mut(&handle.conn_id) {
                if conn.send_raw(&bytes).is_err() {
                    conn.mark_closing();
                }
            }
        }
    }

    fn sweep_expired_keys(&mut self) {
        if self.last_sweep.elapsed() >= EXPIRY_SWEEP_INTERVAL {
            let _ = self.ctx.store.purge_expired();
            self.last_sweep = Instant::now();
        }
    }

    fn reap_closed_connections(&mut self) {
        let closed: Vec<u64> = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.is_closing())
            .map(|(id, _)| *id)
            .collect();
        for id in closed {
            if let Some(conn) = self.connections.remove(&id) {
                self.teardown(conn);
            }
        }
    }

    /// Drop every trace of a closed connection
    fn teardown(&mut self, conn: Connection) {
        self.ctx.blocking.unregister(conn.id);
        self.pending_waits.retain(|w| w.conn_id != conn.id);
        if conn.is_replica {
            self.ctx.repl.unregister_replica(conn.id);
            println!("Replica {} disconnected", conn.addr);
        }
    }
}
