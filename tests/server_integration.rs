//! End-to-end tests over real sockets
//!
//! Each test boots a server on an ephemeral port, drives it with a raw
//! RESP client and asserts on the wire-level replies.

use rubidium::config::Config;
use rubidium::protocol::{serialize_to_vec, RespFrame, RespParser};
use rubidium::Server;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

/// Boot a server on an ephemeral port and return its address
fn start_server(config: Config) -> SocketAddr {
    let mut server = Server::new(config).expect("server should start");
    let addr = server.local_addr().expect("listener has an address");
    thread::spawn(move || {
        let _ = server.run();
    });
    addr
}

fn master_config() -> Config {
    Config {
        port: 0,
        ..Config::default()
    }
}

fn replica_config(master: SocketAddr) -> Config {
    Config {
        port: 0,
        replicaof: Some(rubidium::config::MasterAddr {
            host: master.ip().to_string(),
            port: master.port(),
        }),
        ..Config::default()
    }
}

struct Client {
    stream: TcpStream,
    parser: RespParser,
}

impl Client {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("set timeout");
        Client {
            stream,
            parser: RespParser::new(),
        }
    }

    fn send(&mut self, args: &[&str]) {
        let bytes = serialize_to_vec(&RespFrame::command(args)).expect("serialize");
        self.stream.write_all(&bytes).expect("write");
    }

    fn recv(&mut self) -> RespFrame {
        let mut buf = [0u8; 4096];
        loop {
            if let Some((frame, _)) = self.parser.parse().expect("parse reply") {
                return frame;
            }
            let n = self.stream.read(&mut buf).expect("read reply");
            assert!(n > 0, "server closed the connection");
            self.parser.feed(&buf[..n]);
        }
    }

    fn cmd(&mut self, args: &[&str]) -> RespFrame {
        self.send(args);
        self.recv()
    }

    fn cmd_text(&mut self, args: &[&str]) -> String {
        match self.cmd(args) {
            RespFrame::SimpleString(b) | RespFrame::Error(b) => String::from_utf8_lossy(&b).to_string(),
            RespFrame::BulkString(Some(b)) => String::from_utf8_lossy(&b).to_string(),
            RespFrame::BulkString(None) => "(nil)".to_string(),
            RespFrame::Integer(n) => n.to_string(),
            other => format!("{:?}", other),
        }
    }
}

/// Poll until the predicate holds or the timeout expires
fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut pred: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if pred() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    false
}

#[test]
fn ping_echo_set_get() {
    let addr = start_server(master_config());
    let mut client = Client::connect(addr);

    assert_eq!(client.cmd_text(&["PING"]), "PONG");
    assert_eq!(client.cmd_text(&["ECHO", "hello"]), "hello");
    assert_eq!(client.cmd_text(&["SET", "key", "value"]), "OK");
    assert_eq!(client.cmd_text(&["GET", "key"]), "value");
    assert_eq!(client.cmd(&["GET", "missing"]), RespFrame::null_bulk());
}

#[test]
fn expiry_with_px() {
    let addr = start_server(master_config());
    let mut client = Client::connect(addr);

    assert_eq!(client.cmd_text(&["SET", "temp", "v", "PX", "80"]), "OK");
    assert_eq!(client.cmd_text(&["GET", "temp"]), "v");
    thread::sleep(Duration::from_millis(120));
    assert_eq!(client.cmd(&["GET", "temp"]), RespFrame::null_bulk());
}

#[test]
fn incr_type_keys_del() {
    let addr = start_server(master_config());
    let mut client = Client::connect(addr);

    assert_eq!(client.cmd(&["INCR", "counter"]), RespFrame::Integer(1));
    assert_eq!(client.cmd(&["INCR", "counter"]), RespFrame::Integer(2));
    assert_eq!(client.cmd_text(&["TYPE", "counter"]), "string");
    assert_eq!(client.cmd_text(&["TYPE", "ghost"]), "none");

    match client.cmd(&["KEYS", "*"]) {
        RespFrame::Array(Some(keys)) => assert_eq!(keys.len(), 1),
        other => panic!("unexpected KEYS reply: {:?}", other),
    }
    assert_eq!(client.cmd(&["DEL", "counter", "ghost"]), RespFrame::Integer(1));
}

#[test]
fn unknown_command_keeps_connection_alive() {
    let addr = start_server(master_config());
    let mut client = Client::connect(addr);

    let reply = client.cmd_text(&["NOSUCHCMD"]);
    assert!(reply.contains("unknown command"));
    assert_eq!(client.cmd_text(&["PING"]), "PONG");
}

#[test]
fn lists_roundtrip() {
    let addr = start_server(master_config());
    let mut client = Client::connect(addr);

    assert_eq!(client.cmd(&["RPUSH", "l", "a", "b", "c"]), RespFrame::Integer(3));
    match client.cmd(&["LRANGE", "l", "0", "-1"]) {
        RespFrame::Array(Some(items)) => {
            assert_eq!(items.len(), 3);
            assert_eq!(items[0].as_bytes(), Some(b"a".as_ref()));
        }
        other => panic!("unexpected LRANGE reply: {:?}", other),
    }
}

#[test]
fn stream_append_and_range() {
    let addr = start_server(master_config());
    let mut client = Client::connect(addr);

    assert_eq!(client.cmd_text(&["XADD", "s", "1-1", "f", "a"]), "1-1");
    assert_eq!(client.cmd_text(&["XADD", "s", "5-*", "f", "b"]), "5-0");
    assert_eq!(client.cmd_text(&["XADD", "s", "5-*", "f", "c"]), "5-1");

    let err = client.cmd_text(&["XADD", "s", "0-0", "f", "v"]);
    assert!(err.contains("greater than 0-0"));

    match client.cmd(&["XRANGE", "s", "-", "+"]) {
        RespFrame::Array(Some(entries)) => assert_eq!(entries.len(), 3),
        other => panic!("unexpected XRANGE reply: {:?}", other),
    }
}

#[test]
fn blocking_xread_wakes_on_xadd() {
    let addr = start_server(master_config());

    let reader = thread::spawn(move || {
        let mut client = Client::connect(addr);
        client.cmd(&["XREAD", "BLOCK", "5000", "STREAMS", "queue", "$"])
    });

    // Give the reader time to park
    thread::sleep(Duration::from_millis(150));
    let mut writer = Client::connect(addr);
    assert_eq!(writer.cmd_text(&["XADD", "queue", "7-7", "job", "run"]), "7-7");

    let reply = reader.join().expect("reader thread");
    match reply {
        RespFrame::Array(Some(keys)) => {
            assert_eq!(keys.len(), 1);
            match &keys[0] {
                RespFrame::Array(Some(pair)) => {
                    assert_eq!(pair[0].as_bytes(), Some(b"queue".as_ref()));
                }
                other => panic!("unexpected key pair: {:?}", other),
            }
        }
        other => panic!("expected stream data, got {:?}", other),
    }
}

#[test]
fn blocking_xread_wakes_on_xadd_inside_exec() {
    let addr = start_server(master_config());

    let reader = thread::spawn(move || {
        let mut client = Client::connect(addr);
        let started = Instant::now();
        let reply = client.cmd(&["XREAD", "BLOCK", "3000", "STREAMS", "q", "$"]);
        (reply, started.elapsed())
    });

    thread::sleep(Duration::from_millis(150));
    let mut writer = Client::connect(addr);
    assert_eq!(writer.cmd_text(&["MULTI"]), "OK");
    assert_eq!(writer.cmd_text(&["XADD", "q", "7-7", "job", "run"]), "QUEUED");
    match writer.cmd(&["EXEC"]) {
        RespFrame::Array(Some(replies)) => assert_eq!(replies.len(), 1),
        other => panic!("unexpected EXEC reply: {:?}", other),
    }

    let (reply, blocked_for) = reader.join().expect("reader thread");
    // Woken by the append, not the deadline
    assert!(blocked_for < Duration::from_secs(3));
    match reply {
        RespFrame::Array(Some(keys)) => {
            assert_eq!(keys.len(), 1);
            match &keys[0] {
                RespFrame::Array(Some(pair)) => {
                    assert_eq!(pair[0].as_bytes(), Some(b"q".as_ref()));
                }
                other => panic!("unexpected key pair: {:?}", other),
            }
        }
        other => panic!("expected stream data, got {:?}", other),
    }
}

#[test]
fn blocking_xread_times_out_with_null() {
    let addr = start_server(master_config());
    let mut client = Client::connect(addr);

    let started = Instant::now();
    let reply = client.cmd(&["XREAD", "BLOCK", "120", "STREAMS", "empty", "$"]);
    assert_eq!(reply, RespFrame::null_array());
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[test]
fn transactions_queue_and_execute() {
    let addr = start_server(master_config());
    let mut client = Client::connect(addr);

    assert_eq!(client.cmd_text(&["MULTI"]), "OK");
    assert_eq!(client.cmd_text(&["SET", "k", "v"]), "QUEUED");
    assert_eq!(client.cmd_text(&["INCR", "n"]), "QUEUED");

    match client.cmd(&["EXEC"]) {
        RespFrame::Array(Some(replies)) => {
            assert_eq!(replies.len(), 2);
            assert_eq!(replies[1], RespFrame::Integer(1));
        }
        other => panic!("unexpected EXEC reply: {:?}", other),
    }
    assert_eq!(client.cmd_text(&["GET", "k"]), "v");

    let err = client.cmd_text(&["EXEC"]);
    assert!(err.contains("EXEC without MULTI"));
}

#[test]
fn discard_drops_queued_commands() {
    let addr = start_server(master_config());
    let mut client = Client::connect(addr);

    client.cmd(&["MULTI"]);
    client.cmd(&["SET", "dropped", "1"]);
    assert_eq!(client.cmd_text(&["DISCARD"]), "OK");
    assert_eq!(client.cmd(&["GET", "dropped"]), RespFrame::null_bulk());
}

#[test]
fn config_get_and_info() {
    let addr = start_server(master_config());
    let mut client = Client::connect(addr);

    match client.cmd(&["CONFIG", "GET", "dbfilename"]) {
        RespFrame::Array(Some(pair)) => {
            assert_eq!(pair[1].as_bytes(), Some(b"dump.rdb".as_ref()));
        }
        other => panic!("unexpected CONFIG reply: {:?}", other),
    }

    let info = client.cmd_text(&["INFO", "replication"]);
    assert!(info.contains("role:master"));
}

#[test]
fn wait_with_no_replicas_returns_zero() {
    let addr = start_server(master_config());
    let mut client = Client::connect(addr);
    assert_eq!(client.cmd(&["WAIT", "0", "100"]), RespFrame::Integer(0));
}

#[test]
fn replica_receives_propagated_writes() {
    let master_addr = start_server(master_config());
    let replica_addr = start_server(replica_config(master_addr));

    // Wait for the handshake to land
    let mut replica = Client::connect(replica_addr);
    assert!(wait_until(Duration::from_secs(5), || {
        replica.cmd_text(&["INFO", "replication"]).contains("role:slave")
    }));

    let mut master = Client::connect(master_addr);
    thread::sleep(Duration::from_millis(200));
    assert_eq!(master.cmd_text(&["SET", "shared", "42"]), "OK");

    assert!(wait_until(Duration::from_secs(5), || {
        replica.cmd_text(&["GET", "shared"]) == "42"
    }));
}

#[test]
fn wait_reaches_quorum_after_ack() {
    let master_addr = start_server(master_config());
    let _replica_addr = start_server(replica_config(master_addr));

    let mut master = Client::connect(master_addr);
    assert!(wait_until(Duration::from_secs(5), || {
        master.cmd_text(&["INFO", "replication"]).contains("connected_slaves:1")
    }));

    assert_eq!(master.cmd_text(&["SET", "quorum", "1"]), "OK");
    let reply = master.cmd(&["WAIT", "1", "3000"]);
    assert_eq!(reply, RespFrame::Integer(1));
}

#[test]
fn wait_times_out_against_dead_quorum() {
    let addr = start_server(master_config());
    let mut client = Client::connect(addr);
    client.cmd(&["SET", "k", "v"]);

    // Asking for more replicas than exist can only end by timeout
    let started = Instant::now();
    let reply = client.cmd(&["WAIT", "3", "150"]);
    assert_eq!(reply, RespFrame::Integer(0));
    assert!(started.elapsed() >= Duration::from_millis(120));
}
