//! Replica-side link to the master
//!
//! A replica opens one outbound connection, performs the PSYNC handshake,
//! loads the snapshot the master sends and then applies the command stream
//! on a dedicated thread. The replica counts every byte of every frame it
//! processes; REPLCONF GETACK is answered with the offset as it stood
//! before the GETACK frame itself is counted.

use crate::commands::{apply_replicated, frame_to_parts, verb_of, ServerContext};
use crate::config::MasterAddr;
use crate::error::{Result, RubidiumError};
use crate::protocol::{serialize_to_vec, RespFrame, RespParser};
use crate::storage::snapshot::load_snapshot_bytes;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;

pub struct ReplicaClient;

impl ReplicaClient {
    /// Spawn the master link thread. It reconnect-loops are out of scope;
    /// a broken link logs and ends the thread.
    pub fn spawn(
        ctx: Arc<ServerContext>,
        master: MasterAddr,
        listening_port: u16,
    ) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            if let Err(err) = run_link(&ctx, &master, listening_port) {
                eprintln!("Replication link to {}:{} failed: {}", master.host, master.port, err);
            }
        })
    }
}

fn run_link(ctx: &ServerContext, master: &MasterAddr, listening_port: u16) -> Result<()> {
    let stream = TcpStream::connect((master.host.as_str(), master.port))?;
    let mut link = LinkReader::new(stream);

    handshake(&mut link, listening_port)?;
    let mut offset = receive_full_resync(ctx, &mut link)?;
    println!("Full resync from {}:{} complete, offset {}", master.host, master.port, offset);

    // Carry over bytes read past the snapshot, then stream commands
    let mut parser = RespParser::new();
    parser.feed(link.remainder());

    let mut read_buf = [0u8; 4096];
    loop {
        while let Some((frame, consumed)) = parser.parse()? {
            offset = process_frame(ctx, &mut link, frame, consumed, offset)?;
        }

        let n = link.stream.read(&mut read_buf)?;
        if n == 0 {
            return Err(RubidiumError::Connection("master closed the link".into()));
        }
        parser.feed(&read_buf[..n]);
    }
}

/// Apply one frame from the master and advance the offset past it
fn process_frame(
    ctx: &ServerContext,
    link: &mut LinkReader,
    frame: RespFrame,
    consumed: usize,
    offset: u64,
) -> Result<u64> {
    let parts = frame_to_parts(&frame)?;
    if is_getack(&parts) {
        // Answered with the offset before this frame counts
        let ack = ack_frame(offset);
        link.stream.write_all(&serialize_to_vec(&ack)?)?;
    } else if let Err(err) = apply_replicated(ctx, &parts) {
        eprintln!("Failed to apply replicated {}: {}", verb_of(&parts), err);
    }
    Ok(offset + consumed as u64)
}

fn is_getack(parts: &[Vec<u8>]) -> bool {
    parts.len() == 3
        && verb_of(parts) == "REPLCONF"
        && parts[1].eq_ignore_ascii_case(b"GETACK")
}

fn ack_frame(offset: u64) -> RespFrame {
    RespFrame::command(&["REPLCONF", "ACK", &offset.to_string()])
}

/// PING, REPLCONF listening-port, REPLCONF capa, PSYNC
fn handshake(link: &mut LinkReader, listening_port: u16) -> Result<()> {
    link.send(&RespFrame::command(&["PING"]))?;
    link.expect_simple_reply("PONG")?;

    let port = listening_port.to_string();
    link.send(&RespFrame::command(&["REPLCONF", "listening-port", &port]))?;
    link.expect_simple_reply("OK")?;

    link.send(&RespFrame::command(&["REPLCONF", "capa", "psync2"]))?;
    link.expect_simple_reply("OK")?;

    link.send(&RespFrame::command(&["PSYNC", "?", "-1"]))?;
    Ok(())
}

/// Read +FULLRESYNC and the snapshot payload, seed the keyspace, and
/// return the starting offset
fn receive_full_resync(ctx: &ServerContext, link: &mut LinkReader) -> Result<u64> {
    let line = link.read_line()?;
    let text = String::from_utf8_lossy(&line);
    if !text.starts_with("+FULLRESYNC") {
        return Err(RubidiumError::Protocol(format!("Expected FULLRESYNC, got {:?}", text)));
    }
    let offset = text
        .rsplit(' ')
        .next()
        .and_then(|o| o.parse::<u64>().ok())
        .ok_or_else(|| RubidiumError::Protocol("Malformed FULLRESYNC reply".into()))?;

    // Snapshot payload: $<len>\r\n followed by exactly len raw bytes,
    // no trailing CRLF
    let header = link.read_line()?;
    if header.first() != Some(&b'$') {
        return Err(RubidiumError::Protocol("Expected snapshot bulk header".into()));
    }
    let len = String::from_utf8_lossy(&header[1..])
        .parse::<usize>()
        .map_err(|_| RubidiumError::Protocol("Invalid snapshot length".into()))?;

    let payload = link.take(len)?;
    let loaded = load_snapshot_bytes(&payload, &ctx.store)?;
    if loaded > 0 {
        println!("Loaded {} keys from master snapshot", loaded);
    }

    Ok(offset)
}

/// Buffered reads over the master socket. Handshake replies and the
/// snapshot payload are framed by hand; afterwards the leftover bytes are
/// handed to the RESP parser.
struct LinkReader {
    stream: TcpStream,
    buf: Vec<u8>,
    pos: usize,
}

impl LinkReader {
    fn new(stream: TcpStream) -> Self {
        LinkReader {
            stream,
            buf: Vec::new(),
            pos: 0,
        }
    }

    fn send(&mut self, frame: &RespFrame) -> Result<()> {
        self.stream.write_all(&serialize_to_vec(frame)?)?;
        Ok(())
    }

    fn fill(&mut self) -> Result<()> {
        let mut chunk = [0u8; 4096];
        let n = self.stream.read(&mut chunk)?;
        if n == 0 {
            return Err(RubidiumError::Connection("master closed the link".into()));
        }
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(())
    }

    /// Read up to and including the next CRLF, returning the line without it
    fn read_line(&mut self) -> Result<Vec<u8>> {
        loop {
            let buf = &self.buf[self.pos..];
            if let Some(idx) = buf.windows(2).position(|w| w == b"\r\n") {
                let line = buf[..idx].to_vec();
                self.pos += idx + 2;
                return Ok(line);
            }
            self.fill()?;
        }
    }

    /// Read exactly n raw bytes
    fn take(&mut self, n: usize) -> Result<Vec<u8>> {
        while self.buf.len() - self.pos < n {
            self.fill()?;
        }
        let bytes = self.buf[self.pos..self.pos + n].to_vec();
        self.pos += n;
        Ok(bytes)
    }

    /// Unconsumed bytes left over once hand framing ends
    fn remainder(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    fn expect_simple_reply(&mut self, expected: &str) -> Result<()> {
        let line = self.read_line()?;
        let text = String::from_utf8_lossy(&line);
        if text.trim_start_matches('+') != expected {
            return Err(RubidiumError::Protocol(format!(
                "Unexpected handshake reply: {:?}",
                text
            )));
        }
        Ok(())
    }
}
