//! Per-client connection state
//!
//! Owns the socket, the incremental parser and the write buffer, plus the
//! command session (transaction state). Blocked and replica connections
//! stay in the connection table; flags tell the event loop how to treat
//! their input.

use crate::commands::Session;
use crate::error::{Result, RubidiumError};
use crate::protocol::{serialize_resp_frame, RespFrame, RespParser};
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};

pub struct Connection {
    pub id: u64,
    stream: TcpStream,
    pub addr: SocketAddr,
    parser: RespParser,
    write_buffer: Vec<u8>,

    /// Command state: transaction queue and connection id
    pub session: Session,

    /// Parked on XREAD BLOCK or WAIT; input is buffered but not dispatched
    pub blocked: bool,

    /// Promoted to a replica by PSYNC; only REPLCONF ACK is expected
    pub is_replica: bool,

    closing: bool,
}

impl Connection {
    pub fn new(id: u64, stream: TcpStream, addr: SocketAddr) -> Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;

        Ok(Connection {
            id,
            stream,
            addr,
            parser: RespParser::new(),
            write_buffer: Vec::with_capacity(4096),
            session: Session::new(id),
            blocked: false,
            is_replica: false,
            closing: false,
        })
    }

    /// Read available data into the parser. Returns false when the read
    /// would block.
    pub fn read(&mut self) -> Result<bool> {
        let mut buf = [0u8; 4096];
        match self.stream.read(&mut buf) {
            Ok(0) => {
                self.closing = true;
                Err(RubidiumError::Connection("Connection closed by peer".into()))
            }
            Ok(n) => {
                self.parser.feed(&buf[..n]);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(false),
            Err(e) => {
                self.closing = true;
                Err(e.into())
            }
        }
    }

    /// Next complete frame from the read buffer, with its encoded length
    pub fn parse_frame(&mut self) -> Result<Option<(RespFrame, usize)>> {
        self.parser.parse()
    }

    pub fn send_frame(&mut self, frame: &RespFrame) -> Result<()> {
        serialize_resp_frame(frame, &mut self.write_buffer)?;
        self.flush()
    }

    pub fn send_raw(&mut self, data: &[u8]) -> Result<()> {
        self.write_buffer.extend_from_slice(data);
        self.flush()
    }

    /// Write as much of the buffer as the socket accepts
    pub fn flush(&mut self) -> Result<()> {
        let mut written = 0;
        while written < self.write_buffer.len() {
            match self.stream.write(&self.write_buffer[written..]) {
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    self.closing = true;
                    return Err(e.into());
                }
            }
        }
        self.write_buffer.drain(..written);
        Ok(())
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.write_buffer.is_empty()
    }

    pub fn close(&mut self) {
        self.closing = true;
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }

    pub fn mark_closing(&mut self) {
        self.closing = true;
    }
}
