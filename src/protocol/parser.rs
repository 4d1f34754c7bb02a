//! RESP protocol parser implementation
//!
//! Incremental parsing of RESP frames from an accumulating byte buffer.
//! Frames may arrive split across reads; a partial frame parses to `None`
//! and the caller retries once more bytes arrive. Every successful parse
//! reports the exact byte length consumed, which the replication subsystem
//! relies on for offset accounting.

use super::resp::RespFrame;
use crate::error::{Result, RubidiumError};
use std::sync::Arc;

/// Parser state for incremental RESP parsing
pub struct RespParser {
    buffer: Vec<u8>,
    position: usize,
}

impl RespParser {
    /// Create a new parser
    pub fn new() -> Self {
        RespParser {
            buffer: Vec::with_capacity(4096),
            position: 0,
        }
    }

    /// Feed data into the parser
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to parse a complete frame from the buffer.
    ///
    /// Returns the frame together with its encoded length in bytes.
    pub fn parse(&mut self) -> Result<Option<(RespFrame, usize)>> {
        if self.position >= self.buffer.len() {
            return Ok(None);
        }

        match parse_frame(&self.buffer[self.position..])? {
            Some((frame, consumed)) => {
                self.position += consumed;
                // Compact once more than half the buffer is dead
                if self.position > self.buffer.len() / 2 {
                    self.buffer.drain(..self.position);
                    self.position = 0;
                }
                Ok(Some((frame, consumed)))
            }
            None => Ok(None),
        }
    }

    /// Clear the parser buffer
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.position = 0;
    }

    /// Number of unconsumed bytes currently buffered
    pub fn pending(&self) -> usize {
        self.buffer.len() - self.position
    }
}

impl Default for RespParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a RESP frame from a byte slice.
/// Returns Some((frame, bytes_consumed)) if a complete frame is found.
pub fn parse_resp_frame(data: &[u8]) -> Result<Option<(RespFrame, usize)>> {
    parse_frame(data)
}

/// Internal frame parser
fn parse_frame(data: &[u8]) -> Result<Option<(RespFrame, usize)>> {
    if data.is_empty() {
        return Ok(None);
    }

    match data[0] {
        b'+' => parse_simple_string(data),
        b'-' => parse_error(data),
        b':' => parse_integer(data),
        b'$' => parse_bulk_string(data),
        b'*' => parse_array(data),
        _ => Err(RubidiumError::Protocol(format!(
            "Invalid RESP type byte: {}",
            data[0] as char
        ))),
    }
}

/// Parse a simple string: +OK\r\n
fn parse_simple_string(data: &[u8]) -> Result<Option<(RespFrame, usize)>> {
    parse_line(data, 1).map(|opt| {
        opt.map(|(line, consumed)| (RespFrame::SimpleString(Arc::new(line.to_vec())), consumed))
    })
}

/// Parse an error: -Error message\r\n
fn parse_error(data: &[u8]) -> Result<Option<(RespFrame, usize)>> {
    parse_line(data, 1).map(|opt| {
        opt.map(|(line, consumed)| (RespFrame::Error(Arc::new(line.to_vec())), consumed))
    })
}

/// Parse an integer: :1000\r\n
fn parse_integer(data: &[u8]) -> Result<Option<(RespFrame, usize)>> {
    parse_line(data, 1).and_then(|opt| {
        opt.map(|(line, consumed)| {
            let s = std::str::from_utf8(line)
                .map_err(|_| RubidiumError::Protocol("Invalid UTF-8 in integer".into()))?;
            let n = s
                .parse::<i64>()
                .map_err(|_| RubidiumError::Protocol("Invalid integer format".into()))?;
            Ok((RespFrame::Integer(n), consumed))
        })
        .transpose()
    })
}

/// Parse a bulk string: $6\r\nfoobar\r\n or $-1\r\n (null)
///
/// The trailing CRLF is consumed when present, but a bulk string directly
/// followed by another frame's type byte is accepted too. Some clients send
/// loosely framed payloads where the terminator belongs to the next element.
fn parse_bulk_string(data: &[u8]) -> Result<Option<(RespFrame, usize)>> {
    let (len_line, header_consumed) = match parse_line(data, 1)? {
        Some(v) => v,
        None => return Ok(None),
    };

    let len_str = std::str::from_utf8(len_line)
        .map_err(|_| RubidiumError::Protocol("Invalid UTF-8 in bulk length".into()))?;
    let len = len_str
        .parse::<i64>()
        .map_err(|_| RubidiumError::Protocol("Invalid bulk string length".into()))?;

    if len == -1 {
        return Ok(Some((RespFrame::BulkString(None), header_consumed)));
    }

    if len < 0 {
        return Err(RubidiumError::Protocol("Invalid negative bulk string length".into()));
    }

    let len = len as usize;
    let body_end = header_consumed + len;

    // Need at least the payload plus one byte to decide how the frame ends
    if data.len() < body_end + 1 {
        return Ok(None);
    }

    let content = data[header_consumed..body_end].to_vec();
    let frame = RespFrame::BulkString(Some(Arc::new(content)));

    if data[body_end] == b'\r' {
        if data.len() < body_end + 2 {
            return Ok(None); // Need the \n
        }
        if data[body_end + 1] != b'\n' {
            return Err(RubidiumError::Protocol("Missing CRLF after bulk string".into()));
        }
        Ok(Some((frame, body_end + 2)))
    } else {
        // Terminator consumed by the next element's framing
        Ok(Some((frame, body_end)))
    }
}

/// Parse an array: *2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n
fn parse_array(data: &[u8]) -> Result<Option<(RespFrame, usize)>> {
    let (len_line, header_consumed) = match parse_line(data, 1)? {
        Some(v) => v,
        None => return Ok(None),
    };

    let len_str = std::str::from_utf8(len_line)
        .map_err(|_| RubidiumError::Protocol("Invalid UTF-8 in array length".into()))?;
    let len = len_str
        .parse::<i64>()
        .map_err(|_| RubidiumError::Protocol("Invalid array length".into()))?;

    if len == -1 {
        return Ok(Some((RespFrame::Array(None), header_consumed)));
    }

    if len < 0 {
        return Err(RubidiumError::Protocol("Invalid negative array length".into()));
    }

    let len = len as usize;
    let mut elements = Vec::with_capacity(len);
    let mut total_consumed = header_consumed;

    for _ in 0..len {
        match parse_frame(&data[total_consumed..])? {
            Some((frame, consumed)) => {
                elements.push(frame);
                total_consumed += consumed;
            }
            None => return Ok(None), // Need more data
        }
    }

    Ok(Some((RespFrame::Array(Some(elements)), total_consumed)))
}

/// Parse a line ending with \r\n
fn parse_line(data: &[u8], skip_prefix: usize) -> Result<Option<(&[u8], usize)>> {
    if data.len() < skip_prefix + 2 {
        return Ok(None);
    }

    for i in skip_prefix..data.len() - 1 {
        if data[i] == b'\r' && data[i + 1] == b'\n' {
            return Ok(Some((&data[skip_prefix..i], i + 2)));
        }
    }

    Ok(None) // Need more data
}
