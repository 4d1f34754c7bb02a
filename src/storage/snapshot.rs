//! Snapshot file loader
//!
//! Reads a dump file at startup and seeds the keyspace from it. Only the
//! subset of the format the server writes is understood: string values,
//! millisecond and second expiries, auxiliary fields and database headers.
//! A missing file is not an error; the server just starts empty.

use crate::error::{Result, RubidiumError};
use crate::storage::keyspace::Store;
use crate::storage::value::Value;
use std::fs;
use std::path::Path;

// Opcodes
const OP_AUX: u8 = 0xFA;
const OP_RESIZEDB: u8 = 0xFB;
const OP_EXPIRETIME_MS: u8 = 0xFC;
const OP_EXPIRETIME_S: u8 = 0xFD;
const OP_SELECTDB: u8 = 0xFE;
const OP_EOF: u8 = 0xFF;
const TYPE_STRING: u8 = 0x00;

/// Hex dump of an empty snapshot, sent to replicas on full resync
pub const EMPTY_SNAPSHOT_HEX: &str = "524544495330303131fa0972656469732d76657205372e322e30fa0a72656469732d62697473c040fa056374696d65c26d08bc65fa08757365642d6d656dc2b0c41000fa08616f662d62617365c000fff06e3bfec0ff5aa2";

/// The raw bytes of an empty snapshot
pub fn empty_snapshot_bytes() -> Result<Vec<u8>> {
    hex::decode(EMPTY_SNAPSHOT_HEX)
        .map_err(|e| RubidiumError::Internal(format!("bad builtin snapshot: {}", e)))
}

/// Load a snapshot file into the store. Returns the number of keys loaded,
/// or 0 if the file does not exist.
pub fn load_snapshot(path: &Path, store: &Store) -> Result<usize> {
    if !path.exists() {
        return Ok(0);
    }
    let data = fs::read(path)?;
    load_snapshot_bytes(&data, store)
}

/// Load snapshot bytes into the store
pub fn load_snapshot_bytes(data: &[u8], store: &Store) -> Result<usize> {
    let mut reader = SnapshotReader::new(data);
    reader.check_header()?;

    let mut loaded = 0;
    let mut pending_expiry_ms: Option<u64> = None;

    loop {
        let opcode = reader.read_u8()?;
        match opcode {
            OP_EOF => break,

            OP_AUX => {
                // Metadata key-value pair; skipped
                reader.read_string()?;
                reader.read_string()?;
            }

            OP_SELECTDB => {
                reader.read_length()?;
            }

            OP_RESIZEDB => {
                // Hash table size hints
                reader.read_length()?;
                reader.read_length()?;
            }

            OP_EXPIRETIME_MS => {
                pending_expiry_ms = Some(reader.read_u64_le()?);
            }

            OP_EXPIRETIME_S => {
                pending_expiry_ms = Some(reader.read_u32_le()? as u64 * 1000);
            }

            TYPE_STRING => {
                let key = reader.read_string()?;
                let value = reader.read_string()?;
                store.restore(key, Value::String(value), pending_expiry_ms.take())?;
                loaded += 1;
            }

            other => {
                return Err(RubidiumError::Protocol(format!(
                    "Unsupported snapshot opcode: 0x{:02x}",
                    other
                )));
            }
        }
    }

    Ok(loaded)
}

struct SnapshotReader<'a> {
    data: &'a [u8],
    pos: usize,
}

enum Length {
    Plain(usize),
    IntEncoded(u8),
}

impl<'a> SnapshotReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        SnapshotReader { data, pos: 0 }
    }

    fn check_header(&mut self) -> Result<()> {
        let header = self.take(9)?;
        if &header[..5] != b"REDIS" {
            return Err(RubidiumError::Protocol("Invalid snapshot magic".into()));
        }
        // Version digits follow; any version we can parse is accepted
        if !header[5..].iter().all(|b| b.is_ascii_digit()) {
            return Err(RubidiumError::Protocol("Invalid snapshot version".into()));
        }
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(RubidiumError::Protocol("Truncated snapshot".into()));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u32_le(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_u64_le(&mut self) -> Result<u64> {
        let bytes = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    /// Read a length field. The top two bits of the first byte select the
    /// encoding: 6-bit immediate, 14-bit, 32-bit big-endian, or a special
    /// integer-as-string marker.
    fn read_length_raw(&mut self) -> Result<Length> {
        let first = self.read_u8()?;
        match first >> 6 {
            0b00 => Ok(Length::Plain((first & 0x3F) as usize)),
            0b01 => {
                let second = self.read_u8()?;
                Ok(Length::Plain((((first & 0x3F) as usize) << 8) | second as usize))
            }
            0b10 => {
                let bytes = self.take(4)?;
                Ok(Length::Plain(u32::from_be_bytes([
                    bytes[0], bytes[1], bytes[2], bytes[3],
                ]) as usize))
            }
            _ => Ok(Length::IntEncoded(first & 0x3F)),
        }
    }

    fn read_length(&mut self) -> Result<usize> {
        match self.read_length_raw()? {
            Length::Plain(n) => Ok(n),
            Length::IntEncoded(_) => {
                Err(RubidiumError::Protocol("Integer encoding where length expected".into()))
            }
        }
    }

    /// Read a string, which may be length-prefixed raw bytes or an
    /// integer-encoded value rendered back to its decimal form
    fn read_string(&mut self) -> Result<Vec<u8>> {
        match self.read_length_raw()? {
            Length::Plain(len) => Ok(self.take(len)?.to_vec()),
            Length::IntEncoded(kind) => {
                let n: i64 = match kind {
                    0 => self.read_u8()? as i8 as i64,
                    1 => {
                        let bytes = self.take(2)?;
                        i16::from_le_bytes([bytes[0], bytes[1]]) as i64
                    }
                    2 => self.read_u32_le()? as i32 as i64,
                    other => {
                        return Err(RubidiumError::Protocol(format!(
                            "Unsupported string encoding: {}",
                            other
                        )))
                    }
                };
                Ok(n.to_string().into_bytes())
            }
        }
    }
}
