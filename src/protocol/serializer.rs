//! RESP protocol serializer implementation

use super::resp::RespFrame;
use crate::error::Result;
use std::io::Write;

/// Serialize a RESP frame to a writer
pub fn serialize_resp_frame<W: Write>(frame: &RespFrame, writer: &mut W) -> Result<()> {
    match frame {
        RespFrame::SimpleString(bytes) => {
            writer.write_all(b"+")?;
            writer.write_all(bytes)?;
            writer.write_all(b"\r\n")?;
        }

        RespFrame::Error(bytes) => {
            writer.write_all(b"-")?;
            writer.write_all(bytes)?;
            writer.write_all(b"\r\n")?;
        }

        RespFrame::Integer(n) => {
            writer.write_all(b":")?;
            writer.write_all(n.to_string().as_bytes())?;
            writer.write_all(b"\r\n")?;
        }

        RespFrame::BulkString(opt) => match opt {
            Some(bytes) => {
                writer.write_all(b"$")?;
                writer.write_all(bytes.len().to_string().as_bytes())?;
                writer.write_all(b"\r\n")?;
                writer.write_all(bytes)?;
                writer.write_all(b"\r\n")?;
            }
            None => {
                writer.write_all(b"$-1\r\n")?;
            }
        },

        RespFrame::Array(opt) => match opt {
            Some(frames) => {
                writer.write_all(b"*")?;
                writer.write_all(frames.len().to_string().as_bytes())?;
                writer.write_all(b"\r\n")?;
                for frame in frames {
                    serialize_resp_frame(frame, writer)?;
                }
            }
            None => {
                writer.write_all(b"*-1\r\n")?;
            }
        },
    }

    Ok(())
}

/// Serialize a RESP frame to a byte vector
pub fn serialize_to_vec(frame: &RespFrame) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    serialize_resp_frame(frame, &mut buf)?;
    Ok(buf)
}
