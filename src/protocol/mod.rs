//! RESP protocol implementation
//!
//! Frame types, an incremental parser and a serializer for the subset of
//! RESP the server speaks: simple strings, errors, integers, bulk strings
//! and arrays (recursively, including arrays of arrays for stream replies).

pub mod parser;
pub mod resp;
pub mod serializer;

pub use parser::{parse_resp_frame, RespParser};
pub use resp::RespFrame;
pub use serializer::{serialize_resp_frame, serialize_to_vec};
