//! Storage layer
//!
//! The in-memory keyspace, its value types, the stream log and the
//! snapshot loader used to seed the keyspace at startup.

pub mod keyspace;
pub mod snapshot;
pub mod stream;
pub mod value;

pub use keyspace::Store;
pub use stream::{AppendId, StreamEntry, StreamId, StreamLog};
pub use value::{now_ms, StoredValue, Value, ValueType};
