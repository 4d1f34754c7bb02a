//! Network layer
//!
//! TCP listening, per-connection state and the polling event loop that
//! drives command dispatch, blocked clients and replica fan-out.

pub mod blocking;
pub mod connection;
pub mod listener;
pub mod server;

pub use blocking::{BlockingManager, StreamWaiter};
pub use connection::Connection;
pub use listener::Listener;
pub use server::Server;
