//! TCP listener for accepting client connections

use crate::error::{Result, RubidiumError};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};

/// Non-blocking TCP listener wrapper
pub struct Listener {
    listener: TcpListener,
}

impl Listener {
    /// Bind to the given address in non-blocking mode
    pub fn bind(bind_addr: &str, port: u16) -> Result<Self> {
        let addr = format!("{}:{}", bind_addr, port);
        let listener = TcpListener::bind(&addr)
            .map_err(|e| RubidiumError::Io(format!("Failed to bind to {}: {}", addr, e)))?;
        listener.set_nonblocking(true)?;

        println!("Rubidium listening on {}", addr);
        Ok(Listener { listener })
    }

    /// Accept a new connection; None if none is pending
    pub fn accept(&self) -> Result<Option<(TcpStream, SocketAddr)>> {
        match self.listener.accept() {
            Ok((stream, addr)) => Ok(Some((stream, addr))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(Into::into)
    }
}
