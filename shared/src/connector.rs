//! Active endpoint acquisition

use crate::connection::Connection;
use log::{debug, warn};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Dials TCP peers. Failures come back as an invalid [`Connection`].
#[derive(Debug, Default, Clone, Copy)]
pub struct Connector;

impl Connector {
    /// Connects synchronously, trying each resolved address in turn.
    pub fn connect<A: ToSocketAddrs>(&self, addr: A) -> Connection {
        match TcpStream::connect(addr) {
            Ok(stream) => {
                if let Ok(peer) = stream.peer_addr() {
                    debug!("Connected to {}", peer);
                }
                Connection::from_stream(stream)
            }
            Err(e) => {
                warn!("Connect failed: {}", e);
                Connection::default()
            }
        }
    }

    /// Like [`Connector::connect`] but gives up after `timeout`.
    pub fn connect_timeout(&self, addr: &SocketAddr, timeout: Duration) -> Connection {
        match TcpStream::connect_timeout(addr, timeout) {
            Ok(stream) => Connection::from_stream(stream),
            Err(e) => {
                warn!("Connect to {} failed: {}", addr, e);
                Connection::default()
            }
        }
    }
}
