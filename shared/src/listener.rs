//! Passive endpoint acquisition: TCP accept and synthetic pipe pairs

use crate::connection::Connection;
use crate::error::NetError;
use log::{debug, info, warn};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, ErrorKind};
use std::net::{SocketAddr, TcpListener};
use std::os::fd::{AsRawFd, RawFd};

/// Pending-connection queue length used unless configured otherwise.
pub const DEFAULT_BACKLOG: i32 = 128;

/// A TCP listening socket bound to a fixed address.
///
/// The listener starts closed; [`Listener::open_socket`] binds and listens,
/// and may be called again to restart it.
#[derive(Debug)]
pub struct Listener {
    addr: SocketAddr,
    backlog: i32,
    socket: Option<TcpListener>,
}

impl Listener {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            backlog: DEFAULT_BACKLOG,
            socket: None,
        }
    }

    pub fn with_backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Creates, binds and listens. Any socket already open is closed first.
    /// On failure the listener is left closed.
    pub fn open_socket(&mut self) -> Result<(), NetError> {
        self.close_socket();

        let socket = Socket::new(
            Domain::for_address(self.addr),
            Type::STREAM,
            Some(Protocol::TCP),
        )
        .map_err(NetError::Socket)?;

        // Lets a restarted listener rebind while old sessions sit in TIME_WAIT.
        socket.set_reuse_address(true).map_err(NetError::Socket)?;

        socket
            .bind(&self.addr.into())
            .map_err(|source| NetError::Bind {
                addr: self.addr,
                source,
            })?;

        socket.listen(self.backlog).map_err(|source| NetError::Listen {
            addr: self.addr,
            source,
        })?;

        let listener: TcpListener = socket.into();
        info!(
            "Listening on {}",
            listener.local_addr().unwrap_or(self.addr)
        );
        self.socket = Some(listener);

        Ok(())
    }

    pub fn close_socket(&mut self) {
        if let Some(listener) = self.socket.take() {
            debug!("Closing listener on {}", self.addr);
            drop(listener);
        }
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    /// Address actually bound, which differs from the configured one when
    /// port 0 was requested.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    pub fn raw_fd(&self) -> Option<RawFd> {
        self.socket.as_ref().map(AsRawFd::as_raw_fd)
    }

    /// Switches the listening socket between blocking and non-blocking
    /// accepts. Does nothing while the listener is closed.
    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match &self.socket {
            Some(listener) => listener.set_nonblocking(nonblocking),
            None => Ok(()),
        }
    }

    /// Blocks until a peer connects. Returns an invalid connection if the
    /// listener is closed or the accept fails. In non-blocking mode it also
    /// returns an invalid connection when nobody is waiting.
    pub fn accept(&self) -> Connection {
        let Some(listener) = &self.socket else {
            return Connection::default();
        };

        loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    debug!("Accepted connection from {}", peer);
                    return Connection::from_stream(stream);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    return Connection::default();
                }
                Err(e) => {
                    warn!("Accept failed on {}: {}", self.addr, e);
                    return Connection::default();
                }
            }
        }
    }

    /// Creates two cross-wired pipe connections: whatever one end sends, the
    /// other receives. Both are invalid if the pipes cannot be allocated.
    pub fn get_pipe() -> (Connection, Connection) {
        match Self::try_get_pipe() {
            Ok(pair) => pair,
            Err(e) => {
                warn!("{}", e);
                (Connection::default(), Connection::default())
            }
        }
    }

    /// Like [`Listener::get_pipe`], but reports the allocation failure.
    pub fn try_get_pipe() -> Result<(Connection, Connection), NetError> {
        let (first_reader, first_writer) = io::pipe().map_err(NetError::Pipe)?;
        let (second_reader, second_writer) = io::pipe().map_err(NetError::Pipe)?;

        Ok((
            Connection::from_pipe(first_reader, second_writer),
            Connection::from_pipe(second_reader, first_writer),
        ))
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.close_socket();
    }
}
