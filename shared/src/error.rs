//! Errors surfaced to callers that set up transports and I/O threads.
//!
//! Faults on an established connection never appear here: they invalidate
//! the connection instead and are observed through `is_valid()`.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("failed to create socket: {0}")]
    Socket(#[source] io::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to listen on {addr}: {source}")]
    Listen {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to allocate pipe: {0}")]
    Pipe(#[source] io::Error),

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("readiness poller failed: {0}")]
    Multiplex(#[source] io::Error),
}

impl NetError {
    /// Returns true for faults caused by the host's resources rather than by
    /// configuration, i.e. the ones worth retrying.
    pub fn is_resource_fault(&self) -> bool {
        matches!(
            self,
            NetError::Socket(_) | NetError::Pipe(_) | NetError::Spawn { .. }
        )
    }
}
