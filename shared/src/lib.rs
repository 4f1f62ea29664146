//! Transport layer shared by the server and its clients
//!
//! A [`Connection`] is a framed duplex byte channel over either a TCP socket
//! or a pair of OS pipes. [`Listener`] and [`Connector`] produce them; the
//! server's I/O thread and the terminal client both speak to peers only
//! through `send`/`receive` on a connection.

pub mod connection;
pub mod connector;
pub mod error;
pub mod listener;
pub mod packets;

pub use connection::{
    Connection, FrameReader, FrameWriter, ReadProgress, TransportKind, WriteProgress,
    LENGTH_PREFIX_LEN, MAX_FRAME_LEN,
};
pub use connector::Connector;
pub use error::NetError;
pub use listener::{Listener, DEFAULT_BACKLOG};
pub use packets::Packet;
