//! # Lobby Client Library
//!
//! A headless client for the chat lobby the `server` binary runs. It speaks
//! the same framed [`shared::Connection`] protocol as the server and carries
//! one bincode-encoded [`shared::Packet`] per frame.
//!
//! A session starts with a handshake: the client sends `Hello` with its name
//! and waits for `Welcome` carrying its player id. After that the session can
//! be [split](Client::split) into a sending half and a receiving half, so a
//! terminal front end can read stdin and print chat on separate threads.

pub mod network;

pub use network::{ChatReceiver, ChatSender, Client, ClientError};
