//! # Game Server Library
//!
//! Session handling and a fixed-tick simulation driver for a multiplayer game
//! server.
//!
//! ## Architecture
//!
//! Two OS threads do all the work:
//!
//! ### I/O Thread
//! The [`IoModule`] multiplexes every player's descriptors with a readiness
//! poller. It accepts new players, reads one frame per ready player into that
//! player's inbound queue, and writes queued outbound frames. There is no
//! thread per connection.
//!
//! ### Tick Thread
//! The [`Server`] runs every [`Entity`] in its [`World`] once per tick and
//! sleeps out the rest of the period. It never touches the network: game
//! logic reads and writes [`Player`] queues only.
//!
//! ## Module Organization
//!
//! - `config`: explicit settings for both threads
//! - `players`: [`Event`], [`Player`] and the live [`PlayerSet`]
//! - `network`: the I/O thread
//! - `world`: the [`Entity`] contract and the [`World`] it runs in
//! - `simulation`: the tick driver
//! - `relay`: the chat lobby the `server` binary runs
//!
//! ## Example
//!
//! ```no_run
//! use server::{Event, PlayerSet, Server, ServerConfig};
//!
//! let config = ServerConfig::listening("127.0.0.1:27010".parse().unwrap());
//! let server = Server::build(config, |io| io.players());
//! server.add_entity(|players: &mut PlayerSet| {
//!     for player in players.snapshot() {
//!         for event in player.drain_inbound() {
//!             player.send(Event::message(event.payload));
//!         }
//!     }
//! });
//! server.start().unwrap();
//! ```

pub mod config;
pub mod network;
pub mod players;
pub mod relay;
pub mod simulation;
pub mod world;

pub use config::{IoConfig, ServerConfig};
pub use network::IoModule;
pub use players::{Event, EventKind, Player, PlayerId, PlayerSet};
pub use relay::{Lobby, Relay};
pub use simulation::{Server, TickStats};
pub use world::{Entity, World};
