//! Chat lobby run by the `server` binary
//!
//! [`Relay`] is an ordinary entity: it only touches players through their
//! queues. Each tick it greets new players, rebroadcasts what they say, and
//! announces players that have left the live set.

use crate::players::{Event, Player, PlayerId, PlayerSet};
use crate::world::Entity;
use log::{debug, error, info, warn};
use shared::Packet;
use std::collections::{HashMap, HashSet};

/// Map type for the lobby.
#[derive(Debug)]
pub struct Lobby {
    pub players: PlayerSet,
    pub tick: u64,
    names: HashMap<PlayerId, String>,
}

impl Lobby {
    pub fn new(players: PlayerSet) -> Self {
        Self {
            players,
            tick: 0,
            names: HashMap::new(),
        }
    }

    /// Name a player introduced itself with.
    pub fn name_of(&self, id: PlayerId) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }
}

fn to_event(packet: &Packet) -> Option<Event> {
    match packet.encode() {
        Ok(bytes) => Some(Event::message(bytes)),
        Err(e) => {
            error!("Failed to encode {:?}: {}", packet, e);
            None
        }
    }
}

#[derive(Debug, Default)]
pub struct Relay {
    known: HashSet<PlayerId>,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, lobby: &mut Lobby, player: &Player, packet: Packet) {
        let id = player.id();
        match packet {
            Packet::Hello { name } => {
                info!("Player {} joined as {:?}", id, name);
                lobby.names.insert(id, name);
                if let Some(event) = to_event(&Packet::Welcome { player_id: id }) {
                    player.send(event);
                }
            }
            Packet::Say { text } => {
                debug!("Player {} says {:?}", id, text);
                if let Some(event) = to_event(&Packet::Chat { from: id, text }) {
                    lobby.players.broadcast(&event);
                }
            }
            other => warn!("Player {} sent a server-only packet: {:?}", id, other),
        }
    }

    fn announce_departures(&mut self, lobby: &mut Lobby, live: &HashSet<PlayerId>) {
        let departed: Vec<PlayerId> = self.known.difference(live).copied().collect();
        for id in departed {
            self.known.remove(&id);
            let name = lobby.names.remove(&id);
            info!("Player {} ({:?}) left the lobby", id, name.unwrap_or_default());

            if let Some(event) = to_event(&Packet::Left { player_id: id }) {
                lobby.players.broadcast(&event);
            }
        }
    }
}

impl Entity<Lobby> for Relay {
    fn tick(&mut self, lobby: &mut Lobby) {
        lobby.tick += 1;

        let players = lobby.players.snapshot();
        let live: HashSet<PlayerId> = players.iter().map(|player| player.id()).collect();
        self.announce_departures(lobby, &live);

        for player in &players {
            self.known.insert(player.id());

            for event in player.drain_inbound() {
                match Packet::decode(&event.payload) {
                    Ok(packet) => self.handle(lobby, player, packet),
                    Err(e) => warn!("Player {} sent an undecodable frame: {}", player.id(), e),
                }
            }
        }
    }
}
