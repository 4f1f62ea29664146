use serde::{Deserialize, Serialize};

/// Application messages exchanged by the lobby demo, carried one per frame.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum Packet {
    // Client -> server
    Hello { name: String },
    Say { text: String },

    // Server -> client
    Welcome { player_id: u64 },
    Chat { from: u64, text: String },
    Left { player_id: u64 },
}

impl Packet {
    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}
