use log::{debug, info};
use shared::{Connection, Connector, Packet};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("could not connect to {0}")]
    Connect(String),

    #[error("server closed the connection")]
    Closed,

    #[error("malformed packet: {0}")]
    Codec(#[from] bincode::Error),
}

/// A lobby session that has completed the handshake.
#[derive(Debug)]
pub struct Client {
    connection: Connection,
    player_id: u64,
}

impl Client {
    /// Connects to `server`, introduces itself as `name` and waits for the
    /// server to assign a player id.
    pub fn connect(server: &str, name: &str) -> Result<Self, ClientError> {
        let mut connection = Connector.connect(server);
        if !connection.is_valid() {
            return Err(ClientError::Connect(server.to_string()));
        }

        send_packet(
            &mut connection,
            &Packet::Hello {
                name: name.to_string(),
            },
        )?;

        loop {
            match receive_packet(&mut connection)? {
                Some(Packet::Welcome { player_id }) => {
                    info!("Connected to {} as player {}", server, player_id);
                    return Ok(Self {
                        connection,
                        player_id,
                    });
                }
                Some(other) => debug!("Ignoring {:?} before welcome", other),
                None => return Err(ClientError::Closed),
            }
        }
    }

    /// Wraps a connection whose handshake already happened elsewhere.
    pub fn from_connection(connection: Connection, player_id: u64) -> Self {
        Self {
            connection,
            player_id,
        }
    }

    pub fn player_id(&self) -> u64 {
        self.player_id
    }

    /// Splits the session so one thread can type while another prints.
    pub fn split(self) -> Result<(ChatSender, ChatReceiver), ClientError> {
        let reader = self.connection.try_clone().ok_or(ClientError::Closed)?;
        Ok((
            ChatSender {
                connection: self.connection,
            },
            ChatReceiver { connection: reader },
        ))
    }
}

/// Sending half of a split session.
#[derive(Debug)]
pub struct ChatSender {
    connection: Connection,
}

impl ChatSender {
    pub fn say(&mut self, text: &str) -> Result<(), ClientError> {
        send_packet(
            &mut self.connection,
            &Packet::Say {
                text: text.to_string(),
            },
        )
    }

    /// Leaves the lobby. The receiving half sees the session end.
    pub fn quit(mut self) {
        self.connection.close();
    }
}

/// Receiving half of a split session.
#[derive(Debug)]
pub struct ChatReceiver {
    connection: Connection,
}

impl ChatReceiver {
    /// Blocks for the next packet. `Ok(None)` once the session has ended.
    pub fn next_packet(&mut self) -> Result<Option<Packet>, ClientError> {
        receive_packet(&mut self.connection)
    }
}

fn send_packet(connection: &mut Connection, packet: &Packet) -> Result<(), ClientError> {
    connection.send(&packet.encode()?);
    if connection.is_valid() {
        Ok(())
    } else {
        Err(ClientError::Closed)
    }
}

fn receive_packet(connection: &mut Connection) -> Result<Option<Packet>, ClientError> {
    let payload = connection.receive();
    if !connection.is_valid() {
        // A frame cut short by a failure is not worth decoding.
        return Ok(None);
    }
    Ok(Some(Packet::decode(&payload)?))
}
