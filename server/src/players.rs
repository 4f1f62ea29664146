//! Per-session state and the live player set
//!
//! A [`Player`] pairs one [`Connection`] with two message queues. The I/O
//! thread is the only user of the connection; game logic on other threads
//! talks to the player purely through the queues:
//! - `inbound` holds frames received from the peer, oldest first
//! - `outbound` holds frames waiting to be written, sent in FIFO order
//!
//! Each queue has its own lock, so inbound and outbound traffic never
//! contend, and neither contends with the [`PlayerSet`] list lock.
//!
//! A player's descriptors are non-blocking. Frames that arrive or leave in
//! pieces are carried across I/O passes in the player's frame state, so a
//! peer that stalls mid-frame holds up nobody else.

use log::{debug, info, warn};
use parking_lot::Mutex;
use shared::{
    Connection, FrameReader, FrameWriter, ReadProgress, TransportKind, WriteProgress,
};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub type PlayerId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Message,
}

/// One application message travelling through a player queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub payload: Vec<u8>,
}

impl Event {
    pub fn message(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: EventKind::Message,
            payload: payload.into(),
        }
    }

    /// An empty message. Sending it writes the close signal, which ends the
    /// session once every message queued before it has gone out.
    pub fn close() -> Self {
        Self::message(Vec::new())
    }

    pub fn is_close(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Frames sent to one writable player before the I/O thread moves on.
const MAX_FRAMES_PER_FLUSH: usize = 64;

/// The connection plus any frame caught halfway through.
#[derive(Debug)]
struct Session {
    connection: Connection,
    reading: FrameReader,
    writing: FrameWriter,
}

/// One connected client's session.
#[derive(Debug)]
pub struct Player {
    id: PlayerId,
    peer: Option<SocketAddr>,
    kind: Option<TransportKind>,
    session: Mutex<Session>,
    /// Mirrors `connection.is_valid()` after every I/O call, so other threads
    /// can check liveness without touching the connection lock.
    connected: AtomicBool,
    inbound: Mutex<VecDeque<Event>>,
    outbound: Mutex<VecDeque<Event>>,
}

impl Player {
    pub(crate) fn new(id: PlayerId, mut connection: Connection) -> Self {
        if let Err(e) = connection.set_nonblocking(true) {
            warn!("Player {}: cannot make descriptors non-blocking: {}", id, e);
            connection.close();
        }

        Self {
            id,
            peer: connection.peer_addr(),
            kind: connection.kind(),
            connected: AtomicBool::new(connection.is_valid()),
            session: Mutex::new(Session {
                connection,
                reading: FrameReader::new(),
                writing: FrameWriter::new(),
            }),
            inbound: Mutex::new(VecDeque::new()),
            outbound: Mutex::new(VecDeque::new()),
        }
    }

    pub fn id(&self) -> PlayerId {
        self.id
    }

    /// Remote address for socket sessions.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn transport_kind(&self) -> Option<TransportKind> {
        self.kind
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Queues an event for the I/O thread to send.
    pub fn send(&self, event: Event) {
        self.outbound.lock().push_back(event);
    }

    /// Queues the close signal behind everything already queued.
    pub fn disconnect(&self) {
        self.send(Event::close());
    }

    /// Takes the oldest received event, if any.
    pub fn recv(&self) -> Option<Event> {
        self.inbound.lock().pop_front()
    }

    /// Takes every received event, oldest first.
    pub fn drain_inbound(&self) -> Vec<Event> {
        self.inbound.lock().drain(..).collect()
    }

    pub fn inbound_len(&self) -> usize {
        self.inbound.lock().len()
    }

    pub fn outbound_len(&self) -> usize {
        self.outbound.lock().len()
    }

    pub(crate) fn push_inbound(&self, event: Event) {
        self.inbound.lock().push_back(event);
    }

    pub(crate) fn pop_outbound(&self) -> Option<Event> {
        self.outbound.lock().pop_front()
    }

    /// True while a frame is queued or partly written.
    pub(crate) fn wants_write(&self) -> bool {
        !self.session.lock().writing.is_idle() || !self.outbound.lock().is_empty()
    }

    /// Read and write descriptors, equal for sockets. `None` once closed.
    pub(crate) fn descriptors(&self) -> Option<(RawFd, RawFd)> {
        let session = self.session.lock();
        let connection = &session.connection;
        connection.read_fd().zip(connection.write_fd())
    }

    /// Reads what the descriptor has without blocking. Returns a payload once
    /// a frame is complete, or the partial payload of a frame cut short by a
    /// failure.
    pub(crate) fn read_frame(&self) -> Option<Vec<u8>> {
        let mut session = self.session.lock();
        let Session {
            connection,
            reading,
            ..
        } = &mut *session;

        let payload = match connection.try_receive(reading) {
            ReadProgress::Pending => None,
            ReadProgress::Frame(payload) => Some(payload),
            ReadProgress::Closed(partial) => (!partial.is_empty()).then_some(partial),
        };
        self.connected
            .store(connection.is_valid(), Ordering::Release);
        payload
    }

    /// Writes queued events until the descriptor would block, the queue is
    /// empty or the connection closes. A frame the descriptor only partly
    /// took is finished on a later call before the next event is popped.
    pub(crate) fn flush_outbound(&self) {
        let mut session = self.session.lock();
        let Session {
            connection,
            writing,
            ..
        } = &mut *session;

        for _ in 0..MAX_FRAMES_PER_FLUSH {
            if writing.is_idle() {
                // Pop under the queue lock, write after releasing it.
                let Some(event) = self.pop_outbound() else {
                    break;
                };
                if event.is_close() {
                    debug!("Player {}: closing on request", self.id);
                }
                connection.begin_frame(writing, &event.payload);
            }

            match connection.try_send(writing) {
                WriteProgress::Done => {}
                WriteProgress::Pending | WriteProgress::Closed => break,
            }
        }

        self.connected
            .store(connection.is_valid(), Ordering::Release);
    }

    /// Closes the connection without waiting for the outbound queue.
    pub(crate) fn close(&self) {
        self.session.lock().connection.close();
        self.connected.store(false, Ordering::Release);
    }
}

/// Handle to the live player set, shared by the I/O thread and game logic.
///
/// Membership is guarded by one list lock. Readers take a snapshot of
/// `Arc<Player>` handles and work on that, so the list lock is never held
/// while a player's queue lock is taken.
#[derive(Debug, Clone, Default)]
pub struct PlayerSet {
    players: Arc<Mutex<Vec<Arc<Player>>>>,
}

impl PlayerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<Arc<Player>> {
        self.players.lock().clone()
    }

    pub fn get(&self, id: PlayerId) -> Option<Arc<Player>> {
        self.players
            .lock()
            .iter()
            .find(|player| player.id == id)
            .cloned()
    }

    pub fn ids(&self) -> Vec<PlayerId> {
        self.players.lock().iter().map(|player| player.id).collect()
    }

    pub fn len(&self) -> usize {
        self.players.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.lock().is_empty()
    }

    /// Queues a copy of `event` for every live player.
    pub fn broadcast(&self, event: &Event) {
        for player in self.snapshot() {
            player.send(event.clone());
        }
    }

    pub(crate) fn insert(&self, player: Arc<Player>) {
        self.players.lock().push(player);
    }

    /// Removes players whose connection has closed and returns them.
    pub(crate) fn sweep_disconnected(&self) -> Vec<Arc<Player>> {
        let mut players = self.players.lock();
        if players.iter().all(|player| player.is_connected()) {
            return Vec::new();
        }

        let (live, gone): (Vec<_>, Vec<_>) = players
            .drain(..)
            .partition(|player| player.is_connected());
        *players = live;

        for player in &gone {
            info!("Player {} removed from live set", player.id);
        }
        gone
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Listener;
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};
    use std::thread;
    use std::time::Duration;

    fn pipe_player(id: PlayerId) -> (Arc<Player>, Connection) {
        let (near, far) = Listener::get_pipe();
        (Arc::new(Player::new(id, near)), far)
    }

    #[test]
    fn test_event_constructors() {
        let event = Event::message(vec![1, 2, 3]);
        assert_eq!(event.kind, EventKind::Message);
        assert!(!event.is_close());
        assert!(Event::close().is_close());
    }

    #[test]
    fn test_player_creation() {
        let (player, _far) = pipe_player(3);
        assert_eq!(player.id(), 3);
        assert!(player.is_connected());
        assert_eq!(player.transport_kind(), Some(TransportKind::Pipe));
        assert_eq!(player.peer_addr(), None);
        assert!(player.descriptors().is_some());

        let dead = Player::new(4, Connection::default());
        assert!(!dead.is_connected());
        assert!(dead.descriptors().is_none());
    }

    #[test]
    fn test_queues_are_fifo() {
        let (player, _far) = pipe_player(1);

        player.push_inbound(Event::message(b"first".to_vec()));
        player.push_inbound(Event::message(b"second".to_vec()));
        assert_eq!(player.inbound_len(), 2);
        assert_eq!(player.recv().unwrap().payload, b"first");
        assert_eq!(player.drain_inbound().len(), 1);
        assert!(player.recv().is_none());

        player.send(Event::message(b"a".to_vec()));
        player.disconnect();
        assert!(player.wants_write());
        assert_eq!(player.pop_outbound().unwrap().payload, b"a");
        assert!(player.pop_outbound().unwrap().is_close());
        assert!(!player.wants_write());
    }

    #[test]
    fn test_frame_io_updates_connected_flag() {
        let (player, mut far) = pipe_player(1);

        assert_eq!(player.read_frame(), None);
        far.send(b"hi");
        assert_eq!(player.read_frame(), Some(b"hi".to_vec()));
        assert!(player.is_connected());

        player.send(Event::message(b"back".to_vec()));
        player.flush_outbound();
        assert!(!player.wants_write());
        assert_eq!(far.receive(), b"back");

        far.close();
        assert_eq!(player.read_frame(), None);
        assert!(!player.is_connected());
    }

    #[test]
    fn test_split_frame_over_socket_does_not_block() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut raw = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (stream, _) = listener.accept().unwrap();
        let player = Player::new(1, Connection::from_stream(stream));

        // Half a length prefix, then silence.
        raw.write_all(&[0, 0]).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(player.read_frame(), None);
        assert!(player.is_connected());

        raw.write_all(&[0, 2, b'o', b'k']).unwrap();
        let mut frame = None;
        for _ in 0..200 {
            frame = player.read_frame();
            if frame.is_some() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(frame, Some(b"ok".to_vec()));
    }

    #[test]
    fn test_flush_parks_on_full_pipe_and_resumes() {
        let (player, mut far) = pipe_player(1);
        let big = vec![7u8; 256 * 1024];

        player.send(Event::message(big.clone()));
        player.send(Event::message(b"after".to_vec()));

        // Nobody reads, so the first frame cannot finish.
        player.flush_outbound();
        assert!(player.wants_write());
        assert_eq!(player.outbound_len(), 1);
        assert!(player.is_connected());

        let reader = thread::spawn(move || (far.receive(), far.receive()));
        while player.wants_write() {
            player.flush_outbound();
            thread::yield_now();
        }

        let (first, second) = reader.join().unwrap();
        assert_eq!(first, big);
        assert_eq!(second, b"after");
    }

    #[test]
    fn test_close_signal_waits_behind_full_pipe() {
        let (player, mut far) = pipe_player(1);
        let big = vec![3u8; 256 * 1024];

        player.send(Event::message(big.clone()));
        player.disconnect();

        player.flush_outbound();
        assert!(player.wants_write());
        assert!(player.is_connected());

        let reader = thread::spawn(move || {
            let first = far.receive();
            let second = far.receive();
            (first, second, far.is_valid())
        });
        while player.wants_write() {
            player.flush_outbound();
            thread::yield_now();
        }
        assert!(!player.is_connected());

        let (first, second, still_valid) = reader.join().unwrap();
        assert_eq!(first, big);
        assert!(second.is_empty());
        assert!(!still_valid);
    }

    #[test]
    fn test_sweep_removes_closed_players() {
        let set = PlayerSet::new();
        let (alive, _far_alive) = pipe_player(1);
        let (doomed, _far_doomed) = pipe_player(2);
        set.insert(Arc::clone(&alive));
        set.insert(Arc::clone(&doomed));

        assert!(set.sweep_disconnected().is_empty());

        doomed.close();
        let gone = set.sweep_disconnected();
        assert_eq!(gone.len(), 1);
        assert_eq!(gone[0].id(), 2);
        assert_eq!(set.ids(), vec![1]);
        assert!(set.get(2).is_none());
        assert!(set.get(1).is_some());
    }

    #[test]
    fn test_broadcast_reaches_every_player() {
        let set = PlayerSet::new();
        let players: Vec<_> = (1..=3).map(pipe_player).collect();
        for (player, _) in &players {
            set.insert(Arc::clone(player));
        }

        set.broadcast(&Event::message(b"all".to_vec()));
        for (player, _) in &players {
            assert_eq!(player.outbound_len(), 1);
        }
        assert_eq!(set.len(), 3);
        assert!(!set.is_empty());
    }

    #[test]
    fn test_queue_isolation_across_threads() {
        let (x, _far_x) = pipe_player(1);
        let (y, _far_y) = pipe_player(2);
        let count = 10_000;

        for i in 0..count {
            y.push_inbound(Event::message((i as u32).to_be_bytes().to_vec()));
        }

        let producer = {
            let x = Arc::clone(&x);
            thread::spawn(move || {
                for i in 0..count {
                    x.send(Event::message((i as u32).to_be_bytes().to_vec()));
                }
            })
        };
        let consumer = {
            let y = Arc::clone(&y);
            thread::spawn(move || {
                let mut drained = Vec::new();
                while let Some(event) = y.recv() {
                    drained.push(event);
                }
                drained
            })
        };

        producer.join().unwrap();
        let drained = consumer.join().unwrap();

        assert_eq!(drained.len(), count);
        assert_eq!(x.outbound_len(), count);
        for (i, event) in drained.iter().enumerate() {
            assert_eq!(event.payload, (i as u32).to_be_bytes());
        }
        for i in 0..count {
            assert_eq!(x.pop_outbound().unwrap().payload, (i as u32).to_be_bytes());
        }
    }
}
