//! Server network layer: one thread multiplexing every player's descriptors
//!
//! The [`IoModule`] owns the listening socket and the live [`PlayerSet`].
//! Its thread repeats one cycle until stopped:
//! 1. re-arm read interest for the listener and every player, and write
//!    interest for players whose outbound queue is non-empty
//! 2. wait for readiness, bounded by the configured poll timeout
//! 3. accept one pending connection if the listener is ready
//! 4. read from each readable player, queueing a frame once it is complete
//! 5. write queued events to each writable player until it would block
//! 6. sweep players whose connection closed out of the live set
//!
//! Every descriptor is non-blocking, and a frame that moves only partly is
//! resumed on a later pass, so a stalled peer never holds the thread. A
//! failing player only invalidates itself. A failing readiness wait is
//! fatal: the thread records the error, clears its running flag and exits.

use crate::config::IoConfig;
use crate::players::{Event, Player, PlayerId, PlayerSet};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use polling::{Event as Readiness, Poller};
use shared::{Connection, Connector, Listener, NetError};
use std::collections::HashMap;
use std::io::{self, ErrorKind};
use std::net::{SocketAddr, ToSocketAddrs};
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Poller key of the listening socket. `usize::MAX` is reserved by the poller.
const LISTENER_KEY: usize = usize::MAX - 1;

/// Key for a player's read end (or its only descriptor, for sockets).
fn read_key(id: PlayerId) -> usize {
    (id as usize) * 2
}

/// Key for a player's pipe write end.
fn write_key(id: PlayerId) -> usize {
    read_key(id) + 1
}

/// State shared between the owner and the I/O thread.
#[derive(Debug)]
struct Shared {
    running: AtomicBool,
    players: PlayerSet,
    next_id: AtomicU64,
    local_addr: Mutex<Option<SocketAddr>>,
    fault: Mutex<Option<NetError>>,
}

impl Shared {
    /// Wraps a connection in a new player and adds it to the live set.
    fn admit(&self, connection: Connection) -> Arc<Player> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let player = Arc::new(Player::new(id, connection));
        self.players.insert(Arc::clone(&player));
        player
    }

    /// Stores a fatal multiplexing error for the owner and stops the loop.
    fn record_fault(&self, e: io::Error) {
        error!("Readiness poll failed, stopping I/O thread: {}", e);
        *self.fault.lock() = Some(NetError::Multiplex(e));
        self.running.store(false, Ordering::Release);
    }
}

/// Multiplexed session I/O for any number of players on one thread.
#[derive(Debug)]
pub struct IoModule {
    config: IoConfig,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl IoModule {
    pub fn new(config: IoConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                players: PlayerSet::new(),
                next_id: AtomicU64::new(1),
                local_addr: Mutex::new(None),
                fault: Mutex::new(None),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Opens the listener (if one is configured) and spawns the I/O thread.
    /// Does nothing if the thread is already running.
    pub fn start(&self) -> Result<(), NetError> {
        let mut worker = self.worker.lock();
        if self.shared.running.load(Ordering::Acquire) {
            return Ok(());
        }

        // A previous thread may have exited on its own after a fault.
        if let Some(handle) = worker.take() {
            if handle.join().is_err() {
                error!("Previous I/O thread panicked");
            }
        }

        let listener = match self.config.listen {
            Some(addr) => {
                let mut listener = Listener::new(addr).with_backlog(self.config.backlog);
                listener.open_socket()?;
                listener.set_nonblocking(true).map_err(NetError::Socket)?;
                Some(listener)
            }
            None => None,
        };
        let poller = Poller::new().map_err(NetError::Multiplex)?;

        *self.shared.local_addr.lock() = listener.as_ref().and_then(Listener::local_addr);
        self.shared.running.store(true, Ordering::Release);

        let io_loop = IoLoop {
            shared: Arc::clone(&self.shared),
            listener,
            poller,
            poll_timeout: self.config.poll_timeout,
            events: Vec::new(),
            registered: HashMap::new(),
        };

        let handle = thread::Builder::new()
            .name("io".to_string())
            .spawn(move || io_loop.run())
            .map_err(|source| {
                self.shared.running.store(false, Ordering::Release);
                NetError::Spawn { name: "io", source }
            })?;
        *worker = Some(handle);

        info!("I/O module started");
        Ok(())
    }

    /// Stops the I/O thread and waits for it to exit. Safe to call repeatedly.
    pub fn stop(&self) {
        let mut worker = self.worker.lock();
        self.shared.running.store(false, Ordering::Release);

        if let Some(handle) = worker.take() {
            if handle.join().is_err() {
                error!("I/O thread panicked");
            }
            info!("I/O module stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Handle to the live player set.
    pub fn players(&self) -> PlayerSet {
        self.shared.players.clone()
    }

    /// Address the listener is bound to while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.shared.local_addr.lock()
    }

    /// Takes the error that stopped the I/O thread, if it stopped on its own.
    pub fn take_fault(&self) -> Option<NetError> {
        self.shared.fault.lock().take()
    }

    #[cfg(test)]
    pub(crate) fn record_fault(&self, e: io::Error) {
        self.shared.record_fault(e);
    }

    /// Adds an established connection as a new player.
    pub fn attach(&self, connection: Connection) -> Arc<Player> {
        let player = self.shared.admit(connection);
        info!("Player {} attached", player.id());
        player
    }

    /// Dials `addr` and adds the connection as a new player.
    pub fn connect<A: ToSocketAddrs>(&self, addr: A) -> Option<Arc<Player>> {
        let connection = Connector.connect(addr);
        if !connection.is_valid() {
            return None;
        }
        Some(self.attach(connection))
    }

    /// Creates an in-process session: the player end joins the live set and
    /// the far end is returned to the caller.
    pub fn attach_pipe(&self) -> Result<(Arc<Player>, Connection), NetError> {
        let (near, far) = Listener::try_get_pipe()?;
        Ok((self.attach(near), far))
    }
}

impl Drop for IoModule {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Descriptors a player was registered under.
#[derive(Debug, Clone, Copy)]
struct Registration {
    read_fd: RawFd,
    write_fd: RawFd,
}

/// State owned by the I/O thread.
struct IoLoop {
    shared: Arc<Shared>,
    listener: Option<Listener>,
    poller: Poller,
    poll_timeout: Duration,
    events: Vec<Readiness>,
    registered: HashMap<PlayerId, Registration>,
}

impl IoLoop {
    fn run(mut self) {
        if let Some(fd) = self.listener.as_ref().and_then(Listener::raw_fd) {
            if let Err(e) = self.poller.add(fd, Readiness::readable(LISTENER_KEY)) {
                self.fail(e);
                return;
            }
        }

        while self.shared.running.load(Ordering::Acquire) {
            if let Err(e) = self.cycle() {
                self.fail(e);
                break;
            }
        }

        *self.shared.local_addr.lock() = None;
        debug!("I/O loop exited");
    }

    fn fail(&self, e: io::Error) {
        self.shared.record_fault(e);
    }

    /// One pass of the loop. Only a failed readiness wait is an error.
    fn cycle(&mut self) -> io::Result<()> {
        let players = self.shared.players.snapshot();
        for player in &players {
            self.arm(player);
        }

        if let Some(listener) = &self.listener {
            if let Some(fd) = listener.raw_fd() {
                self.poller
                    .modify(fd, Readiness::readable(LISTENER_KEY))?;
            }
        }

        self.events.clear();
        match self.poller.wait(&mut self.events, Some(self.poll_timeout)) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        let mut accept_ready = false;
        let mut readable = Vec::new();
        let mut writable = Vec::new();

        for event in &self.events {
            if event.key == LISTENER_KEY {
                accept_ready = event.readable;
                continue;
            }

            let id = (event.key / 2) as PlayerId;
            if event.key == write_key(id) {
                if event.writable {
                    writable.push(id);
                }
            } else {
                if event.readable {
                    readable.push(id);
                }
                if event.writable {
                    writable.push(id);
                }
            }
        }

        if accept_ready {
            self.accept();
        }

        let by_id: HashMap<PlayerId, &Arc<Player>> =
            players.iter().map(|player| (player.id(), player)).collect();

        for id in readable {
            if let Some(player) = by_id.get(&id) {
                Self::read_from(player);
            }
        }

        for id in writable {
            if let Some(player) = by_id.get(&id) {
                Self::write_to(player);
            }
        }

        self.sweep();
        Ok(())
    }

    /// Registers or re-arms a player's descriptors with its current interest.
    fn arm(&mut self, player: &Arc<Player>) {
        let Some((read_fd, write_fd)) = player.descriptors() else {
            return;
        };
        let id = player.id();
        let want_write = player.wants_write();
        let is_new = !self.registered.contains_key(&id);

        let result = if read_fd == write_fd {
            let interest = Readiness {
                key: read_key(id),
                readable: true,
                writable: want_write,
            };
            self.register(read_fd, interest, is_new)
        } else {
            let write_interest = Readiness {
                key: write_key(id),
                readable: false,
                writable: want_write,
            };
            self.register(read_fd, Readiness::readable(read_key(id)), is_new)
                .and_then(|()| self.register(write_fd, write_interest, is_new))
        };

        match result {
            Ok(()) => {
                self.registered
                    .insert(id, Registration { read_fd, write_fd });
            }
            Err(e) => {
                warn!("Cannot watch player {}, disconnecting: {}", id, e);
                player.close();
            }
        }
    }

    fn register(&self, fd: RawFd, interest: Readiness, is_new: bool) -> io::Result<()> {
        if is_new {
            self.poller.add(fd, interest)
        } else {
            self.poller.modify(fd, interest)
        }
    }

    fn accept(&mut self) {
        let Some(listener) = &self.listener else {
            return;
        };

        let connection = listener.accept();
        if !connection.is_valid() {
            return;
        }

        let peer = connection.peer_addr();
        let player = self.shared.admit(connection);
        match peer {
            Some(addr) => info!("Player {} connected from {}", player.id(), addr),
            None => info!("Player {} connected", player.id()),
        }
    }

    fn read_from(player: &Player) {
        if let Some(payload) = player.read_frame() {
            debug!("Player {}: received {} bytes", player.id(), payload.len());
            player.push_inbound(Event::message(payload));
        }
    }

    fn write_to(player: &Player) {
        player.flush_outbound();
    }

    fn sweep(&mut self) {
        for player in self.shared.players.sweep_disconnected() {
            // Closing the descriptors already dropped them from the poller.
            if let Some(registration) = self.registered.remove(&player.id()) {
                debug!(
                    "Player {}: forgot descriptors {}/{}",
                    player.id(),
                    registration.read_fd,
                    registration.write_fd
                );
            }
            info!("Player {} disconnected", player.id());
        }
    }
}
