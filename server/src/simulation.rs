//! Fixed-tick simulation driver
//!
//! [`Server`] owns a [`World`] and an [`IoModule`] and runs two threads: the
//! I/O thread and a tick thread. Each tick runs every entity once and then
//! sleeps away whatever is left of the period. A tick that takes longer than
//! the period is followed immediately by the next one; ticks are never
//! skipped, so under overload the loop free-runs below the target rate.

use crate::config::ServerConfig;
use crate::network::IoModule;
use crate::players::PlayerSet;
use crate::world::{Entity, World};
use log::{debug, error, info};
use parking_lot::Mutex;
use shared::NetError;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Ticks between two rate log lines.
const RATE_LOG_INTERVAL: u64 = 60;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    pub ticks: u64,
    /// Ticks whose work took at least one full period.
    pub overruns: u64,
}

#[derive(Debug, Default)]
struct Counters {
    ticks: AtomicU64,
    overruns: AtomicU64,
}

pub struct Server<M: Send + 'static> {
    tick_period: Duration,
    io: IoModule,
    world: Arc<Mutex<World<M>>>,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl<M: Send + 'static> Server<M> {
    pub fn new(config: ServerConfig, map: M) -> Self {
        Self::build(config, |_| map)
    }

    /// Creates the server, building the map from its I/O module. This is how
    /// a map gets hold of the live player set.
    pub fn build(config: ServerConfig, make_map: impl FnOnce(&IoModule) -> M) -> Self {
        let io = IoModule::new(config.io);
        let map = make_map(&io);

        Self {
            tick_period: config.tick_period,
            io,
            world: Arc::new(Mutex::new(World::new(map))),
            running: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
            ticker: Mutex::new(None),
        }
    }

    /// Adds an entity. It runs from the next tick on.
    pub fn add_entity(&self, entity: impl Entity<M> + 'static) {
        self.world.lock().add_entity(entity);
    }

    /// Runs `f` with the world locked, between two ticks.
    pub fn with_world<R>(&self, f: impl FnOnce(&mut World<M>) -> R) -> R {
        f(&mut self.world.lock())
    }

    /// Starts the I/O module and then the tick thread. When the tick thread
    /// is already up this only restarts an I/O thread that stopped on a fault.
    pub fn start(&self) -> Result<(), NetError> {
        let mut ticker = self.ticker.lock();
        if self.running.load(Ordering::Acquire) {
            return self.io.start();
        }

        self.io.start()?;
        self.running.store(true, Ordering::Release);

        let world = Arc::clone(&self.world);
        let running = Arc::clone(&self.running);
        let counters = Arc::clone(&self.counters);
        let period = self.tick_period;

        let spawned = thread::Builder::new()
            .name("tick".to_string())
            .spawn(move || run_tick_loop(world, running, counters, period));

        match spawned {
            Ok(handle) => {
                *ticker = Some(handle);
                info!(
                    "Server started at {:.1} ticks per second",
                    1.0 / period.as_secs_f64()
                );
                Ok(())
            }
            Err(source) => {
                self.running.store(false, Ordering::Release);
                self.io.stop();
                Err(NetError::Spawn {
                    name: "tick",
                    source,
                })
            }
        }
    }

    /// Stops the tick thread, waiting for the current tick, then the I/O
    /// module. No-op when stopped.
    pub fn stop(&self) {
        let mut ticker = self.ticker.lock();
        self.running.store(false, Ordering::Release);

        if let Some(handle) = ticker.take() {
            if handle.join().is_err() {
                error!("Tick thread panicked");
            }
            self.io.stop();
            info!("Server stopped");
        }
    }

    /// True while both the tick thread and the I/O thread are up.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) && self.io.is_running()
    }

    /// Takes the error that stopped the I/O thread, if it stopped on its own.
    pub fn take_fault(&self) -> Option<NetError> {
        self.io.take_fault()
    }

    pub fn stats(&self) -> TickStats {
        TickStats {
            ticks: self.counters.ticks.load(Ordering::Relaxed),
            overruns: self.counters.overruns.load(Ordering::Relaxed),
        }
    }

    pub fn io(&self) -> &IoModule {
        &self.io
    }

    pub fn players(&self) -> PlayerSet {
        self.io.players()
    }
}

impl<M: Send + 'static> Drop for Server<M> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_tick_loop<M>(
    world: Arc<Mutex<World<M>>>,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
    period: Duration,
) {
    let mut window_start = Instant::now();

    while running.load(Ordering::Acquire) {
        let tick_start = Instant::now();
        world.lock().tick();
        let ticks = counters.ticks.fetch_add(1, Ordering::Relaxed) + 1;

        let elapsed = tick_start.elapsed();
        if elapsed < period {
            thread::sleep(period - elapsed);
        } else {
            counters.overruns.fetch_add(1, Ordering::Relaxed);
        }

        if ticks % RATE_LOG_INTERVAL == 0 {
            let window = window_start.elapsed().as_secs_f64();
            debug!(
                "Tick {}: {:.1} ticks per second",
                ticks,
                RATE_LOG_INTERVAL as f64 / window
            );
            window_start = Instant::now();
        }
    }
}
