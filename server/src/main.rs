use clap::Parser;
use log::{error, info, warn};
use server::{Lobby, Relay, Server, ServerConfig};
use shared::NetError;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// How often the main thread checks on the I/O thread while idle.
const WATCH_INTERVAL: Duration = Duration::from_millis(500);

const START_ATTEMPTS: u32 = 3;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[arg(short, long, default_value = "27010")]
    port: u16,
    /// Tick rate (updates per second)
    #[arg(short, long, default_value = "30")]
    tick_rate: u32,
    /// Pending connection queue length
    #[arg(short, long, default_value = "128")]
    backlog: i32,
}

/// Starts the lobby server and runs until Ctrl+C or an I/O fault.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;

    let mut config = ServerConfig::listening(addr).with_tick_rate(args.tick_rate);
    config.io.backlog = args.backlog;

    let server = Server::build(config, |io| Lobby::new(io.players()));
    server.add_entity(Relay::new());
    start_with_retry(&server)?;
    info!("Lobby listening on {}", server.io().local_addr().unwrap_or(addr));

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        let main_thread = thread::current();
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::SeqCst);
            main_thread.unpark();
        })?;
    }

    let mut result = Ok(());
    while !shutdown.load(Ordering::SeqCst) {
        thread::park_timeout(WATCH_INTERVAL);

        if let Some(fault) = server.take_fault() {
            error!("I/O thread stopped: {}", fault);
            result = Err(fault.into());
            break;
        }
    }

    info!("Shutting down...");
    server.stop();
    let stats = server.stats();
    info!("Ran {} ticks ({} overran)", stats.ticks, stats.overruns);

    result
}

/// Retries startup while the host is short on sockets, pipes or threads.
fn start_with_retry(server: &Server<Lobby>) -> Result<(), NetError> {
    let mut attempt = 1;
    loop {
        match server.start() {
            Ok(()) => return Ok(()),
            Err(e) if e.is_resource_fault() && attempt < START_ATTEMPTS => {
                warn!("Startup attempt {} failed: {}, retrying", attempt, e);
                attempt += 1;
                thread::sleep(Duration::from_secs(1));
            }
            Err(e) => return Err(e),
        }
    }
}
