use clap::Parser;
use client::{ChatReceiver, Client};
use log::{info, warn};
use shared::Packet;
use std::io::{self, BufRead};
use std::thread;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:27010")]
    server: String,

    /// Name shown to other players
    #[arg(short = 'n', long, default_value = "player")]
    name: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    info!("Connecting to: {}", args.server);

    let client = Client::connect(&args.server, &args.name)?;
    println!("Joined as player {}. Type to chat, Ctrl+D to leave.", client.player_id());

    let (mut sender, receiver) = client.split()?;
    let printer = thread::spawn(move || print_packets(receiver));

    for line in io::stdin().lock().lines() {
        let line = line?;
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if let Err(e) = sender.say(text) {
            warn!("Could not send: {}", e);
            break;
        }
    }

    sender.quit();
    if printer.join().is_err() {
        warn!("Printer thread panicked");
    }

    Ok(())
}

fn print_packets(mut receiver: ChatReceiver) {
    loop {
        match receiver.next_packet() {
            Ok(Some(Packet::Chat { from, text })) => println!("[{}] {}", from, text),
            Ok(Some(Packet::Left { player_id })) => println!("* player {} left", player_id),
            Ok(Some(other)) => info!("Ignoring {:?}", other),
            Ok(None) => {
                println!("* disconnected");
                break;
            }
            Err(e) => warn!("Dropping bad packet: {}", e),
        }
    }
}
