// crates/netgame-client/src/main.rs

use anyhow::Result;
use clap::Parser;
use netgame_client::{ChannelHandler, ClientConfig, ClientEvent, PeerConnection};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(name = "netgame-client")]
#[clap(about = "Line-mode peer for a netgame hub: each stdin line is sent as one message")]
struct Cli {
    /// Hub address (overrides the config file)
    #[clap(short, long)]
    server: Option<String>,

    /// TOML config file
    #[clap(short, long)]
    config: Option<String>,

    /// Reset the encoder before each frame
    #[clap(long)]
    autoreset: bool,

    /// Enable debug logging
    #[clap(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };
    if let Some(server) = cli.server {
        config.server_addr = server;
    }
    config.autoreset |= cli.autoreset;

    let (handler, mut events) = ChannelHandler::new();
    let conn = PeerConnection::connect(&config, handler).await?;
    println!("connected as {} (commands: /peers /reset /quit)", conn.id());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => {
                    if !handle_line(&conn, line.trim_end()) {
                        break;
                    }
                }
                None => {
                    stdin_open = false;
                    conn.disconnect();
                }
            },
            event = events.recv() => match event {
                Some(event) => print_event(event),
                None => break,
            },
            _ = conn.closed() => break,
        }
    }

    conn.closed().await;
    info!("client exiting");
    Ok(())
}

/// Returns `false` once the user asked to leave.
fn handle_line(conn: &PeerConnection, line: &str) -> bool {
    match line {
        "" => {}
        "/quit" => {
            conn.disconnect();
            return false;
        }
        "/peers" => {
            let peers: Vec<String> = conn.peers().iter().map(|p| p.to_string()).collect();
            println!("peers: {}", peers.join(" "));
        }
        "/reset" => conn.reset_output(),
        text => {
            if let Err(e) = conn.send(text.as_bytes().to_vec()) {
                warn!(error = %e, "send failed");
            }
        }
    }
    true
}

fn print_event(event: ClientEvent) {
    match event {
        ClientEvent::Message { from, payload } => {
            let text = String::from_utf8_lossy(&payload);
            match from {
                Some(from) => println!("{}: {}", from, text),
                None => println!("hub: {}", text),
            }
        }
        ClientEvent::PeerConnected { peer, peers } => {
            println!("{} joined ({} connected)", peer, peers.len());
        }
        ClientEvent::PeerDisconnected { peer, peers } => {
            println!("{} left ({} connected)", peer, peers.len());
        }
        ClientEvent::ClosedByError(message) => println!("connection lost: {}", message),
        ClientEvent::ServerShutdown(reason) => println!("hub closed the connection: {}", reason),
    }
}
