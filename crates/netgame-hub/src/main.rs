//! Relay hub binary: every message a peer sends is forwarded to all peers.

use anyhow::Result;
use clap::Parser;
use netgame_hub::{Config, Hub, RelayHandler};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(name = "netgame-hub")]
#[clap(about = "Message hub for networked games")]
struct Cli {
    /// Port to listen on (overrides HUB_PORT)
    #[clap(short, long)]
    port: Option<u16>,

    /// Interface to bind (overrides HUB_BIND_ADDR)
    #[clap(short, long)]
    bind: Option<String>,

    /// Reset every encoder before each frame (overrides HUB_AUTORESET)
    #[clap(long)]
    autoreset: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    config.autoreset |= cli.autoreset;

    info!(
        addr = %config.socket_addr_string(),
        max_peers = config.max_peers,
        "starting netgame-hub"
    );

    let hub = Hub::start(config, RelayHandler).await?;

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("interrupt received");
        }
        err = hub.listener_failed() => {
            error!(error = %err, "listener failed");
        }
    }

    hub.shutdown().await;
    Ok(())
}
