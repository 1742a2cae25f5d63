//! # tether-node
//!
//! Process entry point for every Tether role:
//! - **bootstrap** anchors new peers into the routing overlay
//! - **relay** forwards circuits for peers behind NAT, with unbounded limits
//! - **node-runner** reserves a slot on a relay and answers handshakes
//! - **mobile-client** reaches a node runner through a relay and runs the
//!   handshake once

mod config;
mod keygen;
mod runner;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::{Cli, Command, NodeConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tether_node=debug,tether_net=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let args = match cli.command {
        Command::Keygen { count } => {
            println!("{}", keygen::generate(count)?);
            return Ok(());
        }
        Command::Run(args) => args,
    };

    info!("Starting tether-node v{}", env!("CARGO_PKG_VERSION"));
    let config = NodeConfig::from_args(args)?;
    info!(?config, "Loaded configuration");

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
        }
        trigger.cancel();
    });

    if let Err(e) = runner::run(config, shutdown).await {
        error!(error = %format!("{e:#}"), "Node failed");
        return Err(e);
    }
    Ok(())
}
