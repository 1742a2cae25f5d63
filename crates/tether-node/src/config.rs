//! Command line and environment configuration.
//!
//! Every `run` flag can also be supplied through a `TETHER_*` environment
//! variable. Raw arguments are validated into a [`NodeConfig`] before
//! anything touches the network.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tracing::warn;

use tether_net::{load_handles, parse_batch, split_list, PeerHandle};
use tether_shared::{ListenScope, Role};

#[derive(Parser, Debug)]
#[command(name = "tether-node")]
#[command(about = "Tether relay connectivity node", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a node in the given role
    Run(RunArgs),
    /// Print fresh keyring entries and their peer ids
    Keygen {
        /// Number of keys to generate
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// bootstrap, relay, node-runner or mobile-client
    #[arg(long, env = "TETHER_ROLE")]
    pub role: Role,

    /// TCP port for fixed-port roles
    #[arg(long, env = "TETHER_PORT")]
    pub port: Option<u16>,

    /// Keyring slot to use (defaults to the role's first slot)
    #[arg(long, env = "TETHER_KEY_INDEX")]
    pub key_index: Option<usize>,

    /// JSON keyring file; the built-in keyring is used otherwise
    #[arg(long, env = "TETHER_KEYRING")]
    pub keyring: Option<PathBuf>,

    /// Comma-separated bootstrap multiaddrs
    #[arg(long, env = "TETHER_BOOTSTRAP")]
    pub bootstrap: Option<String>,

    /// File with one bootstrap multiaddr per line
    #[arg(long, env = "TETHER_BOOTSTRAP_FILE")]
    pub bootstrap_file: Option<PathBuf>,

    /// Relay multiaddr (node-runner and mobile-client)
    #[arg(long, env = "TETHER_RELAY")]
    pub relay: Option<String>,

    /// Target node runner (mobile-client)
    #[arg(long, env = "TETHER_TARGET")]
    pub target: Option<String>,

    /// Bind to loopback interfaces only
    #[arg(long)]
    pub loopback: bool,
}

/// Validated node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub role: Role,
    pub port: Option<u16>,
    pub key_index: usize,
    pub keyring: Option<PathBuf>,
    pub bootstrap: Vec<PeerHandle>,
    pub relay: Option<PeerHandle>,
    pub target: Option<PeerHandle>,
    pub scope: ListenScope,
}

impl NodeConfig {
    pub fn from_args(args: RunArgs) -> anyhow::Result<Self> {
        let role = args.role;

        let mut entries: Vec<String> = args
            .bootstrap
            .as_deref()
            .map(split_list)
            .unwrap_or_default();
        entries.retain(|entry| !entry.is_empty());

        let mut batch = parse_batch(&entries);
        let mut requested = entries.len();
        if let Some(path) = &args.bootstrap_file {
            let from_file = load_handles(path)
                .with_context(|| format!("reading bootstrap file {}", path.display()))?;
            requested += from_file.handles.len() + from_file.errors.len();
            batch.handles.extend(from_file.handles);
            batch.errors.extend(from_file.errors);
        }

        if !batch.is_clean() {
            warn!(
                rejected = batch.errors.len(),
                "Some bootstrap addresses were invalid"
            );
        }
        if role.policy().requires_bootstrap && requested > 0 && batch.handles.is_empty() {
            bail!("none of the {requested} bootstrap addresses is valid");
        }

        let relay = args
            .relay
            .as_deref()
            .map(PeerHandle::parse)
            .transpose()
            .context("invalid relay address")?;
        let target = args
            .target
            .as_deref()
            .map(PeerHandle::parse)
            .transpose()
            .context("invalid target address")?;

        Ok(Self {
            role,
            port: args.port,
            key_index: args.key_index.unwrap_or_else(|| role.default_key_index()),
            keyring: args.keyring,
            bootstrap: batch.handles,
            relay,
            target,
            scope: if args.loopback {
                ListenScope::Loopback
            } else {
                ListenScope::All
            },
        })
    }
}
