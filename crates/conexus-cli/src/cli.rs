//! Clap CLI definitions for Conexus.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
Examples:
  conexus init                  Write a default config to ~/.conexus/config.toml
  conexus keygen                Generate an agent or gateway identity
  conexus start                 Run the signaling gateway in the foreground
  conexus config                Print the effective configuration";

/// Conexus signaling gateway.
#[derive(Parser, Debug)]
#[command(
    name = "conexus",
    version,
    about = "Conexus signaling gateway for agent-to-agent session negotiation",
    after_help = AFTER_HELP,
)]
pub struct Cli {
    /// Path to config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a default config file.
    Init {
        /// Overwrite an existing config file.
        #[arg(long)]
        force: bool,
    },
    /// Start the gateway and run until Ctrl+C.
    Start {
        /// Override `[gateway] listen_addr`.
        #[arg(long)]
        listen: Option<String>,
    },
    /// Generate a new Ed25519 identity.
    Keygen {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration as TOML.
    Config,
}
