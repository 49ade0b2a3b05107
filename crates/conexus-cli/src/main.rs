//! Conexus CLI entry point.

mod cli;
mod cmd;

use clap::Parser;
use cli::{Cli, Commands};
use conexus_kernel::config::load_config;
use conexus_kernel::KernelConfig;
use tracing_subscriber::EnvFilter;

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

fn init_tracing(log_level: &str, json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(log_level))
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Load the config under a temporary stderr subscriber so load warnings are
/// visible before the configured log level is known.
fn load_with_bootstrap_logging(cli: &Cli) -> KernelConfig {
    let bootstrap = tracing_subscriber::fmt()
        .with_env_filter(env_filter("warn"))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::with_default(bootstrap, || load_config(cli.config.as_deref()))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_with_bootstrap_logging(&cli);
    init_tracing(&config.log_level, cli.json_logs);

    match cli.command {
        Commands::Init { force } => cmd::init::cmd_init(cli.config, force),
        Commands::Start { listen } => cmd::start::cmd_start(config, listen),
        Commands::Keygen { json } => cmd::keygen::cmd_keygen(json),
        Commands::Config => cmd::init::cmd_show_config(&config),
    }
}
