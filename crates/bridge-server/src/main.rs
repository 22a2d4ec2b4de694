//! `gtp-bridge`: plays matches on a game server with a GTP engine.

use std::path::PathBuf;

use anyhow::{bail, Result};
use bridge_server::config::Config;
use bridge_server::server;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(name = "gtp-bridge")]
#[clap(about = "Bridge live matches on a game server to a GTP engine")]
struct Cli {
    /// TOML configuration file
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Server address (host:port)
    #[clap(short, long)]
    server: Option<String>,

    /// Player id to play as
    #[clap(short, long)]
    bot_id: Option<u64>,

    /// Keep the engine running between moves
    #[clap(long)]
    persist: bool,

    /// Run at most one correspondence computation at a time
    #[clap(long)]
    corrqueue: bool,

    /// Enable debug logging
    #[clap(short, long)]
    debug: bool,

    /// Engine command line, e.g. `-- gnugo --mode gtp`
    #[clap(last = true)]
    engine: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(server) = cli.server {
        config.server_addr = server;
    }
    if let Some(bot_id) = cli.bot_id {
        config.bot_id = bot_id;
    }
    if !cli.engine.is_empty() {
        config.engine_command = cli.engine;
    }
    config.persist |= cli.persist;
    config.corrqueue |= cli.corrqueue;
    config.debug |= cli.debug;

    // Setup logging
    let default_level = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    if config.engine_command.is_empty() {
        bail!("no engine command configured; set engine_command or BRIDGE_ENGINE, or pass it after --");
    }

    info!(
        "Starting gtp-bridge as player {} against {} (engine: {})",
        config.bot_id,
        config.server_addr,
        config.engine_command.join(" ")
    );

    server::run(config).await
}
