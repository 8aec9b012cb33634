//! SabhaIO - robot device server daemon
//!
//! Loads the configuration, starts the configured drivers and serves clients
//! on the listen addresses until Ctrl-C or SIGTERM.

use clap::Parser;
use sabha_io::config::Config;
use sabha_io::error::{Error, Result};
use sabha_io::server::Server;
use std::path::{Path, PathBuf};

/// Default configuration path
const DEFAULT_CONFIG: &str = "/etc/sabha.toml";

#[derive(Parser, Debug)]
#[command(name = "sabha-io", version, about = "Robot device server")]
struct Args {
    /// Configuration file; without one the simulated devices are served
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, repeatable; replaces `server.listen`
    #[arg(short, long)]
    listen: Vec<String>,

    /// Log level; overrides `logging.level`
    #[arg(long)]
    log_level: Option<String>,
}

/// Configuration and where it came from
fn load_config(path: Option<&Path>) -> Result<(Config, String)> {
    match path {
        Some(path) => Ok((Config::from_file(path)?, path.display().to_string())),
        None if Path::new(DEFAULT_CONFIG).exists() => {
            Ok((Config::from_file(DEFAULT_CONFIG)?, DEFAULT_CONFIG.to_string()))
        }
        None => Ok((Config::simulation_defaults(), "built-in simulation".to_string())),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let (mut config, source) = load_config(args.config.as_deref())?;
    if !args.listen.is_empty() {
        config.server.listen = args.listen;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.validate()?;

    // RUST_LOG wins over the configured level
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.logging.level))
        .init();

    log::info!("SabhaIO v{} starting...", env!("CARGO_PKG_VERSION"));
    log::info!("Using config: {} ({} drivers)", source, config.drivers.len());

    let mut server = Server::from_config(config)?;
    let control = server.controller();
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        control.stop();
    })
    .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

    for addr in server.local_addrs() {
        log::info!("Listening on {}", addr);
    }
    log::info!("SabhaIO running. Press Ctrl-C to stop.");
    server.run()
}
