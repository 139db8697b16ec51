//! fragd — UDP fragment reassembly daemon.
//!
//! Receives message fragments as JSON datagrams, reassembles each logical
//! message once every fragment has arrived, and acknowledges each fragment
//! to its sender. Run `fragd --help` for usage.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cli;
mod color;
mod config;
mod run;
mod send;
mod status;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            let example = config::DaemonConfig::default_example();
            print!("{}", toml::to_string_pretty(&example)?);
        }
        Commands::Run { stats_log, interval } => {
            let config = load_config(&cli.config)?;
            run::run(&config, stats_log, interval)?;
        }
        Commands::Send { target, id, chunk_size, reverse, ack_timeout, text } => {
            send::run(&target, id, &text, chunk_size, reverse, ack_timeout)?;
        }
        Commands::Status { stats_log } => {
            let config = load_config(&cli.config)?;
            let path = stats_log
                .or_else(|| config.stats.log_path.map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from(run::DEFAULT_LOG));
            status::run(&path)?;
        }
    }

    Ok(())
}

/// Load the config file, creating an empty one (all defaults) if it is missing.
fn load_config(path: &std::path::Path) -> Result<config::DaemonConfig> {
    if !path.exists() {
        std::fs::write(path, b"")?;
        eprintln!(
            "Created '{}' — run `fragd init` to see every option.",
            path.display()
        );
    }
    config::DaemonConfig::load(path)
}
