//! CLI definitions for fragd.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[clap(
    name = "fragd",
    version,
    about = "UDP fragment reassembly daemon\n\nReceives message fragments as JSON datagrams, rebuilds each message once all of its parts have arrived, and acknowledges every fragment to its sender.",
    long_about = None
)]
pub struct Cli {
    /// Path to fragd.toml config file
    #[clap(long, short, default_value = "fragd.toml")]
    pub config: PathBuf,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Receive and reassemble fragments until killed
    Run {
        /// Append a JSON metrics snapshot to this file (overrides [stats].log_path)
        #[clap(long)]
        stats_log: Option<PathBuf>,

        /// Seconds between metrics snapshots (overrides [stats].interval_secs)
        #[clap(long)]
        interval: Option<u64>,
    },

    /// Split a message into fragments and send them to a running fragd
    Send {
        /// Address of the fragd listener
        #[clap(long, default_value = "127.0.0.1:3000")]
        target: String,

        /// Message id carried by every fragment
        #[clap(long)]
        id: i64,

        /// Maximum payload bytes per fragment
        #[clap(long, default_value = "8")]
        chunk_size: usize,

        /// Send fragments last-to-first to exercise out-of-order arrival
        #[clap(long)]
        reverse: bool,

        /// Seconds to wait for each acknowledgment
        #[clap(long, default_value = "2")]
        ack_timeout: u64,

        /// Message text
        text: String,
    },

    /// Show the latest snapshot from the metrics log
    Status {
        /// Metrics log to read (default: [stats].log_path or /var/log/fragd.jsonl)
        #[clap(long)]
        stats_log: Option<PathBuf>,
    },

    /// Print an example fragd.toml to stdout
    Init,
}
