//! `fragd run` — the reassembly daemon.
//!
//! Starts the UDP service with a console sink and, when a stats log is
//! configured, appends a metrics snapshot to a JSONL file every N seconds.
//! Use `fragd status` to read the latest snapshot.

use anyhow::Result;
use frag_ingest::{start_service, IngestMetricsSnapshot, LogSink};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::config::DaemonConfig;

pub const DEFAULT_LOG: &str = "/var/log/fragd.jsonl";

#[derive(Serialize)]
pub struct LogEntry {
    pub ts: u64,
    pub started_at: u64,
    pub listen: String,
    pub pending_messages: usize,
    pub datagrams_per_sec: f64,
    pub messages_per_sec: f64,
    pub completion_pct: Option<f64>,
    pub totals: IngestMetricsSnapshot,
}

pub fn run(config: &DaemonConfig, stats_log: Option<PathBuf>, interval: Option<u64>) -> Result<()> {
    let service_config = config.service_config()?;
    let handle = start_service(service_config, Arc::new(LogSink))?;

    eprintln!("fragd listening on {}", handle.local_addr);

    let log_path = stats_log.or_else(|| config.stats.log_path.as_ref().map(PathBuf::from));
    let Some(log_path) = log_path else {
        handle.wait();
        return Ok(());
    };

    let interval_secs = interval.unwrap_or(config.stats.interval_secs).max(1);
    eprintln!("logging metrics to {} every {}s", log_path.display(), interval_secs);

    let started_at = unix_now();
    let listen = handle.local_addr.to_string();
    let interval = Duration::from_secs(interval_secs);
    let mut prev = handle.snapshot();
    let mut prev_time = Instant::now();

    loop {
        std::thread::sleep(interval);

        let now = Instant::now();
        let elapsed = now.duration_since(prev_time).as_secs_f64();
        prev_time = now;

        let curr = handle.snapshot();
        let entry = make_entry(
            &curr,
            &prev,
            elapsed,
            started_at,
            &listen,
            handle.store.pending_count(),
            handle.metrics.completion_pct(),
        );
        append_entry(&log_path, &entry);
        prev = curr;
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn make_entry(
    curr: &IngestMetricsSnapshot,
    prev: &IngestMetricsSnapshot,
    elapsed: f64,
    started_at: u64,
    listen: &str,
    pending_messages: usize,
    completion_pct: Option<f64>,
) -> LogEntry {
    let dgram_delta = curr.datagrams_received.saturating_sub(prev.datagrams_received);
    let msg_delta = curr.messages_completed.saturating_sub(prev.messages_completed);
    let elapsed = if elapsed > 0.0 { elapsed } else { 1.0 };

    LogEntry {
        ts: unix_now(),
        started_at,
        listen: listen.to_string(),
        pending_messages,
        datagrams_per_sec: dgram_delta as f64 / elapsed,
        messages_per_sec: msg_delta as f64 / elapsed,
        completion_pct,
        totals: curr.clone(),
    }
}

fn append_entry(path: &Path, entry: &LogEntry) {
    let file = OpenOptions::new().create(true).append(true).open(path);
    match file {
        Ok(mut file) => match serde_json::to_string(entry) {
            Ok(line) => {
                if let Err(e) = writeln!(file, "{}", line) {
                    tracing::warn!(path = %path.display(), err = %e, "failed to write stats log");
                }
            }
            Err(e) => tracing::warn!(err = %e, "failed to serialize stats entry"),
        },
        Err(e) => tracing::warn!(path = %path.display(), err = %e, "failed to open stats log"),
    }
}
