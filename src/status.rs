//! `fragd status` — show the most recent snapshot from the metrics log.
//!
//! Reads the last line of the JSONL log written by `fragd run` and prints a
//! static one-shot table.

use anyhow::Result;
use chrono::{TimeZone, Utc};
use std::path::Path;

use crate::color::{self, paint, Tone};

pub fn run(log_path: &Path) -> Result<()> {
    let content = match std::fs::read_to_string(log_path) {
        Ok(c) => c,
        Err(_) => {
            eprintln!("No metrics log found at {}.", log_path.display());
            eprintln!("Start the daemon with a stats log first:  fragd run --stats-log {}", log_path.display());
            return Ok(());
        }
    };

    let line = match content.lines().filter(|l| !l.is_empty()).last() {
        Some(l) => l,
        None => {
            eprintln!("Metrics log is empty — daemon may just be starting.");
            return Ok(());
        }
    };

    let entry: serde_json::Value = serde_json::from_str(line)?;
    for row in render(&entry) {
        println!("{}", row);
    }
    Ok(())
}

fn fmt_ts(secs: i64) -> String {
    Utc.timestamp_opt(secs, 0)
        .single()
        .map(|d| d.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "unknown".into())
}

fn fmt_uptime(secs: u64) -> String {
    let h = secs / 3600;
    let m = (secs % 3600) / 60;
    let s = secs % 60;
    if h > 0 {
        format!("{}h {}m {}s", h, m, s)
    } else if m > 0 {
        format!("{}m {}s", m, s)
    } else {
        format!("{}s", s)
    }
}

fn opt_num(v: &serde_json::Value, suffix: &str) -> String {
    match v.as_f64() {
        Some(n) => format!("{:.1}{}", n, suffix),
        None => "—".into(),
    }
}

/// Build the status table lines for one log entry.
fn render(entry: &serde_json::Value) -> Vec<String> {
    let ts = entry["ts"].as_i64().unwrap_or(0);
    let started_at = entry["started_at"].as_i64().unwrap_or(0);
    let uptime = if started_at > 0 {
        fmt_uptime((ts - started_at).max(0) as u64)
    } else {
        "—".into()
    };
    let totals = &entry["totals"];
    let count = |key: &str| totals[key].as_u64().unwrap_or(0);

    let width = 72;
    let mut out = Vec::new();
    out.push(paint(Tone::Strong, &"=".repeat(width)));
    out.push(paint(Tone::Title, &format!("{:^width$}", format!(" FRAGD STATUS  {} ", fmt_ts(ts)))));
    out.push(paint(Tone::Strong, &"=".repeat(width)));
    out.push(paint(Tone::Muted, &format!(
        "  Listening: {}   Uptime: {}",
        entry["listen"].as_str().unwrap_or("—"),
        uptime
    )));
    out.push(String::new());

    let row = |label: &str, value: String| format!("  {}{}", color::rpad(label, 26), value);

    out.push(paint(Tone::Strong, "  THROUGHPUT"));
    out.push(row("datagrams/s", opt_num(&entry["datagrams_per_sec"], "")));
    out.push(row("messages/s", opt_num(&entry["messages_per_sec"], "")));
    out.push(row("datagrams received", count("datagrams_received").to_string()));
    out.push(row("datagrams dropped", warn_if_nonzero(count("datagrams_dropped"))));
    out.push(String::new());

    out.push(paint(Tone::Strong, "  REASSEMBLY"));
    out.push(row("pending messages", entry["pending_messages"].as_u64().unwrap_or(0).to_string()));
    out.push(row("completed", paint(Tone::Good, &count("messages_completed").to_string())));
    out.push(row("completion", opt_num(&entry["completion_pct"], "%")));
    out.push(row("expired (ttl)", warn_if_nonzero(count("messages_expired"))));
    out.push(row("evicted (capacity)", warn_if_nonzero(count("messages_evicted"))));
    out.push(row("duplicate fragments", count("fragments_duplicate").to_string()));
    out.push(row(
        "assembly p50/p95/p99 µs",
        format!(
            "{} / {} / {}",
            opt_num(&totals["assembly_p50_us"], ""),
            opt_num(&totals["assembly_p95_us"], ""),
            opt_num(&totals["assembly_p99_us"], "")
        ),
    ));
    out.push(String::new());

    out.push(paint(Tone::Strong, "  ERRORS"));
    out.push(row("decode", warn_if_nonzero(count("decode_errors"))));
    out.push(row("protocol", warn_if_nonzero(count("protocol_errors"))));
    out.push(row("recv", warn_if_nonzero(count("recv_errors"))));
    out.push(row("ack send", warn_if_nonzero(count("ack_errors"))));
    out
}

fn warn_if_nonzero(n: u64) -> String {
    if n > 0 {
        paint(Tone::Warn, &n.to_string())
    } else {
        n.to_string()
    }
}
