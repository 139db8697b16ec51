use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Assembly latency
// ---------------------------------------------------------------------------

/// Most recent completions kept for latency percentiles.
const LATENCY_WINDOW: usize = 4096;

/// Sliding window of first-fragment-to-completion times in µs.
/// Once full, each completion replaces the oldest sample.
struct LatencyWindow {
    samples: Vec<u64>,
    oldest: usize,
}

impl LatencyWindow {
    fn new() -> Self {
        Self { samples: Vec::with_capacity(LATENCY_WINDOW), oldest: 0 }
    }

    fn record(&mut self, us: u64) {
        if self.samples.len() < LATENCY_WINDOW {
            self.samples.push(us);
        } else {
            self.samples[self.oldest] = us;
            self.oldest = (self.oldest + 1) % LATENCY_WINDOW;
        }
    }

    /// p50, p95 and p99 of the window; `None` before the first completion.
    fn summary(&self) -> Option<(u64, u64, u64)> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_unstable();
        let at = |pct: usize| sorted[(sorted.len() * pct / 100).min(sorted.len() - 1)];
        Some((at(50), at(95), at(99)))
    }
}

// ---------------------------------------------------------------------------
// IngestMetrics
// ---------------------------------------------------------------------------

/// Atomic ingestion and reassembly counters.
/// All atomic writes use Relaxed ordering.
pub struct IngestMetrics {
    // Transport
    pub datagrams_received: AtomicU64,
    pub bytes_received: AtomicU64,
    /// Datagrams dropped because the receiver→worker channel was full.
    pub datagrams_dropped: AtomicU64,
    pub recv_errors: AtomicU64,

    // Rejections
    pub decode_errors: AtomicU64,
    pub protocol_errors: AtomicU64,

    // Store
    pub fragments_accepted: AtomicU64,
    /// Fragments that overwrote an already-filled slot (retransmits).
    pub fragments_duplicate: AtomicU64,
    pub messages_opened: AtomicU64,
    pub messages_completed: AtomicU64,
    /// Partial messages dropped by the TTL sweep.
    pub messages_expired: AtomicU64,
    /// Partial messages dropped to make room under the capacity bound.
    pub messages_evicted: AtomicU64,
    /// Partial messages currently held by the store.
    pub pending_messages: AtomicU64,

    // Acknowledgments
    pub acks_sent: AtomicU64,
    pub ack_errors: AtomicU64,

    /// First fragment → completion, in µs.
    assembly_latency: Mutex<LatencyWindow>,
}

/// Plain-struct snapshot of IngestMetrics for display and the stats log.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestMetricsSnapshot {
    pub datagrams_received: u64,
    pub bytes_received: u64,
    pub datagrams_dropped: u64,
    pub recv_errors: u64,
    pub decode_errors: u64,
    pub protocol_errors: u64,
    pub fragments_accepted: u64,
    pub fragments_duplicate: u64,
    pub messages_opened: u64,
    pub messages_completed: u64,
    pub messages_expired: u64,
    pub messages_evicted: u64,
    pub pending_messages: u64,
    pub acks_sent: u64,
    pub ack_errors: u64,
    pub assembly_p50_us: Option<u64>,
    pub assembly_p95_us: Option<u64>,
    pub assembly_p99_us: Option<u64>,
}

impl IngestMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            datagrams_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            datagrams_dropped: AtomicU64::new(0),
            recv_errors: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            fragments_accepted: AtomicU64::new(0),
            fragments_duplicate: AtomicU64::new(0),
            messages_opened: AtomicU64::new(0),
            messages_completed: AtomicU64::new(0),
            messages_expired: AtomicU64::new(0),
            messages_evicted: AtomicU64::new(0),
            pending_messages: AtomicU64::new(0),
            acks_sent: AtomicU64::new(0),
            ack_errors: AtomicU64::new(0),
            assembly_latency: Mutex::new(LatencyWindow::new()),
        })
    }

    /// Record how long a message took from its first fragment to completion.
    pub fn record_assembly_latency(&self, latency: Duration) {
        if let Ok(mut window) = self.assembly_latency.lock() {
            window.record(latency.as_micros() as u64);
        }
    }

    /// Completion ratio over every message the store has opened, or None before the first one.
    pub fn completion_pct(&self) -> Option<f64> {
        let opened = self.messages_opened.load(Relaxed);
        if opened == 0 {
            return None;
        }
        Some(self.messages_completed.load(Relaxed) as f64 / opened as f64 * 100.0)
    }

    /// Point-in-time snapshot (slight skew between counters is possible).
    pub fn snapshot(&self) -> IngestMetricsSnapshot {
        let (p50, p95, p99) = self
            .assembly_latency
            .lock()
            .ok()
            .and_then(|window| window.summary())
            .map_or((None, None, None), |(p50, p95, p99)| (Some(p50), Some(p95), Some(p99)));

        IngestMetricsSnapshot {
            datagrams_received: self.datagrams_received.load(Relaxed),
            bytes_received: self.bytes_received.load(Relaxed),
            datagrams_dropped: self.datagrams_dropped.load(Relaxed),
            recv_errors: self.recv_errors.load(Relaxed),
            decode_errors: self.decode_errors.load(Relaxed),
            protocol_errors: self.protocol_errors.load(Relaxed),
            fragments_accepted: self.fragments_accepted.load(Relaxed),
            fragments_duplicate: self.fragments_duplicate.load(Relaxed),
            messages_opened: self.messages_opened.load(Relaxed),
            messages_completed: self.messages_completed.load(Relaxed),
            messages_expired: self.messages_expired.load(Relaxed),
            messages_evicted: self.messages_evicted.load(Relaxed),
            pending_messages: self.pending_messages.load(Relaxed),
            acks_sent: self.acks_sent.load(Relaxed),
            ack_errors: self.ack_errors.load(Relaxed),
            assembly_p50_us: p50,
            assembly_p95_us: p95,
            assembly_p99_us: p99,
        }
    }
}
