//! In-flight message reassembly.
//!
//! [`FragmentStore`] keeps one [`PartialMessage`] per message id. Each partial
//! message owns a fixed slot array sized from the first fragment's `total_count`;
//! a message is handed out exactly once, the moment every slot is filled, and
//! is removed from the table in the same critical section.
//!
//! ## Locking
//! The table is a `DashMap`, so every operation on one message id runs under
//! that id's shard lock. Compound check-then-act steps (fill + completion check
//! + removal) never release the lock in between.
//!
//! ## Memory bound
//! * TTL: partial messages older than `ttl` are dropped by [`FragmentStore::evict_expired`],
//!   normally driven by [`spawn_sweeper`].
//! * Capacity: opening a new message while `max_pending` are held evicts the
//!   least-recently-touched one first.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::clock;
use crate::error::ProtocolError;
use crate::ingest_metrics::IngestMetrics;
use crate::record::{FragmentRecord, DEFAULT_MAX_FRAGMENTS};

/// Limits applied by the store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Drop partial messages this long after their first fragment. `None` keeps them forever.
    pub ttl: Option<Duration>,
    /// Maximum number of partial messages held at once. 0 = unbounded.
    pub max_pending: usize,
    /// Largest `total_count` a new message may declare.
    pub max_fragments: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            ttl: Some(Duration::from_secs(30)),
            max_pending: 65_536,
            max_fragments: DEFAULT_MAX_FRAGMENTS,
        }
    }
}

// ---------------------------------------------------------------------------
// Per-message state
// ---------------------------------------------------------------------------

struct PartialMessage {
    /// One slot per fragment index; length fixed at creation.
    slots: Vec<Option<Vec<u8>>>,
    /// Number of non-empty slots.
    filled: usize,
    first_seen_ns: u64,
    last_touch_ns: u64,
}

/// Whether a fragment filled an empty slot or replaced an earlier copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fill {
    New,
    Overwrite,
}

impl PartialMessage {
    fn new(total_count: u32, now: u64) -> Self {
        Self {
            slots: vec![None; total_count as usize],
            filled: 0,
            first_seen_ns: now,
            last_touch_ns: now,
        }
    }

    fn total(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Store `record.payload` in its slot. The slot array is never resized.
    fn accept(&mut self, record: FragmentRecord, now: u64) -> Result<Fill, ProtocolError> {
        let expected = self.total();
        if record.total_count != expected {
            return Err(ProtocolError::TotalMismatch {
                id: record.message_id,
                expected,
                got: record.total_count,
            });
        }
        if record.index >= expected {
            return Err(ProtocolError::IndexOutOfRange {
                id: record.message_id,
                index: record.index as i64,
                total: expected,
            });
        }

        let slot = &mut self.slots[record.index as usize];
        let fill = if slot.is_some() {
            Fill::Overwrite
        } else {
            self.filled += 1;
            Fill::New
        };
        *slot = Some(record.payload);
        self.last_touch_ns = now;
        Ok(fill)
    }

    fn is_complete(&self) -> bool {
        self.filled == self.slots.len()
    }

    /// Concatenate slots in index order. Only meaningful once complete.
    fn assemble(self) -> Vec<u8> {
        let len: usize = self.slots.iter().flatten().map(Vec::len).sum();
        let mut out = Vec::with_capacity(len);
        for payload in self.slots.into_iter().flatten() {
            out.extend_from_slice(&payload);
        }
        out
    }

    fn missing(&self) -> Vec<u32> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_none())
            .map(|(i, _)| i as u32)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// FragmentStore
// ---------------------------------------------------------------------------

pub struct FragmentStore {
    table: DashMap<i64, PartialMessage>,
    config: StoreConfig,
    metrics: Arc<IngestMetrics>,
}

impl FragmentStore {
    pub fn new(config: StoreConfig, metrics: Arc<IngestMetrics>) -> Self {
        Self { table: DashMap::new(), config, metrics }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<IngestMetrics> {
        &self.metrics
    }

    /// Record a fragment, opening a new partial message if needed.
    ///
    /// Never removes anything from the table: a fragment that completes its
    /// message leaves it in place for [`try_assemble_and_remove`](Self::try_assemble_and_remove).
    pub fn add_fragment(&self, record: FragmentRecord) -> Result<(), ProtocolError> {
        self.upsert(record, clock::now_ns(), false).map(|_| ())
    }

    /// Hand out the assembled message if every slot of `message_id` is filled.
    ///
    /// Returns `None` for unknown ids and for messages still missing fragments
    /// (those stay untouched). A `Some` removes the entry, so repeated calls
    /// for the same completed message yield it once.
    pub fn try_assemble_and_remove(&self, message_id: i64) -> Option<Vec<u8>> {
        let (_, partial) = self.table.remove_if(&message_id, |_, p| p.is_complete())?;
        Some(self.finish(message_id, partial, clock::now_ns()))
    }

    /// [`add_fragment`](Self::add_fragment) and
    /// [`try_assemble_and_remove`](Self::try_assemble_and_remove) under one lock acquisition.
    pub fn add_and_try_assemble(
        &self,
        record: FragmentRecord,
    ) -> Result<Option<Vec<u8>>, ProtocolError> {
        self.upsert(record, clock::now_ns(), true)
    }

    /// Number of partial messages currently held.
    pub fn pending_count(&self) -> usize {
        self.table.len()
    }

    /// Indices not yet received for `message_id`, with its declared total.
    pub fn missing_fragments(&self, message_id: i64) -> Option<(Vec<u32>, u32)> {
        let partial = self.table.get(&message_id)?;
        Some((partial.missing(), partial.total()))
    }

    /// Drop partial messages older than the configured TTL. Returns how many were dropped.
    pub fn evict_expired(&self) -> usize {
        self.evict_expired_at(clock::now_ns())
    }

    fn evict_expired_at(&self, now: u64) -> usize {
        let Some(ttl) = self.config.ttl else {
            return 0;
        };
        let mut evicted = 0usize;

        self.table.retain(|id, partial| {
            let age = clock::between(partial.first_seen_ns, now);
            if age <= ttl {
                return true;
            }
            tracing::debug!(
                id = *id,
                received = partial.filled,
                total = partial.total(),
                age_ms = age.as_millis() as u64,
                "partial message expired"
            );
            evicted += 1;
            false
        });

        if evicted > 0 {
            self.metrics.messages_expired.fetch_add(evicted as u64, Relaxed);
            self.metrics.pending_messages.fetch_sub(evicted as u64, Relaxed);
            self.table.shrink_to_fit();
        }
        evicted
    }

    // ── internals ───────────────────────────────────────────────────────────

    fn upsert(
        &self,
        record: FragmentRecord,
        now: u64,
        take_if_complete: bool,
    ) -> Result<Option<Vec<u8>>, ProtocolError> {
        let id = record.message_id;
        if !self.table.contains_key(&id) {
            // Nothing is evicted for a fragment that will not be stored.
            self.check_opening(&record)?;
            if take_if_complete && record.total_count == 1 {
                self.count_fill(Fill::New);
                self.metrics.messages_opened.fetch_add(1, Relaxed);
                self.metrics.messages_completed.fetch_add(1, Relaxed);
                self.metrics.record_assembly_latency(Duration::ZERO);
                return Ok(Some(record.payload));
            }
            self.make_room_for(id);
        }

        match self.table.entry(id) {
            Entry::Occupied(mut entry) => {
                let fill = entry.get_mut().accept(record, now)?;
                self.count_fill(fill);
                if take_if_complete && entry.get().is_complete() {
                    let (_, partial) = entry.remove_entry();
                    return Ok(Some(self.finish(id, partial, now)));
                }
                Ok(None)
            }
            Entry::Vacant(entry) => {
                // The id may have completed or expired since the check above.
                self.check_opening(&record)?;
                let mut partial = PartialMessage::new(record.total_count, now);
                let fill = partial.accept(record, now)?;
                self.count_fill(fill);
                self.metrics.messages_opened.fetch_add(1, Relaxed);

                if take_if_complete && partial.is_complete() {
                    // Single-fragment message: never enters the table.
                    self.metrics.messages_completed.fetch_add(1, Relaxed);
                    self.metrics.record_assembly_latency(Duration::ZERO);
                    return Ok(Some(partial.assemble()));
                }
                entry.insert(partial);
                self.metrics.pending_messages.fetch_add(1, Relaxed);
                Ok(None)
            }
        }
    }

    /// Reject a fragment that cannot open a new message.
    fn check_opening(&self, record: &FragmentRecord) -> Result<(), ProtocolError> {
        let id = record.message_id;
        if record.total_count == 0 || record.total_count > self.config.max_fragments {
            return Err(ProtocolError::InvalidTotal {
                id,
                total: record.total_count as i64,
                max: self.config.max_fragments,
            });
        }
        if record.index >= record.total_count {
            return Err(ProtocolError::IndexOutOfRange {
                id,
                index: record.index as i64,
                total: record.total_count,
            });
        }
        Ok(())
    }

    fn count_fill(&self, fill: Fill) {
        self.metrics.fragments_accepted.fetch_add(1, Relaxed);
        if fill == Fill::Overwrite {
            self.metrics.fragments_duplicate.fetch_add(1, Relaxed);
        }
    }

    /// Bookkeeping for a complete message that has just left the table.
    fn finish(&self, id: i64, partial: PartialMessage, now: u64) -> Vec<u8> {
        let latency = clock::between(partial.first_seen_ns, now);
        self.metrics.messages_completed.fetch_add(1, Relaxed);
        self.metrics.pending_messages.fetch_sub(1, Relaxed);
        self.metrics.record_assembly_latency(latency);
        tracing::debug!(
            id,
            fragments = partial.total(),
            latency_us = latency.as_micros() as u64,
            "message assembled"
        );
        partial.assemble()
    }

    /// Evict the least-recently-touched message if opening `id` would exceed `max_pending`.
    ///
    /// Runs before the entry lock is taken: `len()` reads every shard.
    fn make_room_for(&self, id: i64) {
        let max = self.config.max_pending;
        if max == 0 || self.table.contains_key(&id) || self.table.len() < max {
            return;
        }

        let oldest = self
            .table
            .iter()
            .min_by_key(|e| e.value().last_touch_ns)
            .map(|e| (*e.key(), e.value().last_touch_ns));

        if let Some((key, touched)) = oldest {
            // Skip if the entry was refreshed (or completed) since the scan.
            if let Some((_, partial)) =
                self.table.remove_if(&key, |_, p| p.last_touch_ns == touched)
            {
                self.metrics.messages_evicted.fetch_add(1, Relaxed);
                self.metrics.pending_messages.fetch_sub(1, Relaxed);
                tracing::debug!(
                    id = key,
                    received = partial.filled,
                    total = partial.total(),
                    "partial message evicted at capacity"
                );
            }
        }
    }
}

/// Run [`FragmentStore::evict_expired`] every `interval` on a background thread.
///
/// The thread holds only a weak reference and exits once the store is dropped.
pub fn spawn_sweeper(
    store: &Arc<FragmentStore>,
    interval: Duration,
) -> std::io::Result<JoinHandle<()>> {
    let weak: Weak<FragmentStore> = Arc::downgrade(store);
    std::thread::Builder::new()
        .name("frag-sweep".into())
        .spawn(move || loop {
            std::thread::sleep(interval);
            let Some(store) = weak.upgrade() else {
                break;
            };
            let evicted = store.evict_expired();
            if evicted > 0 {
                tracing::info!(evicted, pending = store.pending_count(), "expired partial messages");
            }
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
