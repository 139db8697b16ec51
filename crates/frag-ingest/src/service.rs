//! Service wiring: socket, receiver thread, ingest workers, TTL sweeper.

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::ingest::{Acker, IngestWorker, DEFAULT_ACK};
use crate::ingest_metrics::{IngestMetrics, IngestMetricsSnapshot};
use crate::receiver::{bind_socket, DatagramReceiver};
use crate::sink::MessageSink;
use crate::store::{spawn_sweeper, FragmentStore, StoreConfig};

/// Runtime configuration for [`start_service`].
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub listen_addr: SocketAddr,
    /// Requested kernel receive buffer; 0 leaves the OS default.
    pub recv_buffer_bytes: usize,
    /// Number of ingest worker threads sharing the store.
    pub workers: usize,
    /// Acknowledgment text; `None` disables acknowledgments.
    pub ack: Option<String>,
    /// Receiver→worker channel depth.
    pub channel_capacity: usize,
    pub sweep_interval: Duration,
    pub store: StoreConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            recv_buffer_bytes: 4 * 1024 * 1024,
            workers: 1,
            ack: Some(DEFAULT_ACK.to_string()),
            channel_capacity: 4096,
            sweep_interval: Duration::from_secs(1),
            store: StoreConfig::default(),
        }
    }
}

/// A running service. Dropping the handle does not stop it; call [`shutdown`](Self::shutdown).
pub struct ServiceHandle {
    pub local_addr: SocketAddr,
    pub store: Arc<FragmentStore>,
    pub metrics: Arc<IngestMetrics>,
    running: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl ServiceHandle {
    pub fn snapshot(&self) -> IngestMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Stop receiving, let the workers drain what is queued, and join all threads
    /// except the sweeper, which exits once the store is dropped.
    pub fn shutdown(self) {
        self.running.store(false, Ordering::SeqCst);
        join_all(self.handles);
    }

    /// Block until every service thread exits.
    pub fn wait(self) {
        join_all(self.handles);
    }
}

/// Join every thread, logging the ones that panicked. Returns how many did.
fn join_all(handles: Vec<JoinHandle<()>>) -> usize {
    let mut panicked = 0;
    for handle in handles {
        let name = handle.thread().name().unwrap_or("unnamed").to_string();
        if handle.join().is_err() {
            tracing::error!(thread = %name, "service thread panicked");
            panicked += 1;
        }
    }
    panicked
}

/// Bind the listening socket and start all service threads.
///
/// Bind failures are returned to the caller; the service never starts half-bound.
pub fn start_service(config: ServiceConfig, sink: Arc<dyn MessageSink>) -> Result<ServiceHandle> {
    let socket = Arc::new(bind_socket(config.listen_addr, config.recv_buffer_bytes)?);
    let local_addr = socket.local_addr()?;

    let metrics = IngestMetrics::new();
    let store = Arc::new(FragmentStore::new(config.store.clone(), metrics.clone()));
    let running = Arc::new(AtomicBool::new(true));
    let (dgram_tx, dgram_rx) = crossbeam_channel::bounded(config.channel_capacity.max(1));

    let acker = config.ack.as_deref().map(|text| Acker::new(socket.clone(), text));
    let mut handles = Vec::with_capacity(config.workers + 1);

    let receiver = DatagramReceiver::new(socket, dgram_tx, metrics.clone(), running.clone());
    handles.push(
        std::thread::Builder::new()
            .name("frag-recv".into())
            .spawn(move || {
                if let Err(e) = receiver.run() {
                    tracing::error!(err = %e, "datagram receiver failed");
                }
            })?,
    );

    for i in 0..config.workers.max(1) {
        let worker = IngestWorker::new(store.clone(), sink.clone(), acker.clone());
        let rx = dgram_rx.clone();
        handles.push(
            std::thread::Builder::new()
                .name(format!("frag-ingest-{}", i))
                .spawn(move || worker.run(rx))?,
        );
    }

    if config.store.ttl.is_some() {
        // Detached: holds only a weak reference to the store.
        spawn_sweeper(&store, config.sweep_interval)?;
    }

    tracing::info!(
        addr = %local_addr,
        workers = config.workers.max(1),
        ttl_ms = config.store.ttl.map(|t| t.as_millis() as u64),
        max_pending = config.store.max_pending,
        "fragment service listening"
    );

    Ok(ServiceHandle { local_addr, store, metrics, running, handles })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::encode_fragments;
    use crate::sink::{ChannelSink, CompletedMessage};
    use std::net::UdpSocket;
    use std::sync::atomic::Ordering::Relaxed;

    fn loopback_config(workers: usize) -> ServiceConfig {
        ServiceConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            recv_buffer_bytes: 0,
            workers,
            ..ServiceConfig::default()
        }
    }

    #[test]
    fn test_loopback_reassembly_with_acks() {
        let (tx, rx) = crossbeam_channel::unbounded::<CompletedMessage>();
        let svc = start_service(loopback_config(2), Arc::new(ChannelSink::new(tx))).unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        let datagrams = encode_fragments(42, "reassembled over loopback", 6);
        let sent = datagrams.len();
        for d in datagrams.iter().rev() {
            client.send_to(d, svc.local_addr).unwrap();
        }

        let msg = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(msg.message_id, 42);
        assert_eq!(msg.payload, b"reassembled over loopback");
        assert_eq!(msg.peer, client.local_addr().unwrap());

        let mut buf = [0u8; 256];
        for _ in 0..sent {
            let (n, from) = client.recv_from(&mut buf).unwrap();
            assert_eq!(&buf[..n], DEFAULT_ACK.as_bytes());
            assert_eq!(from, svc.local_addr);
        }

        let metrics = svc.metrics.clone();
        svc.shutdown();
        assert_eq!(metrics.messages_completed.load(Relaxed), 1);
        assert_eq!(metrics.acks_sent.load(Relaxed), sent as u64);
    }

    #[test]
    fn test_bad_datagram_does_not_stop_service() {
        let (tx, rx) = crossbeam_channel::unbounded::<CompletedMessage>();
        let svc = start_service(loopback_config(1), Arc::new(ChannelSink::new(tx))).unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client.send_to(b"\xff\xfe not json", svc.local_addr).unwrap();
        client
            .send_to(br#"{"id":1,"data":"still alive","total":1,"index":0}"#, svc.local_addr)
            .unwrap();

        let msg = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(msg.payload, b"still alive");

        let metrics = svc.metrics.clone();
        svc.shutdown();
        assert_eq!(metrics.decode_errors.load(Relaxed), 1);
    }

    #[test]
    fn test_join_all_counts_panicked_threads() {
        let ok = std::thread::Builder::new().name("frag-ok".into()).spawn(|| {}).unwrap();
        let bad = std::thread::Builder::new()
            .name("frag-bad".into())
            .spawn(|| panic!("worker failed"))
            .unwrap();
        assert_eq!(join_all(vec![ok, bad]), 1);
        assert_eq!(join_all(Vec::new()), 0);
    }

    #[test]
    fn test_bind_failure_is_reported() {
        let taken = UdpSocket::bind("127.0.0.1:0").unwrap();
        let cfg = ServiceConfig {
            listen_addr: taken.local_addr().unwrap(),
            ..loopback_config(1)
        };
        let (tx, _rx) = crossbeam_channel::unbounded::<CompletedMessage>();
        assert!(start_service(cfg, Arc::new(ChannelSink::new(tx))).is_err());
    }
}
