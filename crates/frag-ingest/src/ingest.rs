//! Ingest workers: decode → store → sink → acknowledgment.
//!
//! Accepts [`RawDatagram`]s from [`DatagramReceiver`](crate::receiver::DatagramReceiver),
//! decodes each into a [`FragmentRecord`](crate::record::FragmentRecord), and feeds it
//! to the shared [`FragmentStore`] with a single combined add-and-assemble call.
//! Completed messages go to the configured [`MessageSink`]; every stored fragment is
//! acknowledged to the address it came from.
//!
//! A bad datagram is logged, counted, and dropped. It never stops the worker,
//! and the sender gets no reply for it.

use crossbeam_channel::Receiver;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;

use crate::error::IngestError;
use crate::ingest_metrics::IngestMetrics;
use crate::receiver::RawDatagram;
use crate::record::decode_datagram;
use crate::sink::{CompletedMessage, MessageSink};
use crate::store::FragmentStore;

/// Acknowledgment text sent for every stored fragment unless configured otherwise.
pub const DEFAULT_ACK: &str = "Mensagem recebida com sucesso";

/// Where and what to acknowledge.
#[derive(Clone)]
pub struct Acker {
    socket: Arc<UdpSocket>,
    message: Arc<[u8]>,
}

impl Acker {
    pub fn new(socket: Arc<UdpSocket>, message: &str) -> Self {
        Self { socket, message: Arc::from(message.as_bytes()) }
    }

    fn send(&self, peer: SocketAddr, metrics: &IngestMetrics) {
        match self.socket.send_to(&self.message, peer) {
            Ok(_) => {
                metrics.acks_sent.fetch_add(1, Relaxed);
            }
            Err(e) => {
                metrics.ack_errors.fetch_add(1, Relaxed);
                tracing::warn!(%peer, err = %e, "failed to send acknowledgment");
            }
        }
    }
}

pub struct IngestWorker {
    store: Arc<FragmentStore>,
    sink: Arc<dyn MessageSink>,
    acker: Option<Acker>,
    metrics: Arc<IngestMetrics>,
}

impl IngestWorker {
    pub fn new(
        store: Arc<FragmentStore>,
        sink: Arc<dyn MessageSink>,
        acker: Option<Acker>,
    ) -> Self {
        let metrics = store.metrics().clone();
        Self { store, sink, acker, metrics }
    }

    /// Drain `rx` until every sender is gone.
    pub fn run(&self, rx: Receiver<RawDatagram>) {
        tracing::info!("ingest worker started");
        for datagram in &rx {
            self.process(datagram);
        }
        tracing::info!("ingest worker stopped");
    }

    /// Handle one datagram. Returns the completed message, if this fragment finished one.
    pub fn process(&self, datagram: RawDatagram) -> Option<CompletedMessage> {
        let peer = datagram.peer;

        let completed = match self.ingest(&datagram.data) {
            Ok(completed) => completed,
            Err(e) => {
                match e {
                    IngestError::Decode(_) => self.metrics.decode_errors.fetch_add(1, Relaxed),
                    IngestError::Protocol(_) => self.metrics.protocol_errors.fetch_add(1, Relaxed),
                };
                tracing::warn!(%peer, kind = %e.kind(), err = %e, "fragment rejected");
                return None;
            }
        };

        let completed = completed.map(|(message_id, payload)| {
            let msg = CompletedMessage { message_id, payload, peer };
            self.sink.deliver(&msg);
            msg
        });

        if let Some(acker) = &self.acker {
            acker.send(peer, &self.metrics);
        }

        completed
    }

    fn ingest(&self, data: &[u8]) -> Result<Option<(i64, Vec<u8>)>, IngestError> {
        let record = decode_datagram(data, self.store.config().max_fragments)?;
        let id = record.message_id;
        tracing::trace!(id, index = record.index, total = record.total_count, "fragment decoded");
        let assembled = self.store.add_and_try_assemble(record)?;
        Ok(assembled.map(|payload| (id, payload)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::encode_fragments;
    use crate::sink::ChannelSink;
    use crate::store::StoreConfig;
    use std::time::Duration;

    fn datagram(data: &[u8]) -> RawDatagram {
        RawDatagram {
            data: data.to_vec(),
            peer: "127.0.0.1:40000".parse().unwrap(),
            recv_timestamp_ns: 0,
        }
    }

    fn worker() -> (IngestWorker, crossbeam_channel::Receiver<CompletedMessage>) {
        let store = Arc::new(FragmentStore::new(StoreConfig::default(), IngestMetrics::new()));
        let (tx, rx) = crossbeam_channel::unbounded();
        (IngestWorker::new(store, Arc::new(ChannelSink::new(tx)), None), rx)
    }

    #[test]
    fn test_process_completes_and_delivers_once() {
        let (w, rx) = worker();
        assert!(w.process(datagram(br#"{"id":7,"data":" World","total":3,"index":2}"#)).is_none());
        assert!(w.process(datagram(br#"{"id":7,"data":"Hel","total":3,"index":0}"#)).is_none());
        let done = w.process(datagram(br#"{"id":7,"data":"lo,","total":3,"index":1}"#)).unwrap();

        assert_eq!(done.message_id, 7);
        assert_eq!(done.payload, b"Hello, World");
        assert_eq!(rx.try_recv().unwrap(), done);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_decode_error_is_counted_and_skipped() {
        let (w, rx) = worker();
        assert!(w.process(datagram(b"{oops")).is_none());
        assert!(w.process(datagram(br#"{"id":1,"data":"ok","total":1,"index":0}"#)).is_some());
        assert_eq!(w.metrics.decode_errors.load(Relaxed), 1);
        assert_eq!(rx.len(), 1);
    }

    #[test]
    fn test_protocol_error_is_counted() {
        let (w, _rx) = worker();
        w.process(datagram(br#"{"id":1,"data":"a","total":2,"index":0}"#));
        w.process(datagram(br#"{"id":1,"data":"b","total":3,"index":1}"#));
        w.process(datagram(br#"{"id":2,"data":"b","total":2,"index":9}"#));
        assert_eq!(w.metrics.protocol_errors.load(Relaxed), 2);
        assert_eq!(w.store.missing_fragments(1), Some((vec![1], 2)));
    }

    #[test]
    fn test_run_drains_until_disconnected() {
        let (w, rx) = worker();
        let (tx, in_rx) = crossbeam_channel::bounded(16);
        for d in encode_fragments(3, "fragmented payload", 4).into_iter().rev() {
            tx.send(datagram(&d)).unwrap();
        }
        drop(tx);
        w.run(in_rx);

        let msg = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(msg.payload, b"fragmented payload");
        assert_eq!(w.store.pending_count(), 0);
    }

    #[test]
    fn test_ack_goes_to_sender_not_listener() {
        let listener = Arc::new(UdpSocket::bind("127.0.0.1:0").unwrap());
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        let store = Arc::new(FragmentStore::new(StoreConfig::default(), IngestMetrics::new()));
        let (tx, _rx) = crossbeam_channel::unbounded();
        let w = IngestWorker::new(
            store,
            Arc::new(ChannelSink::new(tx)),
            Some(Acker::new(listener, DEFAULT_ACK)),
        );

        let mut d = datagram(br#"{"id":1,"data":"a","total":2,"index":0}"#);
        d.peer = client.local_addr().unwrap();
        w.process(d);

        let mut buf = [0u8; 128];
        let (n, _) = client.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], DEFAULT_ACK.as_bytes());
        assert_eq!(w.metrics.acks_sent.load(Relaxed), 1);
    }

    #[test]
    fn test_no_ack_for_rejected_datagram() {
        let listener = Arc::new(UdpSocket::bind("127.0.0.1:0").unwrap());
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        let store = Arc::new(FragmentStore::new(StoreConfig::default(), IngestMetrics::new()));
        let (tx, _rx) = crossbeam_channel::unbounded();
        let w = IngestWorker::new(
            store,
            Arc::new(ChannelSink::new(tx)),
            Some(Acker::new(listener, DEFAULT_ACK)),
        );

        let mut d = datagram(b"garbage");
        d.peer = client.local_addr().unwrap();
        w.process(d);
        assert_eq!(w.metrics.acks_sent.load(Relaxed), 0);
    }
}
