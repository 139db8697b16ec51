pub mod clock;
pub mod error;
pub mod ingest;
pub mod ingest_metrics;
pub mod receiver;
pub mod record;
pub mod service;
pub mod sink;
pub mod store;

pub use error::{ErrorKind, IngestError, ProtocolError};
pub use ingest::{Acker, IngestWorker, DEFAULT_ACK};
pub use ingest_metrics::{IngestMetrics, IngestMetricsSnapshot};
pub use receiver::{DatagramReceiver, RawDatagram, MAX_DATAGRAM};
pub use record::{decode_datagram, encode_fragments, FragmentRecord, WireFragment, DEFAULT_MAX_FRAGMENTS};
pub use service::{start_service, ServiceConfig, ServiceHandle};
pub use sink::{ChannelSink, CompletedMessage, LogSink, MessageSink};
pub use store::{spawn_sweeper, FragmentStore, StoreConfig};
