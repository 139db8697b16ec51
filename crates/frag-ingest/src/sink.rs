//! Destinations for completed messages.

use crossbeam_channel::Sender;
use std::net::SocketAddr;

/// A fully reassembled logical message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedMessage {
    pub message_id: i64,
    pub payload: Vec<u8>,
    /// Sender of the fragment that completed the message.
    pub peer: SocketAddr,
}

impl CompletedMessage {
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Receives each completed message exactly once.
pub trait MessageSink: Send + Sync + 'static {
    fn deliver(&self, msg: &CompletedMessage);
}

/// Prints one console line per completed message.
pub struct LogSink;

impl MessageSink for LogSink {
    fn deliver(&self, msg: &CompletedMessage) {
        tracing::info!(id = msg.message_id, len = msg.len(), peer = %msg.peer, "message complete");
        println!(
            "message {} complete ({} bytes): {}",
            msg.message_id,
            msg.len(),
            String::from_utf8_lossy(&msg.payload)
        );
    }
}

/// Forwards completed messages to a channel.
pub struct ChannelSink {
    tx: Sender<CompletedMessage>,
}

impl ChannelSink {
    pub fn new(tx: Sender<CompletedMessage>) -> Self {
        Self { tx }
    }
}

impl MessageSink for ChannelSink {
    fn deliver(&self, msg: &CompletedMessage) {
        if self.tx.send(msg.clone()).is_err() {
            tracing::debug!(id = msg.message_id, "completion receiver gone, message discarded");
        }
    }
}
