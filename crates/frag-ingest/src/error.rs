//! Error taxonomy for fragment ingestion.

use std::fmt;

/// A fragment that decoded cleanly but violates the fragmentation protocol.
///
/// Rejected fragments never touch the store's slot arrays.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("message {id}: total fragment count {total} outside 1..={max}")]
    InvalidTotal { id: i64, total: i64, max: u32 },

    #[error("message {id}: fragment index {index} outside 0..{total}")]
    IndexOutOfRange { id: i64, index: i64, total: u32 },

    #[error("message {id}: fragment declares {got} fragments but the open message has {expected}")]
    TotalMismatch { id: i64, expected: u32, got: u32 },
}

/// Why a single datagram could not be turned into a stored fragment.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("malformed fragment record: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl IngestError {
    /// Short label used for log fields and counters.
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::Decode(_) => ErrorKind::Decode,
            IngestError::Protocol(_) => ErrorKind::Protocol,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Decode,
    Protocol,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Decode => f.write_str("decode"),
            ErrorKind::Protocol => f.write_str("protocol"),
        }
    }
}
