//! Fragment wire format.
//!
//! One fragment per datagram, encoded as a JSON object:
//!
//! ```text
//! {"id": 7, "data": "Hel", "total": 3, "index": 0}
//! ```
//!
//!   id     = logical message identifier (signed integer)
//!   data   = this fragment's slice of the message (UTF-8 string)
//!   total  = number of fragments the sender split the message into
//!   index  = zero-based position of this fragment, 0 <= index < total
//!
//! Fields are parsed as signed integers so that negative counts surface as
//! protocol errors rather than opaque decode failures.

use serde::{Deserialize, Serialize};

use crate::error::{IngestError, ProtocolError};

/// Upper bound on `total` accepted by default. Slot arrays are allocated up
/// front from the first fragment's `total`, so this caps per-message memory.
pub const DEFAULT_MAX_FRAGMENTS: u32 = 4096;

/// Raw JSON shape of a fragment datagram.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WireFragment {
    pub id: i64,
    pub data: String,
    pub total: i64,
    pub index: i64,
}

/// One validated fragment, ready for the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentRecord {
    pub message_id: i64,
    pub payload: Vec<u8>,
    pub total_count: u32,
    pub index: u32,
}

impl FragmentRecord {
    pub fn new(message_id: i64, payload: impl Into<Vec<u8>>, total_count: u32, index: u32) -> Self {
        Self { message_id, payload: payload.into(), total_count, index }
    }
}

impl WireFragment {
    /// Check the counting fields and convert into a [`FragmentRecord`].
    pub fn validate(self, max_fragments: u32) -> Result<FragmentRecord, ProtocolError> {
        if self.total <= 0 || self.total > max_fragments as i64 {
            return Err(ProtocolError::InvalidTotal {
                id: self.id,
                total: self.total,
                max: max_fragments,
            });
        }
        let total = self.total as u32;
        if self.index < 0 || self.index >= self.total {
            return Err(ProtocolError::IndexOutOfRange {
                id: self.id,
                index: self.index,
                total,
            });
        }
        Ok(FragmentRecord {
            message_id: self.id,
            payload: self.data.into_bytes(),
            total_count: total,
            index: self.index as u32,
        })
    }
}

/// Decode one datagram into a validated fragment.
pub fn decode_datagram(bytes: &[u8], max_fragments: u32) -> Result<FragmentRecord, IngestError> {
    let wire: WireFragment = serde_json::from_slice(bytes)?;
    Ok(wire.validate(max_fragments)?)
}

/// Split `text` into JSON datagrams of at most `chunk_size` bytes of payload each.
///
/// Chunks are cut on UTF-8 character boundaries, so a chunk may be shorter than
/// `chunk_size` and a single multi-byte character wider than `chunk_size` still
/// travels as one chunk. An empty message becomes a single empty fragment.
pub fn encode_fragments(message_id: i64, text: &str, chunk_size: usize) -> Vec<Vec<u8>> {
    let chunks = split_on_char_boundaries(text, chunk_size.max(1));
    let total = chunks.len() as i64;
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let wire = WireFragment {
                id: message_id,
                data: chunk.to_string(),
                total,
                index: i as i64,
            };
            // Serializing a struct of strings and integers cannot fail.
            serde_json::to_vec(&wire).unwrap_or_default()
        })
        .collect()
}

fn split_on_char_boundaries(text: &str, chunk_size: usize) -> Vec<&str> {
    if text.is_empty() {
        return vec![""];
    }
    let mut chunks = Vec::with_capacity(text.len() / chunk_size + 1);
    let mut start = 0;
    while start < text.len() {
        let mut end = (start + chunk_size).min(text.len());
        while !text.is_char_boundary(end) {
            end += 1;
        }
        chunks.push(&text[start..end]);
        start = end;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_decode_valid() {
        let rec = decode_datagram(br#"{"id":7,"data":"Hel","total":3,"index":0}"#, 16).unwrap();
        assert_eq!(rec, FragmentRecord::new(7, "Hel", 3, 0));
    }

    #[test]
    fn test_decode_ignores_unknown_fields() {
        let rec =
            decode_datagram(br#"{"id":1,"data":"x","total":1,"index":0,"ts":99}"#, 16).unwrap();
        assert_eq!(rec.payload, b"x");
    }

    #[test]
    fn test_decode_malformed_json() {
        let err = decode_datagram(b"not json", 16).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
    }

    #[test]
    fn test_decode_missing_field() {
        let err = decode_datagram(br#"{"id":1,"data":"x","total":1}"#, 16).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
    }

    #[test]
    fn test_decode_negative_index_is_protocol_error() {
        let err = decode_datagram(br#"{"id":1,"data":"x","total":2,"index":-1}"#, 16).unwrap_err();
        assert!(matches!(
            err,
            IngestError::Protocol(ProtocolError::IndexOutOfRange { index: -1, total: 2, .. })
        ));
    }

    #[test]
    fn test_decode_index_past_total() {
        let err = decode_datagram(br#"{"id":1,"data":"x","total":2,"index":2}"#, 16).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_decode_total_bounds() {
        let zero = decode_datagram(br#"{"id":1,"data":"x","total":0,"index":0}"#, 16).unwrap_err();
        assert!(matches!(zero, IngestError::Protocol(ProtocolError::InvalidTotal { .. })));
        let huge = decode_datagram(br#"{"id":1,"data":"x","total":17,"index":0}"#, 16).unwrap_err();
        assert!(matches!(huge, IngestError::Protocol(ProtocolError::InvalidTotal { .. })));
    }

    #[test]
    fn test_encode_splits_in_index_order() {
        let datagrams = encode_fragments(7, "Hello, World", 5);
        let recs: Vec<FragmentRecord> =
            datagrams.iter().map(|d| decode_datagram(d, 16).unwrap()).collect();
        assert_eq!(recs.len(), 3);
        assert_eq!(recs[0].payload, b"Hello");
        assert_eq!(recs[1].payload, b", Wor");
        assert_eq!(recs[2].payload, b"ld");
        assert!(recs.iter().all(|r| r.total_count == 3 && r.message_id == 7));
    }

    #[test]
    fn test_encode_respects_char_boundaries() {
        // "é" is two bytes; a 1-byte chunk size must not split it.
        let datagrams = encode_fragments(1, "aéb", 1);
        let payloads: Vec<Vec<u8>> =
            datagrams.iter().map(|d| decode_datagram(d, 16).unwrap().payload).collect();
        assert_eq!(payloads, vec![b"a".to_vec(), "é".as_bytes().to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn test_encode_empty_message() {
        let datagrams = encode_fragments(3, "", 8);
        assert_eq!(datagrams.len(), 1);
        let rec = decode_datagram(&datagrams[0], 16).unwrap();
        assert_eq!(rec.total_count, 1);
        assert!(rec.payload.is_empty());
    }
}
