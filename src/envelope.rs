//! Versioned wire format for queued messages.
//!
//! Every payload is wrapped in an [Envelope] before it touches the store: the
//! same encoding is used for pending list entries and for lease records (a
//! lease record carries the claim time in the timestamp slot). The format is
//! explicitly versioned so independent producers and consumers can interoperate:
//!
//! ```text
//! +---+---+---+---+---+---+---+---+---+---+---+---+---+-------------+
//! | 0 | 1 | 2 | 3 | 4 | 5 | 6 | 7 | 8 | 9 |10 |11 |12 |     ...     |
//! +---+---+---+---+---+---+---+---+---+---+---+---+---+-------------+
//! |Ver|  Timestamp (u64 millis, BE)   | Payload len   |   Payload   |
//! +---+---+---+---+---+---+---+---+---+---+---+---+---+-------------+
//! ```
//!
//! Encoding rejects payloads longer than [MAX_PAYLOAD_LEN]; decoding rejects
//! unknown versions, truncated input, and trailing bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Current wire format version.
const FORMAT_VERSION: u8 = 1;

/// Encoded length of the version byte, timestamp, and payload length.
const HEADER_LEN: usize = 1 + 8 + 4;

/// Maximum payload length the length prefix can represent.
pub const MAX_PAYLOAD_LEN: usize = u32::MAX as usize;

/// Errors that can occur when decoding an [Envelope].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("unexpected end of buffer")]
    EndOfBuffer,
    #[error("extra data found: {0} bytes")]
    ExtraData(usize),
    #[error("unknown format version: {0}")]
    UnknownVersion(u8),
    #[error("payload length {0} exceeds maximum")]
    LengthExceeded(usize),
}

/// A timestamped payload, immutable once created.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    /// When the payload entered its current state (enqueued for list entries,
    /// claimed for lease records).
    pub stamped_at: SystemTime,

    /// The opaque payload.
    pub payload: Bytes,
}

impl Envelope {
    /// Wrap `payload` with the given timestamp.
    pub fn new(stamped_at: SystemTime, payload: Bytes) -> Self {
        Self {
            stamped_at,
            payload,
        }
    }

    /// Encode to the versioned wire format.
    ///
    /// Timestamps are truncated to millisecond precision. Fails with
    /// [Error::LengthExceeded] if the payload is longer than
    /// [MAX_PAYLOAD_LEN].
    pub fn encode(&self) -> Result<Bytes, Error> {
        if self.payload.len() > MAX_PAYLOAD_LEN {
            return Err(Error::LengthExceeded(self.payload.len()));
        }
        let millis = self
            .stamped_at
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_u8(FORMAT_VERSION);
        buf.put_u64(millis);
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Decode from the versioned wire format, ensuring the entire buffer is
    /// consumed.
    pub fn decode(mut buf: Bytes) -> Result<Self, Error> {
        if buf.remaining() < HEADER_LEN {
            return Err(Error::EndOfBuffer);
        }
        let version = buf.get_u8();
        if version != FORMAT_VERSION {
            return Err(Error::UnknownVersion(version));
        }
        let millis = buf.get_u64();
        let len = buf.get_u32() as usize;
        if buf.remaining() < len {
            return Err(Error::EndOfBuffer);
        }
        if buf.remaining() > len {
            return Err(Error::ExtraData(buf.remaining() - len));
        }
        let payload = buf.copy_to_bytes(len);
        Ok(Self {
            stamped_at: UNIX_EPOCH + Duration::from_millis(millis),
            payload,
        })
    }
}
