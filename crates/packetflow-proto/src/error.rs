//! Codec error taxonomy.

use thiserror::Error;

/// Errors raised while serializing or parsing a [`crate::Packet`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Payload exceeds the 65,513-byte cap (header 22 + payload ≤ `u16::MAX`).
    #[error("payload too large: {size} bytes, max {max}")]
    PayloadTooLarge {
        /// Offending payload size.
        size: usize,
        /// Maximum allowed payload size.
        max: usize,
    },

    /// `length` field is smaller than the fixed header size, or the buffer
    /// is otherwise structurally inconsistent (not simply short).
    #[error("malformed frame: {reason}")]
    MalformedFrame {
        /// Human-readable description of the inconsistency.
        reason: String,
    },

    /// CRC-32 recomputed over the packet (checksum field zeroed) does not
    /// match the stored checksum.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// The buffer does not yet contain a complete packet. Not an error in
    /// the usual sense — callers should buffer more bytes and retry.
    #[error("need more bytes to parse a complete packet")]
    NeedMore,
}
