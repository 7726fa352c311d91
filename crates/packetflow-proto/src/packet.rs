//! The [`Packet`] value type and its wire codec.

use bytes::Bytes;
use crc::{CRC_32_ISO_HDLC, Crc};
use packetflow_pool::BufferPool;

use crate::{
    error::CodecError,
    header::{PacketHeader, PacketType},
};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Writes at or below this total size use a stack buffer rather than the
/// heap or the buffer pool — an optimization, not part of the wire
/// contract.
const STACK_SERIALIZE_THRESHOLD: usize = 512;

/// An immutable (post-construction) wire packet: fixed header plus
/// variable-length payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    header: PacketHeader,
    payload: Bytes,
}

impl Packet {
    /// Build a new packet. `length` and `checksum` in the header are
    /// computed at serialization time, not here.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::PayloadTooLarge`] if `payload.len()` exceeds
    /// [`PacketHeader::MAX_PAYLOAD_SIZE`].
    pub fn new(
        id: u16,
        command: u16,
        packet_type: PacketType,
        payload: impl Into<Bytes>,
    ) -> Result<Self, CodecError> {
        let payload = payload.into();
        if payload.len() > PacketHeader::MAX_PAYLOAD_SIZE {
            return Err(CodecError::PayloadTooLarge {
                size: payload.len(),
                max: PacketHeader::MAX_PAYLOAD_SIZE,
            });
        }
        Ok(Self { header: PacketHeader::new(id, command, packet_type), payload })
    }

    /// Construct directly from a header and payload, skipping the size
    /// check performed by [`Self::new`] (used by the pipeline stages, which
    /// replace the payload after the original packet was already validated).
    #[must_use]
    pub fn from_parts(header: PacketHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// The packet's header.
    #[must_use]
    pub fn header(&self) -> &PacketHeader {
        &self.header
    }

    /// Mutable access to the header, e.g. to flip flags before
    /// re-serializing.
    pub fn header_mut(&mut self) -> &mut PacketHeader {
        &mut self.header
    }

    /// The packet's payload.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Replace the payload (used by compression/encryption pipeline
    /// stages), returning the packet with the new payload installed.
    #[must_use]
    pub fn with_payload(mut self, payload: Bytes) -> Self {
        self.payload = payload;
        self
    }

    /// Serialize to a contiguous byte buffer: header (length + checksum
    /// patched in) followed by payload.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::PayloadTooLarge`] if the payload no longer fits
    /// after pipeline transforms (e.g. AEAD tag expansion).
    pub fn serialize(&self) -> Result<Bytes, CodecError> {
        let total_len = self.total_len()?;
        if total_len <= STACK_SERIALIZE_THRESHOLD {
            let mut buf = [0u8; STACK_SERIALIZE_THRESHOLD];
            self.encode_into(&mut buf[..total_len], total_len);
            Ok(Bytes::copy_from_slice(&buf[..total_len]))
        } else {
            let mut buf = vec![0u8; total_len];
            self.encode_into(&mut buf, total_len);
            Ok(Bytes::from(buf))
        }
    }

    /// Serialize using a [`BufferPool`] for allocations above the stack
    /// threshold, avoiding a heap allocation on the hot path.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::PayloadTooLarge`] if the payload no longer fits
    /// after pipeline transforms.
    pub fn serialize_with_pool(&self, pool: &BufferPool) -> Result<Bytes, CodecError> {
        let total_len = self.total_len()?;
        if total_len <= STACK_SERIALIZE_THRESHOLD {
            return self.serialize();
        }
        let mut buf = pool.rent(total_len);
        self.encode_into(&mut buf, total_len);
        Ok(Bytes::copy_from_slice(&buf))
    }

    fn total_len(&self) -> Result<usize, CodecError> {
        let total_len = PacketHeader::SIZE + self.payload.len();
        if self.payload.len() > PacketHeader::MAX_PAYLOAD_SIZE {
            return Err(CodecError::PayloadTooLarge {
                size: self.payload.len(),
                max: PacketHeader::MAX_PAYLOAD_SIZE,
            });
        }
        Ok(total_len)
    }

    fn encode_into(&self, buf: &mut [u8], total_len: usize) {
        debug_assert_eq!(buf.len(), total_len);
        let mut header = self.header;
        header.set_length(total_len as u16);
        header.set_checksum(0);
        buf[..PacketHeader::SIZE].copy_from_slice(&header.to_bytes());
        buf[PacketHeader::SIZE..].copy_from_slice(&self.payload);

        let checksum = CRC32.checksum(buf);
        buf[4..8].copy_from_slice(&checksum.to_le_bytes());
    }

    /// Parse a packet from the front of `bytes`.
    ///
    /// Requires `bytes` to contain at least one complete packet; bytes past
    /// `length` are ignored by the caller (the stream reader is responsible
    /// for slicing per-packet and re-buffering the remainder).
    ///
    /// # Errors
    ///
    /// - [`CodecError::NeedMore`] if `bytes` does not yet hold a complete
    ///   header, or the header's `length` claims more bytes than are
    ///   available (the common case on a partially-read TCP stream).
    /// - [`CodecError::MalformedFrame`] if `length` is smaller than the
    ///   fixed header size.
    /// - [`CodecError::ChecksumMismatch`] if the CRC-32 does not match.
    pub fn try_parse(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < PacketHeader::SIZE {
            return Err(CodecError::NeedMore);
        }
        let header = PacketHeader::ref_from_bytes(bytes)?;
        let length = header.length() as usize;
        if length < PacketHeader::SIZE {
            return Err(CodecError::MalformedFrame {
                reason: format!("length {length} is smaller than header size {}", PacketHeader::SIZE),
            });
        }
        if length > bytes.len() {
            return Err(CodecError::NeedMore);
        }

        let mut check_buf = bytes[..length].to_vec();
        check_buf[4..8].copy_from_slice(&[0; 4]);
        let computed = CRC32.checksum(&check_buf);
        if computed != header.checksum() {
            return Err(CodecError::ChecksumMismatch);
        }

        let header = *header;
        let payload = Bytes::copy_from_slice(&bytes[PacketHeader::SIZE..length]);
        Ok(Self { header, payload })
    }
}
