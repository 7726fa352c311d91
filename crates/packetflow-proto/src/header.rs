//! Fixed 22-byte packet header with zero-copy parsing.
//!
//! All multi-byte fields are little-endian, per the wire contract. Fields
//! are stored as raw byte arrays so the packed layout has no alignment
//! requirements and every 22-byte pattern is a structurally valid header.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::CodecError;

/// Payload interpretation hint carried in the header's `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum PacketType {
    /// Opaque binary payload.
    Binary,
    /// UTF-8 text payload.
    String,
    /// JSON-encoded payload.
    Json,
    /// Application-defined interpretation.
    Custom,
}

impl PacketType {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Binary),
            1 => Some(Self::String),
            2 => Some(Self::Json),
            3 => Some(Self::Custom),
            _ => None,
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Self::Binary => 0,
            Self::String => 1,
            Self::Json => 2,
            Self::Custom => 3,
        }
    }
}

/// Advisory delivery priority. Never interpreted by the core; handlers may
/// read it to schedule their own work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[non_exhaustive]
pub enum Priority {
    /// No priority asserted.
    None,
    /// Low priority.
    Low,
    /// Normal priority.
    Normal,
    /// High priority.
    High,
}

impl Priority {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Low),
            2 => Some(Self::Normal),
            3 => Some(Self::High),
            _ => None,
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Low => 1,
            Self::Normal => 2,
            Self::High => 3,
        }
    }
}

/// Per-packet bitset indicating which pipeline stages the sender applied.
///
/// Hand-rolled rather than pulled from the `bitflags` crate, matching the
/// rest of this codebase's preference for small, explicit bit-twiddling
/// over another dependency.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketFlags(u8);

impl PacketFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// Payload was compressed by the sender's compression pipeline.
    pub const COMPRESSED: Self = Self(1 << 0);
    /// Payload was encrypted by the sender's crypto pipeline.
    pub const ENCRYPTED: Self = Self(1 << 1);
    /// Sender marked this packet as high priority (advisory).
    pub const PRIORITY: Self = Self(1 << 2);
    /// Acknowledgement packet.
    pub const ACK: Self = Self(1 << 3);

    /// Decode a raw flags byte.
    #[must_use]
    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// Encode back to a raw byte.
    #[must_use]
    pub fn to_byte(self) -> u8 {
        self.0
    }

    /// Whether every bit in `other` is set in `self`.
    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set-union of two flag sets.
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl std::fmt::Debug for PacketFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut set = f.debug_set();
        if self.contains(Self::COMPRESSED) {
            set.entry(&"COMPRESSED");
        }
        if self.contains(Self::ENCRYPTED) {
            set.entry(&"ENCRYPTED");
        }
        if self.contains(Self::PRIORITY) {
            set.entry(&"PRIORITY");
        }
        if self.contains(Self::ACK) {
            set.entry(&"ACK");
        }
        set.finish()
    }
}

/// Fixed 22-byte packet header (little-endian wire format).
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct PacketHeader {
    length: [u8; 2],
    id: [u8; 2],
    checksum: [u8; 4],
    timestamp: [u8; 8],
    number: u8,
    packet_type: u8,
    flags: u8,
    priority: u8,
    command: [u8; 2],
}

impl PacketHeader {
    /// Serialized header size in bytes.
    pub const SIZE: usize = 22;

    /// Maximum payload size (`u16::MAX - SIZE`), so `length` stays in range.
    pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize - Self::SIZE;

    /// Build a header for a freshly constructed packet. `length` and
    /// `checksum` are left at zero; the codec fills them in during
    /// serialization once the payload is known.
    #[must_use]
    pub fn new(id: u16, command: u16, packet_type: PacketType) -> Self {
        Self {
            length: 0u16.to_le_bytes(),
            id: id.to_le_bytes(),
            checksum: [0; 4],
            timestamp: 0u64.to_le_bytes(),
            number: 0,
            packet_type: packet_type.to_u8(),
            flags: PacketFlags::NONE.to_byte(),
            priority: Priority::None.to_u8(),
            command: command.to_le_bytes(),
        }
    }

    /// View `bytes` as a header without copying.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::MalformedFrame`] if `bytes` is shorter than
    /// [`Self::SIZE`].
    pub fn ref_from_bytes(bytes: &[u8]) -> Result<&Self, CodecError> {
        Self::ref_from_prefix(bytes)
            .map(|(header, _)| header)
            .map_err(|_| CodecError::MalformedFrame { reason: "buffer shorter than header".into() })
    }

    /// Serialize to an owned byte array.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(IntoBytes::as_bytes(self));
        arr
    }

    /// Total packet length (header + payload), as declared by the sender.
    #[must_use]
    pub fn length(&self) -> u16 {
        u16::from_le_bytes(self.length)
    }

    /// Set the total packet length.
    pub fn set_length(&mut self, length: u16) {
        self.length = length.to_le_bytes();
    }

    /// Handler- or sender-defined sequence id.
    #[must_use]
    pub fn id(&self) -> u16 {
        u16::from_le_bytes(self.id)
    }

    /// CRC-32 checksum, computed with this field zeroed.
    #[must_use]
    pub fn checksum(&self) -> u32 {
        u32::from_le_bytes(self.checksum)
    }

    /// Set the checksum field.
    pub fn set_checksum(&mut self, checksum: u32) {
        self.checksum = checksum.to_le_bytes();
    }

    /// Sender timestamp in microseconds since a fixed epoch.
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        u64::from_le_bytes(self.timestamp)
    }

    /// Set the sender timestamp.
    pub fn set_timestamp(&mut self, timestamp: u64) {
        self.timestamp = timestamp.to_le_bytes();
    }

    /// Retransmit/ordering tag.
    #[must_use]
    pub fn number(&self) -> u8 {
        self.number
    }

    /// Set the retransmit/ordering tag.
    pub fn set_number(&mut self, number: u8) {
        self.number = number;
    }

    /// Payload type hint. `None` if the byte does not match a known variant.
    #[must_use]
    pub fn packet_type(&self) -> Option<PacketType> {
        PacketType::from_u8(self.packet_type)
    }

    /// Set the payload type hint.
    pub fn set_packet_type(&mut self, packet_type: PacketType) {
        self.packet_type = packet_type.to_u8();
    }

    /// Pipeline-stage flags.
    #[must_use]
    pub fn flags(&self) -> PacketFlags {
        PacketFlags::from_byte(self.flags)
    }

    /// Set the pipeline-stage flags.
    pub fn set_flags(&mut self, flags: PacketFlags) {
        self.flags = flags.to_byte();
    }

    /// Advisory priority. `None` if the byte does not match a known variant.
    #[must_use]
    pub fn priority(&self) -> Option<Priority> {
        Priority::from_u8(self.priority)
    }

    /// Set the advisory priority.
    pub fn set_priority(&mut self, priority: Priority) {
        self.priority = priority.to_u8();
    }

    /// Handler key.
    #[must_use]
    pub fn command(&self) -> u16 {
        u16::from_le_bytes(self.command)
    }

    /// Set the handler key.
    pub fn set_command(&mut self, command: u16) {
        self.command = command.to_le_bytes();
    }
}

impl std::fmt::Debug for PacketHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketHeader")
            .field("length", &self.length())
            .field("id", &self.id())
            .field("checksum", &format!("{:#010x}", self.checksum()))
            .field("timestamp", &self.timestamp())
            .field("number", &self.number())
            .field("packet_type", &self.packet_type())
            .field("flags", &self.flags())
            .field("priority", &self.priority())
            .field("command", &self.command())
            .finish()
    }
}

impl PartialEq for PacketHeader {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for PacketHeader {}
