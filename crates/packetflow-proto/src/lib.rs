//! Wire packet format for the packetflow server framework.
//!
//! A packet is a fixed 22-byte little-endian header followed by a payload
//! of at most 65,513 bytes. [`Packet::serialize`]/[`Packet::try_parse`] are
//! the codec boundary; everything else (compression, encryption, routing)
//! operates on the resulting [`Packet`] value.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod error;
mod header;
mod packet;

pub use error::CodecError;
pub use header::{PacketFlags, PacketHeader, PacketType, Priority};
pub use packet::Packet;
