//! Pluggable compression and authenticated-encryption pipelines.
//!
//! Strategy selection is per-connection (`enc_mode`/`com_mode`) and
//! per-packet (the `flags` bitset); see [`pipeline::CryptoPipeline`] and
//! [`pipeline::CompressionPipeline`] for the packet-aware wrappers, or
//! [`cipher`]/[`compression`] directly for the raw byte transforms.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod cipher;
pub mod compression;
mod error;
mod pipeline;

pub use cipher::EncMode;
pub use compression::CompressionMode;
pub use error::CryptoError;
pub use pipeline::{CompressionPipeline, CryptoPipeline, DEFAULT_COMPRESSION_THRESHOLD};
