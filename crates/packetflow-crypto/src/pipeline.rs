//! Packet-level compression and encryption pipelines.
//!
//! Both stages operate on [`packetflow_proto::Packet`] values and respect
//! the `flags` bitset: a pipeline is a no-op unless the packet's own flags
//! ask for it. `Packet::serialize` recomputes `length` and `checksum` from
//! whatever payload is installed when it is finally written to the wire,
//! so pipeline stages never need to patch the header length themselves —
//! they only replace the payload.

use bytes::Bytes;
use packetflow_proto::{Packet, PacketFlags};

use crate::{
    cipher::{self, EncMode},
    compression::{self, CompressionMode},
    error::CryptoError,
};

/// Default payload-size threshold below which compression is skipped even
/// when `flags.Compressed` is requested.
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 256;

/// Compression pipeline bound to one connection's `com_mode`.
#[derive(Debug, Clone, Copy)]
pub struct CompressionPipeline {
    mode: CompressionMode,
    threshold: usize,
}

impl CompressionPipeline {
    /// Build a pipeline for `mode` with [`DEFAULT_COMPRESSION_THRESHOLD`].
    #[must_use]
    pub fn new(mode: CompressionMode) -> Self {
        Self { mode, threshold: DEFAULT_COMPRESSION_THRESHOLD }
    }

    /// Override the compression threshold.
    #[must_use]
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    /// Compress `packet`'s payload if `flags.Compressed` is set and the
    /// payload meets the configured threshold; otherwise returns it
    /// unchanged.
    #[must_use]
    pub fn compress(&self, packet: Packet) -> Packet {
        if !packet.header().flags().contains(PacketFlags::COMPRESSED) {
            return packet;
        }
        if packet.payload().len() < self.threshold {
            return packet;
        }
        let compressed = compression::compress(self.mode, packet.payload());
        packet.with_payload(Bytes::from(compressed))
    }

    /// Inverse of [`Self::compress`].
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::DecompressionFailed`] if the payload is
    /// flagged compressed but is not valid output of `mode`.
    pub fn decompress(&self, packet: Packet) -> Result<Packet, CryptoError> {
        if !packet.header().flags().contains(PacketFlags::COMPRESSED) {
            return Ok(packet);
        }
        let decompressed = compression::decompress(self.mode, packet.payload())?;
        Ok(packet.with_payload(Bytes::from(decompressed)))
    }
}

/// Encryption pipeline bound to one connection's `enc_mode`.
#[derive(Debug, Clone, Copy)]
pub struct CryptoPipeline {
    mode: EncMode,
}

impl CryptoPipeline {
    /// Build a pipeline for `mode`.
    #[must_use]
    pub fn new(mode: EncMode) -> Self {
        Self { mode }
    }

    /// Random bytes the caller must supply to [`Self::encrypt`] (nonce/IV
    /// length for the configured mode).
    #[must_use]
    pub fn random_len(&self) -> usize {
        self.mode.random_len()
    }

    /// Encrypt `packet`'s payload under `key` if `flags.Encrypted` is set;
    /// otherwise returns it unchanged. `random` must be exactly
    /// `self.random_len()` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidNonceLength`] if `random` does not
    /// match the mode's requirement.
    pub fn encrypt(&self, packet: Packet, key: &[u8; 32], random: &[u8]) -> Result<Packet, CryptoError> {
        if !packet.header().flags().contains(PacketFlags::ENCRYPTED) {
            return Ok(packet);
        }
        let ciphertext = cipher::encrypt(self.mode, packet.payload(), key, random)?;
        Ok(packet.with_payload(Bytes::from(ciphertext)))
    }

    /// Inverse of [`Self::encrypt`].
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::DecryptionFailed`] if the payload is flagged
    /// encrypted but authentication fails or the key is wrong. Never
    /// returns partial plaintext on failure.
    pub fn decrypt(&self, packet: Packet, key: &[u8; 32]) -> Result<Packet, CryptoError> {
        if !packet.header().flags().contains(PacketFlags::ENCRYPTED) {
            return Ok(packet);
        }
        let plaintext = cipher::decrypt(self.mode, packet.payload(), key)?;
        Ok(packet.with_payload(Bytes::from(plaintext)))
    }
}
