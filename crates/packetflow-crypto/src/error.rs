//! Crypto and compression pipeline error taxonomy.

use thiserror::Error;

/// Errors raised by the encryption or compression pipelines.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// Authenticated decryption failed (tampered ciphertext or wrong key).
    /// Never carries the plaintext it failed to recover.
    #[error("decryption failed")]
    DecryptionFailed,

    /// Decompression failed on corrupt or truncated data.
    #[error("decompression failed: {reason}")]
    DecompressionFailed {
        /// Human-readable description of the failure.
        reason: String,
    },

    /// Supplied key was not exactly 32 bytes.
    #[error("invalid key length: expected 32, got {actual}")]
    InvalidKeyLength {
        /// Actual key length supplied.
        actual: usize,
    },

    /// Supplied nonce/IV/random material did not match the cipher's
    /// required length.
    #[error("invalid nonce length: expected {expected}, got {actual}")]
    InvalidNonceLength {
        /// Length the cipher strategy requires.
        expected: usize,
        /// Actual length supplied.
        actual: usize,
    },

    /// Ciphertext was shorter than the cipher's minimum frame (nonce plus
    /// at least one block/tag).
    #[error("ciphertext too short: {actual} bytes, need at least {minimum}")]
    CiphertextTooShort {
        /// Minimum ciphertext length required to contain nonce/IV and tag.
        minimum: usize,
        /// Actual ciphertext length supplied.
        actual: usize,
    },
}
