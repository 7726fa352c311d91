//! `XChaCha20-Poly1305` authenticated encryption.
//!
//! Pure functions — the caller supplies the random nonce suffix, keeping
//! this module deterministic and testable without a real RNG.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};

use crate::error::CryptoError;

/// `XChaCha20` uses a 24-byte nonce.
pub const NONCE_LEN: usize = 24;

/// Encrypt `plaintext` under `key`, returning `nonce || ciphertext || tag`.
pub fn encrypt(plaintext: &[u8], key: &[u8; 32], nonce: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if nonce.len() != NONCE_LEN {
        return Err(CryptoError::InvalidNonceLength { expected: NONCE_LEN, actual: nonce.len() });
    }
    let cipher = XChaCha20Poly1305::new(key.into());
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(nonce), plaintext)
        .map_err(|_| CryptoError::DecryptionFailed)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a buffer produced by [`encrypt`]. Never returns partial
/// plaintext on authentication failure.
pub fn decrypt(framed: &[u8], key: &[u8; 32]) -> Result<Vec<u8>, CryptoError> {
    if framed.len() < NONCE_LEN {
        return Err(CryptoError::CiphertextTooShort { minimum: NONCE_LEN, actual: framed.len() });
    }
    let (nonce, ciphertext) = framed.split_at(NONCE_LEN);
    let cipher = XChaCha20Poly1305::new(key.into());
    cipher.decrypt(XNonce::from_slice(nonce), ciphertext).map_err(|_| CryptoError::DecryptionFailed)
}
