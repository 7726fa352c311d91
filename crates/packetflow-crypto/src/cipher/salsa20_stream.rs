//! Salsa20 streaming cipher (unauthenticated).
//!
//! Unlike the AEAD mode, Salsa20 provides confidentiality only — callers
//! that need integrity should not select this mode for untrusted peers.
//! Included because the connection's `enc_mode` contract names it
//! explicitly as a streaming option.

use cipher::{KeyIvInit, StreamCipher};
use salsa20::Salsa20;

use crate::error::CryptoError;

/// Salsa20 uses an 8-byte nonce.
pub const NONCE_LEN: usize = 8;

/// Encrypt `plaintext` under `key`, returning `nonce || keystream XOR
/// plaintext`.
pub fn encrypt(plaintext: &[u8], key: &[u8; 32], nonce: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if nonce.len() != NONCE_LEN {
        return Err(CryptoError::InvalidNonceLength { expected: NONCE_LEN, actual: nonce.len() });
    }
    let mut buf = plaintext.to_vec();
    let mut cipher = Salsa20::new(key.into(), nonce.into());
    cipher.apply_keystream(&mut buf);

    let mut out = Vec::with_capacity(NONCE_LEN + buf.len());
    out.extend_from_slice(nonce);
    out.extend_from_slice(&buf);
    Ok(out)
}

/// Decrypt a buffer produced by [`encrypt`]. Salsa20 is its own inverse:
/// re-applying the same keystream recovers the plaintext.
pub fn decrypt(framed: &[u8], key: &[u8; 32]) -> Result<Vec<u8>, CryptoError> {
    if framed.len() < NONCE_LEN {
        return Err(CryptoError::CiphertextTooShort { minimum: NONCE_LEN, actual: framed.len() });
    }
    let (nonce, ciphertext) = framed.split_at(NONCE_LEN);
    let mut buf = ciphertext.to_vec();
    let mut cipher = Salsa20::new(key.into(), nonce.into());
    cipher.apply_keystream(&mut buf);
    Ok(buf)
}
