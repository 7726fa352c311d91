//! XTEA block cipher, hand-chained into CBC mode.
//!
//! The `xtea` crate exposes only the raw 8-byte block primitive, not a
//! `cipher`-trait mode implementation, so CBC chaining is done here by
//! hand — XOR with the previous ciphertext block before encrypting, and
//! the inverse on decrypt, exactly as for any block cipher without a mode
//! wrapper available.
//!
//! XTEA's native key is 128 bits (four `u32` words); the connection's
//! 32-byte key is truncated to its first 16 bytes to fit.

#![allow(
    clippy::expect_used,
    reason = "every expect here converts a slice whose length was just checked or fixed by chunks_exact"
)]

use crate::error::CryptoError;

/// XTEA operates on 8-byte blocks; the IV is the same size.
pub const BLOCK_LEN: usize = 8;

fn xtea_key(key: &[u8; 32]) -> [u32; 4] {
    let mut words = [0u32; 4];
    for (i, word) in words.iter_mut().enumerate() {
        *word = u32::from_be_bytes(key[i * 4..i * 4 + 4].try_into().expect("4-byte slice"));
    }
    words
}

fn encrypt_block(block: &mut [u8; 8], key: &[u32; 4]) {
    let mut v = [
        u32::from_be_bytes(block[0..4].try_into().expect("4-byte slice")),
        u32::from_be_bytes(block[4..8].try_into().expect("4-byte slice")),
    ];
    xtea::encipher(&mut v, key);
    block[0..4].copy_from_slice(&v[0].to_be_bytes());
    block[4..8].copy_from_slice(&v[1].to_be_bytes());
}

fn decrypt_block(block: &mut [u8; 8], key: &[u32; 4]) {
    let mut v = [
        u32::from_be_bytes(block[0..4].try_into().expect("4-byte slice")),
        u32::from_be_bytes(block[4..8].try_into().expect("4-byte slice")),
    ];
    xtea::decipher(&mut v, key);
    block[0..4].copy_from_slice(&v[0].to_be_bytes());
    block[4..8].copy_from_slice(&v[1].to_be_bytes());
}

fn pkcs7_pad(data: &[u8]) -> Vec<u8> {
    let pad_len = BLOCK_LEN - (data.len() % BLOCK_LEN);
    let mut out = data.to_vec();
    out.extend(std::iter::repeat_n(pad_len as u8, pad_len));
    out
}

fn pkcs7_unpad(data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let pad_len = *data.last().ok_or(CryptoError::DecryptionFailed)? as usize;
    if pad_len == 0 || pad_len > BLOCK_LEN || pad_len > data.len() {
        return Err(CryptoError::DecryptionFailed);
    }
    if data[data.len() - pad_len..].iter().any(|&b| b as usize != pad_len) {
        return Err(CryptoError::DecryptionFailed);
    }
    Ok(data[..data.len() - pad_len].to_vec())
}

/// Encrypt `plaintext` under `key` in CBC mode, returning `iv ||
/// ciphertext`.
pub fn encrypt_cbc(plaintext: &[u8], key: &[u8; 32], iv: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if iv.len() != BLOCK_LEN {
        return Err(CryptoError::InvalidNonceLength { expected: BLOCK_LEN, actual: iv.len() });
    }
    let words = xtea_key(key);
    let padded = pkcs7_pad(plaintext);

    let mut out = Vec::with_capacity(BLOCK_LEN + padded.len());
    out.extend_from_slice(iv);
    let mut prev: [u8; BLOCK_LEN] = iv.try_into().expect("checked length above");

    for chunk in padded.chunks_exact(BLOCK_LEN) {
        let mut block: [u8; BLOCK_LEN] = chunk.try_into().expect("chunks_exact(BLOCK_LEN)");
        for (b, p) in block.iter_mut().zip(prev.iter()) {
            *b ^= p;
        }
        encrypt_block(&mut block, &words);
        out.extend_from_slice(&block);
        prev = block;
    }
    Ok(out)
}

/// Decrypt a buffer produced by [`encrypt_cbc`].
pub fn decrypt_cbc(framed: &[u8], key: &[u8; 32]) -> Result<Vec<u8>, CryptoError> {
    if framed.len() < BLOCK_LEN || (framed.len() - BLOCK_LEN) % BLOCK_LEN != 0 {
        return Err(CryptoError::CiphertextTooShort { minimum: BLOCK_LEN, actual: framed.len() });
    }
    let (iv, ciphertext) = framed.split_at(BLOCK_LEN);
    let words = xtea_key(key);
    let mut prev: [u8; BLOCK_LEN] = iv.try_into().expect("checked length above");

    let mut padded = Vec::with_capacity(ciphertext.len());
    for chunk in ciphertext.chunks_exact(BLOCK_LEN) {
        let cipher_block: [u8; BLOCK_LEN] = chunk.try_into().expect("chunks_exact(BLOCK_LEN)");
        let mut block = cipher_block;
        decrypt_block(&mut block, &words);
        for (b, p) in block.iter_mut().zip(prev.iter()) {
            *b ^= p;
        }
        padded.extend_from_slice(&block);
        prev = cipher_block;
    }
    pkcs7_unpad(&padded)
}
