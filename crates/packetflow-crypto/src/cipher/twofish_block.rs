//! Twofish block cipher in ECB and CBC modes.
//!
//! Twofish's 256-bit key variant matches the connection's fixed 32-byte
//! key size. ECB leaks block-level equality patterns and should only be
//! selected for payloads where that is acceptable; CBC is the safer
//! default of the two.

use cipher::{
    BlockDecryptMut, BlockEncryptMut, KeyInit, KeyIvInit,
    block_padding::Pkcs7,
};
use twofish::Twofish;

use crate::error::CryptoError;

/// Twofish operates on 16-byte blocks; CBC's IV is the same size.
pub const BLOCK_LEN: usize = 16;

type TwofishEcbEnc = ecb::Encryptor<Twofish>;
type TwofishEcbDec = ecb::Decryptor<Twofish>;
type TwofishCbcEnc = cbc::Encryptor<Twofish>;
type TwofishCbcDec = cbc::Decryptor<Twofish>;

/// Encrypt `plaintext` under `key` in ECB mode with PKCS#7 padding.
pub fn encrypt_ecb(plaintext: &[u8], key: &[u8; 32]) -> Result<Vec<u8>, CryptoError> {
    let cipher = TwofishEcbEnc::new(key.into());
    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

/// Decrypt a buffer produced by [`encrypt_ecb`].
pub fn decrypt_ecb(ciphertext: &[u8], key: &[u8; 32]) -> Result<Vec<u8>, CryptoError> {
    let cipher = TwofishEcbDec::new(key.into());
    cipher.decrypt_padded_vec_mut::<Pkcs7>(ciphertext).map_err(|_| CryptoError::DecryptionFailed)
}

/// Encrypt `plaintext` under `key` in CBC mode, returning `iv ||
/// ciphertext` with PKCS#7 padding.
pub fn encrypt_cbc(plaintext: &[u8], key: &[u8; 32], iv: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if iv.len() != BLOCK_LEN {
        return Err(CryptoError::InvalidNonceLength { expected: BLOCK_LEN, actual: iv.len() });
    }
    let cipher = TwofishCbcEnc::new(key.into(), iv.into());
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut out = Vec::with_capacity(BLOCK_LEN + ciphertext.len());
    out.extend_from_slice(iv);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a buffer produced by [`encrypt_cbc`].
pub fn decrypt_cbc(framed: &[u8], key: &[u8; 32]) -> Result<Vec<u8>, CryptoError> {
    if framed.len() < BLOCK_LEN {
        return Err(CryptoError::CiphertextTooShort { minimum: BLOCK_LEN, actual: framed.len() });
    }
    let (iv, ciphertext) = framed.split_at(BLOCK_LEN);
    let cipher = TwofishCbcDec::new(key.into(), iv.into());
    cipher.decrypt_padded_vec_mut::<Pkcs7>(ciphertext).map_err(|_| CryptoError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> [u8; 32] {
        [9u8; 32]
    }

    #[test]
    fn ecb_roundtrip() {
        let encrypted = encrypt_ecb(b"twofish ecb payload", &key()).unwrap();
        let decrypted = decrypt_ecb(&encrypted, &key()).unwrap();
        assert_eq!(decrypted, b"twofish ecb payload");
    }

    #[test]
    fn cbc_roundtrip() {
        let iv = [5u8; BLOCK_LEN];
        let encrypted = encrypt_cbc(b"twofish cbc payload", &key(), &iv).unwrap();
        let decrypted = decrypt_cbc(&encrypted, &key()).unwrap();
        assert_eq!(decrypted, b"twofish cbc payload");
    }

    #[test]
    fn cbc_tampered_ciphertext_fails_or_garbles() {
        let iv = [1u8; BLOCK_LEN];
        let mut encrypted = encrypt_cbc(b"0123456789ABCDEF", &key(), &iv).unwrap();
        let last = encrypted.len() - 1;
        encrypted[last] ^= 0xFF;
        // CBC has no authentication tag; corruption either fails padding
        // validation or yields different plaintext, never the original.
        match decrypt_cbc(&encrypted, &key()) {
            Ok(plaintext) => assert_ne!(plaintext, b"0123456789ABCDEF"),
            Err(CryptoError::DecryptionFailed) => {},
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn cbc_rejects_short_iv() {
        let result = encrypt_cbc(b"x", &key(), &[0u8; 4]);
        assert_eq!(result, Err(CryptoError::InvalidNonceLength { expected: BLOCK_LEN, actual: 4 }));
    }
}
