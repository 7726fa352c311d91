//! Per-connection encryption strategies, selected by [`EncMode`].

mod chacha;
mod salsa20_stream;
mod twofish_block;
mod xtea_block;

use crate::error::CryptoError;

/// Authenticated-encryption, streaming, or block cipher mode a connection
/// may be configured with. All modes use the same 32-byte key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncMode {
    /// `XChaCha20-Poly1305` authenticated encryption.
    ChaCha20Poly1305,
    /// Salsa20 streaming cipher (no authentication tag).
    Salsa20,
    /// Twofish in ECB mode.
    TwofishEcb,
    /// Twofish in CBC mode.
    TwofishCbc,
    /// XTEA, hand-chained into CBC mode.
    Xtea,
}

impl EncMode {
    /// Whether this mode appends an authentication tag that detects
    /// ciphertext tampering. Only [`Self::ChaCha20Poly1305`] does.
    #[must_use]
    pub fn is_authenticated(self) -> bool {
        matches!(self, Self::ChaCha20Poly1305)
    }

    /// Bytes of random material (nonce/IV) the caller must supply to
    /// [`encrypt`] for this mode.
    #[must_use]
    pub fn random_len(self) -> usize {
        match self {
            Self::ChaCha20Poly1305 => chacha::NONCE_LEN,
            Self::Salsa20 => salsa20_stream::NONCE_LEN,
            Self::TwofishEcb => 0,
            Self::TwofishCbc => twofish_block::BLOCK_LEN,
            Self::Xtea => xtea_block::BLOCK_LEN,
        }
    }
}

/// Encrypt `plaintext` under `key` using `mode`. `random` must be exactly
/// `mode.random_len()` bytes (empty for ECB).
pub fn encrypt(
    mode: EncMode,
    plaintext: &[u8],
    key: &[u8; 32],
    random: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    match mode {
        EncMode::ChaCha20Poly1305 => chacha::encrypt(plaintext, key, random),
        EncMode::Salsa20 => salsa20_stream::encrypt(plaintext, key, random),
        EncMode::TwofishEcb => twofish_block::encrypt_ecb(plaintext, key),
        EncMode::TwofishCbc => twofish_block::encrypt_cbc(plaintext, key, random),
        EncMode::Xtea => xtea_block::encrypt_cbc(plaintext, key, random),
    }
}

/// Decrypt `ciphertext` (as produced by [`encrypt`]) under `key` using
/// `mode`. Never returns partial plaintext on authentication failure.
pub fn decrypt(mode: EncMode, ciphertext: &[u8], key: &[u8; 32]) -> Result<Vec<u8>, CryptoError> {
    match mode {
        EncMode::ChaCha20Poly1305 => chacha::decrypt(ciphertext, key),
        EncMode::Salsa20 => salsa20_stream::decrypt(ciphertext, key),
        EncMode::TwofishEcb => twofish_block::decrypt_ecb(ciphertext, key),
        EncMode::TwofishCbc => twofish_block::decrypt_cbc(ciphertext, key),
        EncMode::Xtea => xtea_block::decrypt_cbc(ciphertext, key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_mode_round_trips() {
        let key = [11u8; 32];
        for mode in [
            EncMode::ChaCha20Poly1305,
            EncMode::Salsa20,
            EncMode::TwofishEcb,
            EncMode::TwofishCbc,
            EncMode::Xtea,
        ] {
            let random = vec![0x5Au8; mode.random_len()];
            let ciphertext = encrypt(mode, b"round trip me", &key, &random).unwrap();
            let plaintext = decrypt(mode, &ciphertext, &key).unwrap();
            assert_eq!(plaintext, b"round trip me", "mode {mode:?} failed round trip");
        }
    }

    #[test]
    fn only_chacha_is_authenticated() {
        assert!(EncMode::ChaCha20Poly1305.is_authenticated());
        assert!(!EncMode::Salsa20.is_authenticated());
        assert!(!EncMode::TwofishEcb.is_authenticated());
        assert!(!EncMode::TwofishCbc.is_authenticated());
        assert!(!EncMode::Xtea.is_authenticated());
    }
}
