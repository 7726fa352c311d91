//! Per-connection compression strategies, selected by `com_mode`.

use std::io::{Read, Write};

use flate2::{Compression, read::DeflateDecoder, read::GzDecoder, write::DeflateEncoder, write::GzEncoder};

use crate::error::CryptoError;

/// Quality level passed to the Brotli encoder. Chosen for a reasonable
/// speed/ratio tradeoff on small framed payloads, not maximum compression.
const BROTLI_QUALITY: u32 = 5;
const BROTLI_LG_WINDOW: u32 = 22;

/// Compressor a connection may be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMode {
    /// DEFLATE wrapped in the gzip container.
    GZip,
    /// Brotli.
    Brotli,
    /// Raw DEFLATE.
    Deflate,
}

/// Compress `data` using `mode`.
///
/// # Errors
///
/// Returns [`CryptoError::DecompressionFailed`]-shaped errors only on
/// decompress; compression itself cannot fail for these codecs short of an
/// allocation failure, which panics like the rest of the standard library.
#[allow(clippy::expect_used, reason = "writes to an in-memory Vec cannot fail short of allocation failure")]
pub fn compress(mode: CompressionMode, data: &[u8]) -> Vec<u8> {
    match mode {
        CompressionMode::GZip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data).expect("writing to an in-memory buffer cannot fail");
            encoder.finish().expect("finishing an in-memory gzip stream cannot fail")
        },
        CompressionMode::Deflate => {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data).expect("writing to an in-memory buffer cannot fail");
            encoder.finish().expect("finishing an in-memory deflate stream cannot fail")
        },
        CompressionMode::Brotli => {
            let mut out = Vec::new();
            {
                let mut writer =
                    brotli::CompressorWriter::new(&mut out, 4096, BROTLI_QUALITY, BROTLI_LG_WINDOW);
                writer.write_all(data).expect("writing to an in-memory buffer cannot fail");
            }
            out
        },
    }
}

/// Decompress `data` using `mode`.
///
/// # Errors
///
/// Returns [`CryptoError::DecompressionFailed`] if `data` is not valid
/// output of the corresponding compressor (truncated or corrupt stream).
pub fn decompress(mode: CompressionMode, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut out = Vec::new();
    let result = match mode {
        CompressionMode::GZip => GzDecoder::new(data).read_to_end(&mut out),
        CompressionMode::Deflate => DeflateDecoder::new(data).read_to_end(&mut out),
        CompressionMode::Brotli => brotli::Decompressor::new(data, 4096).read_to_end(&mut out),
    };
    result
        .map(|_| out)
        .map_err(|e| CryptoError::DecompressionFailed { reason: e.to_string() })
}
