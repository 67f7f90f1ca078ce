//! Value compression codec.
//!
//! Two algorithms plus "none". Compressed blobs carry a 4-byte magic so
//! that reads are self-describing and uncompressed bytes written by older
//! versions (or while compression was disabled) pass through verbatim.
//!
//! Compression is attempted only for values of at least
//! [`COMPRESSION_THRESHOLD`] bytes, and kept only when the compressed form
//! is strictly smaller than the input.

use quartz_core::error::{Error, Result};

/// Magic prefix of an LZ4 blob.
pub const LZ4_MAGIC: [u8; 4] = [0x4C, 0x5A, 0x34, 0x01];
/// Magic prefix of a ZSTD blob.
pub const ZSTD_MAGIC: [u8; 4] = [0x5A, 0x53, 0x54, 0x44];

/// Values below this size are stored as-is.
pub const COMPRESSION_THRESHOLD: usize = 64;

const ZSTD_LEVEL: i32 = 3;

/// Which algorithm, if any, the engine applies on write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Compression {
    /// Store bytes verbatim.
    #[default]
    None,
    Lz4,
    Zstd,
}

impl Compression {
    pub fn parse(s: &str) -> Result<Compression> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Compression::None),
            "lz4" => Ok(Compression::Lz4),
            "zstd" => Ok(Compression::Zstd),
            other => Err(Error::invalid_argument(format!(
                "unknown compression algorithm '{}'",
                other
            ))),
        }
    }
}

/// Compress a value for storage.
///
/// Returns the input unchanged when the algorithm is `None`, the value is
/// under the threshold, or compression does not strictly shrink it.
pub fn compress(algo: Compression, data: &[u8]) -> Result<Vec<u8>> {
    if algo == Compression::None || data.len() < COMPRESSION_THRESHOLD {
        return Ok(data.to_vec());
    }
    let (magic, body) = match algo {
        Compression::Lz4 => (
            LZ4_MAGIC,
            lz4::block::compress(data, None, true)
                .map_err(|e| Error::io_with_source("lz4 compression failed", e))?,
        ),
        Compression::Zstd => (
            ZSTD_MAGIC,
            zstd::stream::encode_all(data, ZSTD_LEVEL)
                .map_err(|e| Error::io_with_source("zstd compression failed", e))?,
        ),
        Compression::None => unreachable!(),
    };
    if magic.len() + body.len() >= data.len() {
        return Ok(data.to_vec());
    }
    let mut out = Vec::with_capacity(magic.len() + body.len());
    out.extend_from_slice(&magic);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Probe the magic prefix and decompress if one is present.
///
/// Unprefixed data is returned verbatim, which is what keeps the codec
/// backward compatible with entries written before it was enabled.
pub fn maybe_decompress(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() >= 4 && data[..4] == LZ4_MAGIC {
        lz4::block::decompress(&data[4..], None)
            .map_err(|e| Error::io_with_source("lz4 decompression failed", e))
    } else if data.len() >= 4 && data[..4] == ZSTD_MAGIC {
        zstd::stream::decode_all(&data[4..])
            .map_err(|e| Error::io_with_source("zstd decompression failed", e))
    } else {
        Ok(data.to_vec())
    }
}
