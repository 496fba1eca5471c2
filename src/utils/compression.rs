//! Frame payload compression.
//!
//! Every frame body is compressed before it hits the wire. Both peers must be
//! configured with the same [`CompressionKind`]; the frame carries no marker.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    Lz4,
    #[default]
    Zstd,
}

impl CompressionKind {
    pub fn name(self) -> &'static str {
        match self {
            CompressionKind::Lz4 => "lz4",
            CompressionKind::Zstd => "zstd",
        }
    }
}

/// Compresses data using the specified compression algorithm.
///
/// `level` only applies to zstd.
///
/// # Errors
/// Returns `ProtocolError::CompressionFailure` if compression fails
pub fn compress(data: &[u8], kind: CompressionKind, level: i32) -> Result<Vec<u8>> {
    match kind {
        CompressionKind::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        CompressionKind::Zstd => {
            zstd::bulk::compress(data, level).map_err(|_| ProtocolError::CompressionFailure)
        }
    }
}

/// Decompresses data that was compressed with the specified algorithm.
///
/// Output larger than `limit` is rejected before it is fully materialised, so a
/// hostile peer cannot make us allocate more than one packet's worth.
///
/// # Errors
/// Returns `ProtocolError::DecompressionFailure` if the input is malformed and
/// `ProtocolError::OversizedPacket` if the output would exceed `limit`.
pub fn decompress(data: &[u8], kind: CompressionKind, limit: usize) -> Result<Vec<u8>> {
    match kind {
        CompressionKind::Lz4 => {
            // lz4_flex prepends the uncompressed size as 4 little-endian bytes
            if data.len() < 4 {
                return Err(ProtocolError::DecompressionFailure);
            }

            let claimed_size = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
            if claimed_size > limit {
                return Err(ProtocolError::OversizedPacket(claimed_size));
            }

            lz4_flex::decompress_size_prepended(data)
                .map_err(|_| ProtocolError::DecompressionFailure)
        }
        CompressionKind::Zstd => {
            use std::io::Read;

            let decoder = zstd::stream::Decoder::new(data)
                .map_err(|_| ProtocolError::DecompressionFailure)?;

            // Read at most one byte past the limit to tell "exactly full" from "too big"
            let mut out = Vec::new();
            decoder
                .take(limit as u64 + 1)
                .read_to_end(&mut out)
                .map_err(|_| ProtocolError::DecompressionFailure)?;

            if out.len() > limit {
                return Err(ProtocolError::OversizedPacket(out.len()));
            }
            Ok(out)
        }
    }
}
