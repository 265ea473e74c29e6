//! Compression algorithms and the self-describing payload frame.
//!
//! # Frame Layout
//! ```text
//! [tag: u8][original_len: u64 LE][chunk_count: u32 LE]
//!     then chunk_count × [chunk_len: u32 LE][chunk bytes]
//! ```
//! The tag names the algorithm so decompression never depends on channel
//! configuration. Identity frames carry the original bytes as one chunk.

use std::fmt;
use std::io::{Read, Write};

use flate2::{read::GzDecoder, write::GzEncoder, Compression as GzipLevel};
use lz4_flex::block::{compress_prepend_size, decompress_size_prepended};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const HEADER_LEN: usize = 1 + 8 + 4;

/// Supported algorithms, ordered from fastest to highest ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    /// Stored as-is (compression skipped or failed).
    Identity,
    /// Fast, low ratio.
    Lz4,
    /// Balanced.
    Gzip,
    /// High ratio.
    Zstd,
}

impl CompressionAlgorithm {
    /// Candidates considered by adaptive selection.
    pub const CANDIDATES: [CompressionAlgorithm; 3] = [Self::Lz4, Self::Gzip, Self::Zstd];

    pub fn tag(self) -> u8 {
        match self {
            Self::Identity => 0,
            Self::Lz4 => 1,
            Self::Gzip => 2,
            Self::Zstd => 3,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Identity),
            1 => Some(Self::Lz4),
            2 => Some(Self::Gzip),
            3 => Some(Self::Zstd),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Lz4 => "lz4",
            Self::Gzip => "gzip",
            Self::Zstd => "zstd",
        }
    }

    /// Highest meaningful level. LZ4 accepts a level but lz4_flex has a single mode.
    pub fn max_level(self) -> u32 {
        match self {
            Self::Identity => 0,
            Self::Lz4 => 12,
            Self::Gzip => 9,
            Self::Zstd => 22,
        }
    }

    /// Compress one block.
    pub fn compress_block(self, data: &[u8], level: u32) -> Result<Vec<u8>, CompressionError> {
        let level = level.min(self.max_level());
        match self {
            Self::Identity => Ok(data.to_vec()),
            Self::Lz4 => Ok(compress_prepend_size(data)),
            Self::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), GzipLevel::new(level));
                encoder
                    .write_all(data)
                    .map_err(|e| CompressionError::Failed(self, e.to_string()))?;
                encoder
                    .finish()
                    .map_err(|e| CompressionError::Failed(self, e.to_string()))
            }
            Self::Zstd => zstd::bulk::compress(data, level as i32)
                .map_err(|e| CompressionError::Failed(self, e.to_string())),
        }
    }

    /// Decompress one block produced by [`compress_block`](Self::compress_block).
    pub fn decompress_block(self, data: &[u8]) -> Result<Vec<u8>, DecompressError> {
        match self {
            Self::Identity => Ok(data.to_vec()),
            Self::Lz4 => decompress_size_prepended(data)
                .map_err(|e| DecompressError::Corrupt(self, e.to_string())),
            Self::Gzip => {
                let mut decoder = GzDecoder::new(data);
                let mut out = Vec::new();
                decoder
                    .read_to_end(&mut out)
                    .map_err(|e| DecompressError::Corrupt(self, e.to_string()))?;
                Ok(out)
            }
            Self::Zstd => zstd::stream::decode_all(data)
                .map_err(|e| DecompressError::Corrupt(self, e.to_string())),
        }
    }
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while compressing. Never surfaced past the engine.
#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("{0} compression failed: {1}")]
    Failed(CompressionAlgorithm, String),

    #[error("chunk worker panicked")]
    WorkerPanicked,

    #[error("chunk of {0} bytes exceeds the frame limit")]
    ChunkTooLarge(usize),
}

/// Errors raised while decoding a payload frame.
#[derive(Debug, Error)]
pub enum DecompressError {
    #[error("frame truncated")]
    Truncated,

    #[error("unknown algorithm tag {0}")]
    UnknownTag(u8),

    #[error("{0} payload corrupt: {1}")]
    Corrupt(CompressionAlgorithm, String),

    #[error("length mismatch: header says {expected} bytes, decoded {actual}")]
    LengthMismatch { expected: u64, actual: u64 },
}

/// Build a frame from already-compressed chunks, in order.
pub fn encode_frame(
    algorithm: CompressionAlgorithm,
    original_len: usize,
    chunks: &[Vec<u8>],
) -> Result<Vec<u8>, CompressionError> {
    let body: usize = chunks.iter().map(|c| c.len() + 4).sum();
    let mut frame = Vec::with_capacity(HEADER_LEN + body);
    frame.push(algorithm.tag());
    frame.extend_from_slice(&(original_len as u64).to_le_bytes());
    frame.extend_from_slice(&(chunks.len() as u32).to_le_bytes());
    for chunk in chunks {
        let len = u32::try_from(chunk.len()).map_err(|_| CompressionError::ChunkTooLarge(chunk.len()))?;
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(chunk);
    }
    Ok(frame)
}

/// Identity frame wrapping the original bytes.
pub fn identity_frame(data: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + 4 + data.len());
    frame.push(CompressionAlgorithm::Identity.tag());
    frame.extend_from_slice(&(data.len() as u64).to_le_bytes());
    if data.is_empty() {
        frame.extend_from_slice(&0u32.to_le_bytes());
        return frame;
    }
    // Oversized identity payloads are split so each chunk length fits in u32.
    let chunks: Vec<&[u8]> = data.chunks(u32::MAX as usize).collect();
    frame.extend_from_slice(&(chunks.len() as u32).to_le_bytes());
    for chunk in chunks {
        frame.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
        frame.extend_from_slice(chunk);
    }
    frame
}

/// Read the algorithm tag without decoding.
pub fn frame_algorithm(frame: &[u8]) -> Result<CompressionAlgorithm, DecompressError> {
    let tag = *frame.first().ok_or(DecompressError::Truncated)?;
    CompressionAlgorithm::from_tag(tag).ok_or(DecompressError::UnknownTag(tag))
}

/// Decode a frame back into the original bytes.
pub fn decode_frame(frame: &[u8]) -> Result<Vec<u8>, DecompressError> {
    let algorithm = frame_algorithm(frame)?;
    if frame.len() < HEADER_LEN {
        return Err(DecompressError::Truncated);
    }
    let expected = u64::from_le_bytes(read_array(&frame[1..9])?);
    let count = u32::from_le_bytes(read_array(&frame[9..13])?);

    let mut out = Vec::with_capacity(usize::try_from(expected).unwrap_or(0));
    let mut cursor = HEADER_LEN;
    for _ in 0..count {
        let len_end = cursor.checked_add(4).ok_or(DecompressError::Truncated)?;
        let len = u32::from_le_bytes(read_array(frame.get(cursor..len_end).ok_or(DecompressError::Truncated)?)?) as usize;
        let chunk_end = len_end.checked_add(len).ok_or(DecompressError::Truncated)?;
        let chunk = frame.get(len_end..chunk_end).ok_or(DecompressError::Truncated)?;
        out.extend_from_slice(&algorithm.decompress_block(chunk)?);
        cursor = chunk_end;
    }

    if out.len() as u64 != expected {
        return Err(DecompressError::LengthMismatch {
            expected,
            actual: out.len() as u64,
        });
    }
    Ok(out)
}

fn read_array<const N: usize>(bytes: &[u8]) -> Result<[u8; N], DecompressError> {
    bytes.try_into().map_err(|_| DecompressError::Truncated)
}
