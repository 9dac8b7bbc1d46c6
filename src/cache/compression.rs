//! Payload Compression
//!
//! One algorithm enum serves both persisted tiers:
//!
//! - L2 values are `[tag][block]` envelopes built by [`Envelope`]; the block
//!   is lz4 or zstd compressed, or raw when compression does not pay off.
//! - L3 files hand the algorithm to the Arrow IPC writer, which compresses
//!   each buffer itself (see [`CompressionAlgorithm::ipc_codec`]).
//!
//! ```
//! use tiercache::cache::compression::{CompressionAlgorithm, Envelope};
//!
//! let envelope = Envelope::new(CompressionAlgorithm::Zstd).with_min_size(0);
//! let data = b"W,W,L,W,W,L,W,W,L,W,W,L,W,W,L,W,W,L".repeat(8);
//!
//! let sealed = envelope.seal(&data);
//! assert_eq!(Envelope::algorithm_of(&sealed), Some(CompressionAlgorithm::Zstd));
//! assert_eq!(envelope.open(&sealed).unwrap().as_ref(), data.as_slice());
//! ```

use std::fmt;
use std::io::Read;
use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use super::L2_MIN_COMPRESS_SIZE;
use crate::error::{Error, Result};

/// Block compression for cached payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompressionAlgorithm {
    None,
    /// Fast; the default for both tiers
    #[default]
    Lz4,
    /// Smaller files at a higher CPU cost
    Zstd,
}

impl CompressionAlgorithm {
    pub const ALL: [CompressionAlgorithm; 3] = [
        CompressionAlgorithm::None,
        CompressionAlgorithm::Lz4,
        CompressionAlgorithm::Zstd,
    ];

    /// Name used in config files and `config.json`
    pub fn name(&self) -> &'static str {
        match self {
            CompressionAlgorithm::None => "none",
            CompressionAlgorithm::Lz4 => "lz4",
            CompressionAlgorithm::Zstd => "zstd",
        }
    }

    fn tag(&self) -> u8 {
        match self {
            CompressionAlgorithm::None => 0,
            CompressionAlgorithm::Lz4 => 1,
            CompressionAlgorithm::Zstd => 2,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.tag() == tag)
    }

    /// Arrow IPC buffer codec for L3 files
    pub fn ipc_codec(&self) -> Option<arrow_ipc::CompressionType> {
        match self {
            CompressionAlgorithm::None => None,
            CompressionAlgorithm::Lz4 => Some(arrow_ipc::CompressionType::LZ4_FRAME),
            CompressionAlgorithm::Zstd => Some(arrow_ipc::CompressionType::ZSTD),
        }
    }

    /// Compress one block; `level` only affects zstd
    pub fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>> {
        let result = match self {
            CompressionAlgorithm::None => return Ok(data.to_vec()),
            // Size-prefixed so decompression needs no out-of-band length
            CompressionAlgorithm::Lz4 => lz4::block::compress(data, None, true),
            CompressionAlgorithm::Zstd => zstd::bulk::compress(data, level),
        };
        result.map_err(|e| Error::CompressionFailed {
            algorithm: self.name().into(),
            reason: e.to_string(),
        })
    }

    /// Decompress one block, refusing output larger than `limit` bytes
    ///
    /// The lz4 size prefix is checked before anything is allocated.
    pub fn decompress_bounded(&self, block: &[u8], limit: usize) -> Result<Vec<u8>> {
        let too_large = |declared: usize| Error::DecompressionFailed {
            algorithm: self.name().into(),
            reason: format!("decoded size {declared} exceeds limit {limit}"),
        };
        match self {
            CompressionAlgorithm::None if block.len() > limit => Err(too_large(block.len())),
            CompressionAlgorithm::None => Ok(block.to_vec()),
            CompressionAlgorithm::Lz4 => {
                let declared = block
                    .get(..4)
                    .map(|p| u32::from_le_bytes([p[0], p[1], p[2], p[3]]) as usize)
                    .ok_or_else(|| Error::DecompressionFailed {
                        algorithm: self.name().into(),
                        reason: "missing size prefix".into(),
                    })?;
                if declared > limit {
                    return Err(too_large(declared));
                }
                self.decompress(block)
            }
            CompressionAlgorithm::Zstd => {
                let failed = |e: std::io::Error| Error::DecompressionFailed {
                    algorithm: self.name().into(),
                    reason: e.to_string(),
                };
                let mut out = Vec::new();
                zstd::stream::read::Decoder::new(block)
                    .map_err(failed)?
                    .take(limit as u64 + 1)
                    .read_to_end(&mut out)
                    .map_err(failed)?;
                if out.len() > limit {
                    return Err(too_large(out.len()));
                }
                Ok(out)
            }
        }
    }

    pub fn decompress(&self, block: &[u8]) -> Result<Vec<u8>> {
        let result = match self {
            CompressionAlgorithm::None => return Ok(block.to_vec()),
            CompressionAlgorithm::Lz4 => lz4::block::decompress(block, None),
            CompressionAlgorithm::Zstd => zstd::stream::decode_all(block),
        };
        result.map_err(|e| Error::DecompressionFailed {
            algorithm: self.name().into(),
            reason: e.to_string(),
        })
    }
}

impl FromStr for CompressionAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "uncompressed" => Ok(CompressionAlgorithm::None),
            "lz4" => Ok(CompressionAlgorithm::Lz4),
            "zstd" => Ok(CompressionAlgorithm::Zstd),
            other => Err(Error::Config(format!(
                "unknown compression '{other}', expected one of: none, lz4, zstd"
            ))),
        }
    }
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// L2 Envelope
// =============================================================================

/// Largest payload an envelope will decode
pub const MAX_ENVELOPE_DECODED: usize = 256 * 1024 * 1024;

/// Tagged compression envelope for remote cache values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    pub algorithm: CompressionAlgorithm,
    /// Payloads below this many bytes are stored raw
    pub min_size: usize,
    pub level: i32,
    /// Decoded payloads above this many bytes are rejected
    pub max_decoded: usize,
}

impl Default for Envelope {
    fn default() -> Self {
        Self::new(CompressionAlgorithm::Lz4)
    }
}

impl Envelope {
    pub fn new(algorithm: CompressionAlgorithm) -> Self {
        Self {
            algorithm,
            min_size: L2_MIN_COMPRESS_SIZE,
            level: 3,
            max_decoded: MAX_ENVELOPE_DECODED,
        }
    }

    pub fn with_min_size(mut self, min_size: usize) -> Self {
        self.min_size = min_size;
        self
    }

    pub fn with_level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    pub fn with_max_decoded(mut self, max_decoded: usize) -> Self {
        self.max_decoded = max_decoded;
        self
    }

    /// Wrap `data`, falling back to raw when compression fails or does not shrink it
    pub fn seal(&self, data: &[u8]) -> Bytes {
        let algorithm = if data.len() < self.min_size {
            CompressionAlgorithm::None
        } else {
            self.algorithm
        };

        let block = match algorithm.compress(data, self.level) {
            Ok(block) if algorithm == CompressionAlgorithm::None || block.len() < data.len() => {
                Some((algorithm, block))
            }
            Ok(_) => None,
            Err(e) => {
                debug!(error = %e, "Envelope compression failed, storing raw");
                None
            }
        };

        let mut out = BytesMut::with_capacity(data.len() + 1);
        match block {
            Some((algorithm, block)) => {
                out.put_u8(algorithm.tag());
                out.extend_from_slice(&block);
            }
            None => {
                out.put_u8(CompressionAlgorithm::None.tag());
                out.extend_from_slice(data);
            }
        }
        out.freeze()
    }

    /// Unwrap an envelope from [`Envelope::seal`]; any algorithm is accepted
    pub fn open(&self, raw: &[u8]) -> Result<Bytes> {
        let (tag, block) = raw
            .split_first()
            .ok_or_else(|| Error::Serialization("empty payload envelope".into()))?;
        let algorithm = CompressionAlgorithm::from_tag(*tag)
            .ok_or_else(|| Error::Serialization(format!("unknown envelope tag {tag}")))?;
        Ok(Bytes::from(algorithm.decompress_bounded(block, self.max_decoded)?))
    }

    /// Algorithm recorded in an envelope header
    pub fn algorithm_of(raw: &[u8]) -> Option<CompressionAlgorithm> {
        raw.first().copied().and_then(CompressionAlgorithm::from_tag)
    }
}
