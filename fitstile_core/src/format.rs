use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CodecError;

// ── Algorithm identifiers ──────────────────────────────────────────────────

/// Compression algorithm of a tiled image, as named by the container's
/// `ZCMPTYPE` keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Algorithm {
    /// Tiles stored verbatim as big-endian samples.
    NoCompress,
    /// Deflate over big-endian sample bytes.
    Gzip1,
    /// Deflate over byte-plane-shuffled big-endian sample bytes.
    Gzip2,
    /// Adaptive Golomb-Rice coding of first differences.
    Rice1,
    /// IRAF pixel-list run-length coding.
    Plio1,
    /// H-transform wavelet coding of 2-D tiles.
    Hcompress1,
}

impl Algorithm {
    pub const ALL: [Algorithm; 6] = [
        Algorithm::NoCompress,
        Algorithm::Gzip1,
        Algorithm::Gzip2,
        Algorithm::Rice1,
        Algorithm::Plio1,
        Algorithm::Hcompress1,
    ];

    /// Container identifier, e.g. `"RICE_1"`.
    pub fn name(self) -> &'static str {
        match self {
            Algorithm::NoCompress => "NOCOMPRESS",
            Algorithm::Gzip1 => "GZIP_1",
            Algorithm::Gzip2 => "GZIP_2",
            Algorithm::Rice1 => "RICE_1",
            Algorithm::Plio1 => "PLIO_1",
            Algorithm::Hcompress1 => "HCOMPRESS_1",
        }
    }

    /// Whether a decoded tile is bit-identical to the encoded one.
    ///
    /// HCOMPRESS is lossless only with `scale <= 1`, so it reports `false`.
    pub fn is_lossless(self) -> bool {
        !matches!(self, Algorithm::Hcompress1)
    }

    /// Whether the codec only accepts integer samples.
    pub fn integer_only(self) -> bool {
        matches!(
            self,
            Algorithm::Rice1 | Algorithm::Plio1 | Algorithm::Hcompress1
        )
    }

    pub fn is_byte_stream(self) -> bool {
        matches!(
            self,
            Algorithm::NoCompress | Algorithm::Gzip1 | Algorithm::Gzip2
        )
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NOCOMPRESS" => Ok(Algorithm::NoCompress),
            "GZIP_1" => Ok(Algorithm::Gzip1),
            "GZIP_2" => Ok(Algorithm::Gzip2),
            "RICE_1" | "RICE_ONE" => Ok(Algorithm::Rice1),
            "PLIO_1" => Ok(Algorithm::Plio1),
            "HCOMPRESS_1" => Ok(Algorithm::Hcompress1),
            _ => Err(CodecError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

impl TryFrom<String> for Algorithm {
    type Error = CodecError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Algorithm> for String {
    fn from(value: Algorithm) -> Self {
        value.name().to_string()
    }
}

// ── RICE ───────────────────────────────────────────────────────────────────

/// Default Rice block size (`ZVAL1`).
pub const DEFAULT_RICE_BLOCKSIZE: usize = 32;

/// Default Rice sample width (`ZVAL2`).
pub const DEFAULT_RICE_BYTEPIX: usize = 4;

// ── PLIO ───────────────────────────────────────────────────────────────────

/// Largest sample value a PLIO line list can carry.
pub const PLIO_MAX_VALUE: i64 = (1 << 24) - 1;

// ── HCOMPRESS ──────────────────────────────────────────────────────────────

/// Two-byte magic opening every HCOMPRESS stream.
pub const HCOMPRESS_MAGIC: [u8; 2] = [0xDD, 0x99];

// ── Quantization ───────────────────────────────────────────────────────────

/// Quantized integer written for NaN samples (`ZBLANK`).
pub const NULL_VALUE: i32 = -2147483647;

/// Integers at the bottom of the `i32` range kept free for flag values.
pub const N_RESERVED_VALUES: i64 = 10;

/// Length of the uniform random sequence used for subtractive dithering.
pub const N_RANDOM: usize = 10_000;
