use thiserror::Error;

use crate::format::Algorithm;

/// Result alias used throughout the tile compression core.
pub type Result<T> = std::result::Result<T, CodecError>;

/// Errors raised while configuring, encoding or decoding tiles.
///
/// Configuration errors (`UnsupportedAlgorithm`, `InvalidTileShape`,
/// `MissingSetting`, `InvalidSetting`, `InvalidQuantization`) are detected
/// before any sample is touched. `EncodingRange`, `Encode` and `Decode` abort
/// the single tile operation they occur in.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    /// Algorithm identifier not known to the registry
    #[error("unsupported compression algorithm '{0}'")]
    UnsupportedAlgorithm(String),

    /// Tile shape is zero, has the wrong rank, or does not fit the array
    #[error("invalid tile shape: {0}")]
    InvalidTileShape(String),

    /// A key the selected algorithm requires was not supplied
    #[error("{algorithm} requires setting '{key}'")]
    MissingSetting {
        algorithm: Algorithm,
        key: &'static str,
    },

    /// A key was supplied with a value outside its allowed domain
    #[error("invalid value for setting '{key}': {reason}")]
    InvalidSetting { key: &'static str, reason: String },

    /// Quantization was requested but no usable scale could be derived
    #[error("invalid quantization: {0}")]
    InvalidQuantization(String),

    /// A sample cannot be represented by the selected codec
    #[error("sample value {value} outside representable range {min}..={max}")]
    EncodingRange { value: i64, min: i64, max: i64 },

    /// The encoder could not produce a stream for otherwise valid input
    #[error("{algorithm} encode error: {reason}")]
    Encode { algorithm: Algorithm, reason: String },

    /// Compressed stream is corrupt or truncated
    #[error("{algorithm} decode error: {reason}")]
    Decode { algorithm: Algorithm, reason: String },

    /// A single tile failed during whole-array assembly
    #[error("tile {index}: {source}")]
    Tile {
        index: usize,
        #[source]
        source: Box<CodecError>,
    },
}

impl CodecError {
    pub fn decode(algorithm: Algorithm, reason: impl Into<String>) -> Self {
        CodecError::Decode {
            algorithm,
            reason: reason.into(),
        }
    }

    pub fn encode(algorithm: Algorithm, reason: impl Into<String>) -> Self {
        CodecError::Encode {
            algorithm,
            reason: reason.into(),
        }
    }

    pub fn invalid_setting(key: &'static str, reason: impl Into<String>) -> Self {
        CodecError::InvalidSetting {
            key,
            reason: reason.into(),
        }
    }

    /// Attach the index of the tile this error came from.
    pub fn in_tile(self, index: usize) -> Self {
        match self {
            // keep the innermost index if already wrapped
            err @ CodecError::Tile { .. } => err,
            err => CodecError::Tile {
                index,
                source: Box::new(err),
            },
        }
    }

    /// The underlying error with any tile wrapper removed.
    pub fn kind(&self) -> &CodecError {
        match self {
            CodecError::Tile { source, .. } => source.kind(),
            err => err,
        }
    }

    /// True for errors detected from configuration alone.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self.kind(),
            CodecError::UnsupportedAlgorithm(_)
                | CodecError::InvalidTileShape(_)
                | CodecError::MissingSetting { .. }
                | CodecError::InvalidSetting { .. }
                | CodecError::InvalidQuantization(_)
        )
    }
}
