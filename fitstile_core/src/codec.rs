use crate::dtype::ByteOrder;
use crate::error::{CodecError, Result};
use crate::format::Algorithm;
use crate::settings::CodecSettings;

/// How a codec expects uncompressed samples to be laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleLayout {
    /// Sample width in bytes; `None` accepts the caller's native width.
    pub width: Option<usize>,
    /// Byte order of every sample on both sides of the codec.
    pub order: ByteOrder,
}

/// Core compression abstraction.
///
/// Each `Codec` implementation:
/// - Is bound to one algorithm and one validated parameter set.
/// - Encodes and decodes a single tile independently. No state survives
///   between calls, so tiles may be processed on any thread in any order.
/// - Declares the byte layout of the samples it consumes and produces; the
///   caller converts to and from the array's dtype and byte order.
pub trait Codec: Send + Sync {
    fn algorithm(&self) -> Algorithm;

    /// Container identifier, for display.
    fn name(&self) -> &'static str {
        self.algorithm().name()
    }

    fn sample_layout(&self) -> SampleLayout;

    /// Compress the sample bytes of one flattened tile.
    fn encode(&self, samples: &[u8]) -> Result<Vec<u8>>;

    /// Reconstruct the sample bytes of one tile.
    ///
    /// Corrupt or truncated input is a `Decode` error, never partial output.
    fn decode(&self, compressed: &[u8]) -> Result<Vec<u8>>;

    /// Like [`decode`](Codec::decode), but fails instead of producing more
    /// than `max_len` bytes. Codecs whose output size is not fixed by their
    /// settings override this to stop early.
    fn decode_bounded(&self, compressed: &[u8], max_len: usize) -> Result<Vec<u8>> {
        let out = self.decode(compressed)?;
        if out.len() > max_len {
            return Err(CodecError::decode(
                self.algorithm(),
                format!("decoded {} bytes, at most {max_len} expected", out.len()),
            ));
        }
        Ok(out)
    }
}

/// Builds codecs for validated settings.
///
/// The tile assembler is generic over this so that the codec
/// implementations can live in their own crate.
pub trait CodecProvider: Send + Sync {
    fn codec(&self, settings: &CodecSettings) -> Result<Box<dyn Codec>>;
}
