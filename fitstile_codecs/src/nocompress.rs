use fitstile_core::codec::{Codec, SampleLayout};
use fitstile_core::{Algorithm, ByteOrder, Result};

/// Stores tiles verbatim as big-endian sample bytes.
///
/// Useful for checking the assembler independently of any coder, and for
/// data that does not compress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoCompressCodec;

impl Codec for NoCompressCodec {
    fn algorithm(&self) -> Algorithm {
        Algorithm::NoCompress
    }

    fn sample_layout(&self) -> SampleLayout {
        SampleLayout {
            width: None,
            order: ByteOrder::Big,
        }
    }

    fn encode(&self, samples: &[u8]) -> Result<Vec<u8>> {
        Ok(samples.to_vec())
    }

    fn decode(&self, compressed: &[u8]) -> Result<Vec<u8>> {
        Ok(compressed.to_vec())
    }
}
