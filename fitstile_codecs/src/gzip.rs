use std::io::{Read, Write};

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use fitstile_core::codec::{Codec, SampleLayout};
use fitstile_core::{Algorithm, ByteOrder, CodecError, Result};

/// Deflate level used for every tile.
const GZIP_LEVEL: u32 = 1;

/// Gzip-wrapped deflate over big-endian sample bytes.
///
/// `GZIP_1` compresses the bytes as they are. `GZIP_2` first transposes
/// them into byte planes (all most significant bytes, then the next, ...),
/// which groups the slowly varying high bytes of image data together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GzipCodec {
    /// Sample width for byte-plane shuffling; `None` for `GZIP_1`.
    shuffle: Option<usize>,
}

impl GzipCodec {
    pub fn gzip1() -> Self {
        Self { shuffle: None }
    }

    pub fn gzip2(itemsize: usize) -> Result<Self> {
        if !matches!(itemsize, 1 | 2 | 4 | 8) {
            return Err(CodecError::invalid_setting(
                "itemsize",
                format!("{itemsize} is not one of 1, 2, 4, 8"),
            ));
        }
        Ok(Self {
            shuffle: Some(itemsize),
        })
    }
}

/// Sample-major to plane-major.
fn shuffle_bytes(bytes: &[u8], itemsize: usize) -> Vec<u8> {
    let n = bytes.len() / itemsize;
    let mut out = vec![0u8; bytes.len()];
    for (i, sample) in bytes.chunks_exact(itemsize).enumerate() {
        for (plane, &b) in sample.iter().enumerate() {
            out[plane * n + i] = b;
        }
    }
    out
}

/// Plane-major to sample-major.
fn unshuffle_bytes(bytes: &[u8], itemsize: usize) -> Vec<u8> {
    let n = bytes.len() / itemsize;
    let mut out = vec![0u8; bytes.len()];
    for (plane, column) in bytes.chunks_exact(n.max(1)).enumerate().take(itemsize) {
        for (i, &b) in column.iter().enumerate() {
            out[i * itemsize + plane] = b;
        }
    }
    out
}

impl Codec for GzipCodec {
    fn algorithm(&self) -> Algorithm {
        match self.shuffle {
            None => Algorithm::Gzip1,
            Some(_) => Algorithm::Gzip2,
        }
    }

    fn sample_layout(&self) -> SampleLayout {
        SampleLayout {
            width: self.shuffle,
            order: ByteOrder::Big,
        }
    }

    fn encode(&self, samples: &[u8]) -> Result<Vec<u8>> {
        let alg = self.algorithm();
        let shuffled;
        let input = match self.shuffle {
            Some(itemsize) if itemsize > 1 => {
                if samples.len() % itemsize != 0 {
                    return Err(CodecError::encode(
                        alg,
                        format!("{} bytes are not whole {itemsize}-byte samples", samples.len()),
                    ));
                }
                shuffled = shuffle_bytes(samples, itemsize);
                &shuffled[..]
            }
            _ => samples,
        };

        let mut encoder = GzEncoder::new(
            Vec::with_capacity(input.len() / 2 + 32),
            Compression::new(GZIP_LEVEL),
        );
        encoder
            .write_all(input)
            .map_err(|e| CodecError::encode(alg, e.to_string()))?;
        encoder
            .finish()
            .map_err(|e| CodecError::encode(alg, e.to_string()))
    }

    fn decode(&self, compressed: &[u8]) -> Result<Vec<u8>> {
        self.inflate(compressed, None)
    }

    fn decode_bounded(&self, compressed: &[u8], max_len: usize) -> Result<Vec<u8>> {
        self.inflate(compressed, Some(max_len))
    }
}

impl GzipCodec {
    /// Inflate every gzip member, stopping once more than `limit` bytes appear.
    fn inflate(&self, compressed: &[u8], limit: Option<usize>) -> Result<Vec<u8>> {
        let alg = self.algorithm();
        let cap = limit.map_or(u64::MAX, |n| n as u64 + 1);
        let mut raw = Vec::with_capacity(limit.unwrap_or(compressed.len() * 4));
        MultiGzDecoder::new(compressed)
            .take(cap)
            .read_to_end(&mut raw)
            .map_err(|e| CodecError::decode(alg, e.to_string()))?;
        if let Some(max_len) = limit {
            if raw.len() > max_len {
                return Err(CodecError::decode(
                    alg,
                    format!("tile inflates past {max_len} bytes"),
                ));
            }
        }

        match self.shuffle {
            Some(itemsize) if itemsize > 1 => {
                if raw.len() % itemsize != 0 {
                    return Err(CodecError::decode(
                        alg,
                        format!("{} bytes are not whole {itemsize}-byte samples", raw.len()),
                    ));
                }
                Ok(unshuffle_bytes(&raw, itemsize))
            }
            _ => Ok(raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bytes() -> Vec<u8> {
        // big-endian i16 ramp with a few outliers
        (0..500i16)
            .map(|i| if i % 50 == 0 { -i * 60 } else { i })
            .flat_map(|v| v.to_be_bytes())
            .collect()
    }

    #[test]
    fn test_shuffle_layout() {
        let bytes = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06];
        assert_eq!(shuffle_bytes(&bytes, 2), vec![0x01, 0x03, 0x05, 0x02, 0x04, 0x06]);
        assert_eq!(unshuffle_bytes(&shuffle_bytes(&bytes, 3), 3), bytes);
    }

    #[test]
    fn test_roundtrip_both_variants() {
        let samples = sample_bytes();
        for codec in [GzipCodec::gzip1(), GzipCodec::gzip2(2).unwrap()] {
            let encoded = codec.encode(&samples).unwrap();
            // gzip member magic
            assert_eq!(&encoded[..2], &[0x1f, 0x8b]);
            assert!(encoded.len() < samples.len());
            assert_eq!(codec.decode(&encoded).unwrap(), samples);
        }
    }

    #[test]
    fn test_shuffle_helps_smooth_data() {
        let samples: Vec<u8> = (0..4000i32)
            .map(|i| 70_000 + i * 3)
            .flat_map(|v| v.to_be_bytes())
            .collect();
        let plain = GzipCodec::gzip1().encode(&samples).unwrap();
        let shuffled = GzipCodec::gzip2(4).unwrap().encode(&samples).unwrap();
        assert!(shuffled.len() < plain.len());
    }

    #[test]
    fn test_empty_tile() {
        let codec = GzipCodec::gzip2(4).unwrap();
        let encoded = codec.encode(&[]).unwrap();
        assert!(codec.decode(&encoded).unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_input_is_decode_error() {
        let codec = GzipCodec::gzip1();
        let encoded = codec.encode(&sample_bytes()).unwrap();
        let err = codec.decode(&encoded[..encoded.len() / 2]).unwrap_err();
        assert!(matches!(err, CodecError::Decode { algorithm: Algorithm::Gzip1, .. }));
        assert!(codec.decode(b"not a gzip stream").is_err());
    }

    #[test]
    fn test_partial_samples_rejected() {
        let codec = GzipCodec::gzip2(4).unwrap();
        assert!(matches!(codec.encode(&[1, 2, 3]), Err(CodecError::Encode { .. })));
        assert!(GzipCodec::gzip2(3).is_err());
    }

    #[test]
    fn test_concatenated_members_are_read() {
        let codec = GzipCodec::gzip1();
        let mut stream = codec.encode(b"first member, ").unwrap();
        stream.extend(codec.encode(b"second member").unwrap());
        assert_eq!(codec.decode(&stream).unwrap(), b"first member, second member");
    }

    #[test]
    fn test_bounded_decode_stops_at_tile_size() {
        let codec = GzipCodec::gzip2(4).unwrap();
        let samples = vec![0u8; 1 << 20];
        let encoded = codec.encode(&samples).unwrap();
        assert_eq!(codec.decode_bounded(&encoded, samples.len()).unwrap(), samples);
        let err = codec.decode_bounded(&encoded, 64).unwrap_err();
        assert!(matches!(err, CodecError::Decode { algorithm: Algorithm::Gzip2, .. }));
    }
}
