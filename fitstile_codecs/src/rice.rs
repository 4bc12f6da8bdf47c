use fitstile_core::codec::{Codec, SampleLayout};
use fitstile_core::dtype::{read_int, write_int};
use fitstile_core::{Algorithm, ByteOrder, CodecError, Result};

use crate::bits::{BitReader, BitWriter};

/// Adaptive Golomb-Rice coder (`RICE_1`).
///
/// Samples are first-differenced, zig-zag mapped to unsigned values and
/// coded in blocks of `blocksize`. Each block carries its own Rice
/// parameter, chosen from the block mean, or is stored as a zero block or
/// as raw differences when that is cheaper.
///
/// Uncompressed samples are `bytepix`-wide little-endian integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiceCodec {
    blocksize: usize,
    bytepix: usize,
    tilesize: usize,
    params: RiceParams,
}

/// Per-width coding constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RiceParams {
    /// Width of the per-block code.
    fsbits: u32,
    /// Largest Rice parameter before falling back to raw differences.
    fsmax: u32,
    /// Sample width in bits.
    bbits: u32,
}

impl RiceParams {
    fn for_bytepix(bytepix: usize) -> Result<Self> {
        match bytepix {
            1 => Ok(Self { fsbits: 3, fsmax: 6, bbits: 8 }),
            2 => Ok(Self { fsbits: 4, fsmax: 14, bbits: 16 }),
            4 => Ok(Self { fsbits: 5, fsmax: 25, bbits: 32 }),
            other => Err(CodecError::invalid_setting(
                "bytepix",
                format!("{other} is not one of 1, 2, 4"),
            )),
        }
    }

    fn mask(&self) -> u32 {
        if self.bbits == 32 {
            u32::MAX
        } else {
            (1u32 << self.bbits) - 1
        }
    }

    /// Zig-zag map the difference `next - last` taken at the sample width.
    fn zigzag(&self, next: u32, last: u32) -> u32 {
        let raw = next.wrapping_sub(last) & self.mask();
        let shift = 64 - self.bbits;
        let diff = ((raw as u64) << shift) as i64 >> shift;
        let mapped = if diff < 0 { !(diff << 1) } else { diff << 1 };
        mapped as u32
    }

    fn unzigzag(&self, mapped: u32) -> u32 {
        if mapped & 1 == 0 {
            mapped >> 1
        } else {
            !(mapped >> 1)
        }
    }
}

impl RiceCodec {
    pub fn new(blocksize: usize, bytepix: usize, tilesize: usize) -> Result<Self> {
        let params = RiceParams::for_bytepix(bytepix)?;
        if blocksize == 0 {
            return Err(CodecError::invalid_setting("blocksize", "must be positive"));
        }
        Ok(Self {
            blocksize,
            bytepix,
            tilesize,
            params,
        })
    }
}

impl Codec for RiceCodec {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Rice1
    }

    fn sample_layout(&self) -> SampleLayout {
        SampleLayout {
            width: Some(self.bytepix),
            order: ByteOrder::Little,
        }
    }

    fn encode(&self, samples: &[u8]) -> Result<Vec<u8>> {
        if samples.len() != self.tilesize * self.bytepix {
            return Err(CodecError::encode(
                Algorithm::Rice1,
                format!(
                    "{} bytes do not hold {} samples of {} bytes",
                    samples.len(),
                    self.tilesize,
                    self.bytepix
                ),
            ));
        }
        let p = self.params;
        let values: Vec<u32> = samples
            .chunks_exact(self.bytepix)
            .map(|c| read_int(c, false, ByteOrder::Little) as u32)
            .collect();
        let Some(&first) = values.first() else {
            return Ok(Vec::new());
        };

        let mut out = BitWriter::with_capacity(samples.len() / 2 + 8);
        out.write_bits(first as u64, p.bbits);

        let mut last = first;
        let mut diffs = Vec::with_capacity(self.blocksize);
        for block in values.chunks(self.blocksize) {
            diffs.clear();
            let mut pixelsum = 0.0f64;
            for &next in block {
                let d = p.zigzag(next, last);
                pixelsum += d as f64;
                diffs.push(d);
                last = next;
            }

            let n = block.len();
            let dpsum = ((pixelsum - (n / 2) as f64 - 1.0) / n as f64).max(0.0);
            let psum = (dpsum as u32) >> 1;
            let fs = 32 - psum.leading_zeros();

            if fs >= p.fsmax {
                // high entropy: store differences verbatim
                out.write_bits((p.fsmax + 1) as u64, p.fsbits);
                for &d in &diffs {
                    out.write_bits(d as u64, p.bbits);
                }
            } else if fs == 0 && pixelsum == 0.0 {
                out.write_bits(0, p.fsbits);
            } else {
                out.write_bits((fs + 1) as u64, p.fsbits);
                let fsmask = (1u64 << fs) - 1;
                for &d in &diffs {
                    let v = d as u64;
                    out.write_zeros(v >> fs);
                    out.write_bit(true);
                    if fs > 0 {
                        out.write_bits(v & fsmask, fs);
                    }
                }
            }
        }
        Ok(out.finish())
    }

    fn decode(&self, compressed: &[u8]) -> Result<Vec<u8>> {
        let p = self.params;
        let mut out = Vec::with_capacity(self.tilesize * self.bytepix);
        if self.tilesize == 0 {
            return Ok(out);
        }
        let mut input = BitReader::new(compressed, Algorithm::Rice1);
        let mut last = input.read_bits(p.bbits)? as u32;

        let mut i = 0;
        while i < self.tilesize {
            let end = (i + self.blocksize).min(self.tilesize);
            let code = input.read_bits(p.fsbits)? as u32;
            if code == 0 {
                for _ in i..end {
                    write_int(last as i64, self.bytepix, ByteOrder::Little, &mut out);
                }
            } else {
                let fs = code - 1;
                if fs > p.fsmax {
                    return Err(CodecError::decode(
                        Algorithm::Rice1,
                        format!("block code {code} exceeds {}", p.fsmax + 1),
                    ));
                }
                for _ in i..end {
                    let mapped = if fs == p.fsmax {
                        input.read_bits(p.bbits)? as u32
                    } else {
                        let top = input.read_unary()?;
                        if top > (p.mask() >> fs) as u64 {
                            return Err(CodecError::decode(
                                Algorithm::Rice1,
                                "coded difference wider than the sample",
                            ));
                        }
                        let low = if fs > 0 { input.read_bits(fs)? } else { 0 };
                        ((top << fs) | low) as u32
                    };
                    last = last.wrapping_add(p.unzigzag(mapped)) & p.mask();
                    write_int(last as i64, self.bytepix, ByteOrder::Little, &mut out);
                }
            }
            i = end;
        }
        Ok(out)
    }
}
