//! H-transform image coder (`HCOMPRESS_1`).
//!
//! A tile is an `nx` x `ny` array (rows by row length). Encoding runs the
//! forward H-transform, optionally divides the coefficients by `scale`, and
//! codes their magnitudes bit plane by bit plane with quadtrees. Signs
//! follow as a plain bitmap.
//!
//! Stream layout:
//!
//! ```text
//! DD 99 | nx: i32 BE | ny: i32 BE | scale: i32 BE | sum: i64 BE
//!       | bit planes per quadrant class: 3 x u8
//!       | quadtree bits, 4-bit zero terminator, zero padding
//!       | sign bits, one per non-zero coefficient, zero padding
//! ```

mod qtree;
mod smooth;
mod transform;

use fitstile_core::codec::{Codec, SampleLayout};
use fitstile_core::dtype::{read_int, signed_range, write_int};
use fitstile_core::format::HCOMPRESS_MAGIC;
use fitstile_core::{Algorithm, ByteOrder, CodecError, Result};

use crate::bits::{BitReader, BitWriter};

const HEADER_LEN: usize = 2 + 3 * 4 + 8 + 3;

/// Largest coefficient magnitude a valid stream can carry. Keeps every
/// intermediate of the inverse transform inside `i64`.
const COEFF_LIMIT: u64 = 1 << 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HcompressCodec {
    bytepix: usize,
    scale: i32,
    smooth: bool,
    nx: usize,
    ny: usize,
}

/// One of the four coefficient quadrants coded per stream.
struct Quadrant {
    offset: usize,
    nqx: usize,
    nqy: usize,
    /// Index into the per-class bit plane counts.
    class: usize,
}

fn quadrants(nx: usize, ny: usize) -> [Quadrant; 4] {
    let (nx2, ny2) = (nx.div_ceil(2), ny.div_ceil(2));
    [
        Quadrant { offset: 0, nqx: nx2, nqy: ny2, class: 0 },
        Quadrant { offset: ny2, nqx: nx2, nqy: ny / 2, class: 1 },
        Quadrant { offset: ny * nx2, nqx: nx / 2, nqy: ny2, class: 1 },
        Quadrant { offset: ny * nx2 + ny2, nqx: nx / 2, nqy: ny / 2, class: 2 },
    ]
}

/// Bit planes needed for the largest magnitude in each quadrant class.
fn bitplanes(a: &[i64], nx: usize, ny: usize) -> [u32; 3] {
    let (nx2, ny2) = (nx.div_ceil(2), ny.div_ceil(2));
    let mut vmax = [0i64; 3];
    for (idx, &v) in a.iter().enumerate() {
        let class = usize::from(idx % ny >= ny2) + usize::from(idx / ny >= nx2);
        vmax[class] = vmax[class].max(v);
    }
    vmax.map(|v| 64 - v.leading_zeros())
}

fn be_i32(bytes: &[u8]) -> i32 {
    i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

impl HcompressCodec {
    pub fn new(bytepix: usize, scale: i32, smooth: bool, nx: usize, ny: usize) -> Result<Self> {
        if !matches!(bytepix, 4 | 8) {
            return Err(CodecError::invalid_setting(
                "bytepix",
                format!("{bytepix} is not one of 4, 8"),
            ));
        }
        let max = i32::MAX as usize;
        if nx == 0 || ny == 0 || nx > max || ny > max {
            return Err(CodecError::InvalidTileShape(format!(
                "HCOMPRESS cannot code a {nx}x{ny} tile"
            )));
        }
        Ok(Self {
            bytepix,
            scale,
            smooth,
            nx,
            ny,
        })
    }

    fn tile_len(&self) -> usize {
        self.nx * self.ny
    }

    /// Largest sample magnitude the forward transform can take without
    /// overflowing.
    fn sample_limit(&self) -> i64 {
        let log2n = transform::levels(self.nx, self.ny);
        (1i64 << 58u32.saturating_sub(log2n)) - 1
    }

    fn corrupt(reason: impl Into<String>) -> CodecError {
        CodecError::decode(Algorithm::Hcompress1, reason)
    }
}

impl Codec for HcompressCodec {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Hcompress1
    }

    fn sample_layout(&self) -> SampleLayout {
        SampleLayout {
            width: Some(self.bytepix),
            order: ByteOrder::NATIVE,
        }
    }

    fn encode(&self, samples: &[u8]) -> Result<Vec<u8>> {
        let (nx, ny) = (self.nx, self.ny);
        if samples.len() != self.tile_len() * self.bytepix {
            return Err(CodecError::encode(
                Algorithm::Hcompress1,
                format!(
                    "{} bytes do not hold a {nx}x{ny} tile of {}-byte samples",
                    samples.len(),
                    self.bytepix
                ),
            ));
        }
        let limit = self.sample_limit();
        let mut a = Vec::with_capacity(self.tile_len());
        for chunk in samples.chunks_exact(self.bytepix) {
            let v = read_int(chunk, true, ByteOrder::NATIVE);
            if !(-limit..=limit).contains(&v) {
                return Err(CodecError::EncodingRange {
                    value: v,
                    min: -limit,
                    max: limit,
                });
            }
            a.push(v);
        }

        transform::htrans(&mut a, nx, ny);
        transform::digitize(&mut a, self.scale as i64);

        let mut out = Vec::with_capacity(HEADER_LEN + samples.len() / 4);
        out.extend_from_slice(&HCOMPRESS_MAGIC);
        out.extend_from_slice(&(nx as i32).to_be_bytes());
        out.extend_from_slice(&(ny as i32).to_be_bytes());
        out.extend_from_slice(&self.scale.to_be_bytes());
        out.extend_from_slice(&a[0].to_be_bytes());
        a[0] = 0;

        let mut signs = BitWriter::with_capacity(a.len() / 8 + 1);
        for v in a.iter_mut() {
            if *v > 0 {
                signs.write_bit(false);
            } else if *v < 0 {
                signs.write_bit(true);
                *v = -*v;
            }
        }

        let planes = bitplanes(&a, nx, ny);
        out.extend(planes.iter().map(|&p| p as u8));

        let mut bits = BitWriter::with_capacity(a.len());
        for q in quadrants(nx, ny) {
            let region = a.get(q.offset..).unwrap_or_default();
            qtree::encode_quadrant(&mut bits, region, ny, q.nqx, q.nqy, planes[q.class]);
        }
        bits.write_bits(0, 4);
        out.extend(bits.finish());
        out.extend(signs.finish());

        tracing::trace!(nx, ny, scale = self.scale, bytes = out.len(), "hcompress tile");
        Ok(out)
    }

    fn decode(&self, compressed: &[u8]) -> Result<Vec<u8>> {
        if compressed.len() < HEADER_LEN {
            return Err(Self::corrupt(format!(
                "stream of {} bytes is shorter than the header",
                compressed.len()
            )));
        }
        if compressed[..2] != HCOMPRESS_MAGIC {
            return Err(Self::corrupt(format!(
                "bad magic {:02x}{:02x}",
                compressed[0], compressed[1]
            )));
        }
        let (nx, ny) = (be_i32(&compressed[2..6]), be_i32(&compressed[6..10]));
        if nx as i64 != self.nx as i64 || ny as i64 != self.ny as i64 {
            return Err(Self::corrupt(format!(
                "stream codes a {nx}x{ny} tile, expected {}x{}",
                self.nx, self.ny
            )));
        }
        let (nx, ny) = (self.nx, self.ny);
        let scale = be_i32(&compressed[10..14]) as i64;
        let mut sum_bytes = [0u8; 8];
        sum_bytes.copy_from_slice(&compressed[14..22]);
        let sum = i64::from_be_bytes(sum_bytes);
        let mut planes = [0u32; 3];
        for (p, &b) in planes.iter_mut().zip(&compressed[22..HEADER_LEN]) {
            if u64::from(b) > u64::from(COEFF_LIMIT.trailing_zeros()) {
                return Err(Self::corrupt(format!("{b} bit planes")));
            }
            *p = b as u32;
        }

        let mut a = vec![0i64; self.tile_len()];
        let mut input = BitReader::new(&compressed[HEADER_LEN..], Algorithm::Hcompress1);
        for q in quadrants(nx, ny) {
            let region = a.get_mut(q.offset..).unwrap_or_default();
            qtree::decode_quadrant(&mut input, region, ny, q.nqx, q.nqy, planes[q.class])?;
        }
        if input.read_bits(4)? != 0 {
            return Err(Self::corrupt("missing end of bit planes"));
        }
        input.align();
        for v in a.iter_mut() {
            if *v != 0 && input.read_bit()? {
                *v = -*v;
            }
        }
        a[0] = sum;

        for v in a.iter_mut() {
            let restored = if scale > 1 { v.checked_mul(scale) } else { Some(*v) };
            *v = restored
                .filter(|r| r.unsigned_abs() <= COEFF_LIMIT)
                .ok_or_else(|| Self::corrupt("coefficient out of range"))?;
        }
        transform::hinv(&mut a, nx, ny, self.smooth, scale);

        // lossy reconstructions may overshoot the sample width
        let (min, max) = signed_range(self.bytepix);
        let mut out = Vec::with_capacity(a.len() * self.bytepix);
        for v in a {
            write_int(v.clamp(min, max), self.bytepix, ByteOrder::NATIVE, &mut out);
        }
        Ok(out)
    }
}
