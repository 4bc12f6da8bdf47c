//! Quadtree coding of coefficient bit planes.
//!
//! Each bit plane of a quadrant is split into 2x2 blocks, one 4-bit value
//! per block (bit 3 = top-left, bit 2 = top-right, bit 1 = bottom-left,
//! bit 0 = bottom-right). The block map is reduced repeatedly to a single
//! root and the non-zero nodes are Huffman coded from the root down. A plane
//! whose code would not beat the plain block map is written as the map.

use fitstile_core::{Algorithm, CodecError, Result};

use super::transform::levels;
use crate::bits::{BitReader, BitWriter};

/// Huffman code of each 4-bit block value.
const CODE: [u8; 16] = [
    0x3e, 0x00, 0x01, 0x08, 0x02, 0x09, 0x1a, 0x1b, 0x03, 0x1c, 0x0a, 0x1d, 0x0b, 0x1e, 0x3f, 0x0c,
];
const CODE_LEN: [u8; 16] = [6, 3, 3, 4, 3, 4, 5, 5, 3, 5, 4, 5, 4, 5, 6, 4];

/// Plane written as a bare block map.
const PLANE_DIRECT: u64 = 0x0;
/// Plane written as a quadtree.
const PLANE_QTREE: u64 = 0xF;

fn write_huffman(out: &mut BitWriter, value: u8) {
    let v = value as usize;
    out.write_bits(CODE[v] as u64, CODE_LEN[v] as u32);
}

fn read_huffman(input: &mut BitReader<'_>) -> Result<u8> {
    let mut c = input.read_bits(3)?;
    if c < 4 {
        return Ok(1 << c);
    }
    c = (c << 1) | input.read_bits(1)?;
    match c {
        8 => return Ok(3),
        9 => return Ok(5),
        10 => return Ok(10),
        11 => return Ok(12),
        12 => return Ok(15),
        _ => {}
    }
    c = (c << 1) | input.read_bits(1)?;
    match c {
        26 => return Ok(6),
        27 => return Ok(7),
        28 => return Ok(9),
        29 => return Ok(11),
        30 => return Ok(13),
        _ => {}
    }
    c = (c << 1) | input.read_bits(1)?;
    Ok(if c == 62 { 0 } else { 14 })
}

/// Collect the 2x2 blocks of an `nx` x `ny` region with row stride `n`.
/// Samples past an odd edge count as zero.
fn gather_blocks(n: usize, nx: usize, ny: usize, get: impl Fn(usize) -> u8, out: &mut Vec<u8>) {
    out.clear();
    for i in (0..nx).step_by(2) {
        let last_row = i + 1 == nx;
        for j in (0..ny).step_by(2) {
            let last_col = j + 1 == ny;
            let s00 = n * i + j;
            let mut block = get(s00) << 3;
            if !last_col {
                block |= get(s00 + 1) << 2;
            }
            if !last_row {
                block |= get(s00 + n) << 1;
                if !last_col {
                    block |= get(s00 + n + 1);
                }
            }
            out.push(block);
        }
    }
}

/// Inverse of [`gather_blocks`]: call `set` for every sample whose bit is
/// on in its block.
fn scatter_blocks(blocks: &[u8], n: usize, nx: usize, ny: usize, mut set: impl FnMut(usize)) {
    let mut k = 0;
    for i in (0..nx).step_by(2) {
        let last_row = i + 1 == nx;
        for j in (0..ny).step_by(2) {
            let last_col = j + 1 == ny;
            let Some(&block) = blocks.get(k) else {
                return;
            };
            k += 1;
            let s00 = n * i + j;
            if block & 8 != 0 {
                set(s00);
            }
            if !last_col && block & 4 != 0 {
                set(s00 + 1);
            }
            if !last_row {
                if block & 2 != 0 {
                    set(s00 + n);
                }
                if !last_col && block & 1 != 0 {
                    set(s00 + n + 1);
                }
            }
        }
    }
}

/// Huffman codes of one bit plane, packed least significant bit first and
/// emitted in reverse so the decoder meets the root first.
struct CodeBuffer {
    bytes: Vec<u8>,
    acc: u32,
    pending: u32,
    /// Size at which the plain block map is no larger.
    limit: usize,
}

impl CodeBuffer {
    fn new(limit: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(limit),
            acc: 0,
            pending: 0,
            limit,
        }
    }

    /// Append the codes of the non-zero blocks; `false` once the limit is hit.
    fn push_level(&mut self, blocks: &[u8]) -> bool {
        for &b in blocks.iter().filter(|&&b| b != 0) {
            self.acc |= (CODE[b as usize] as u32) << self.pending;
            self.pending += CODE_LEN[b as usize] as u32;
            if self.pending >= 8 {
                self.bytes.push(self.acc as u8);
                if self.bytes.len() >= self.limit {
                    return false;
                }
                self.acc >>= 8;
                self.pending -= 8;
            }
        }
        true
    }

    fn finish(self, out: &mut BitWriter) {
        if self.pending > 0 {
            out.write_bits((self.acc & ((1 << self.pending) - 1)) as u64, self.pending);
        } else if self.bytes.is_empty() {
            write_huffman(out, 0);
        }
        for &b in self.bytes.iter().rev() {
            out.write_bits(b as u64, 8);
        }
    }
}

/// Code the top `nbitplanes` bit planes of an `nqx` x `nqy` quadrant of
/// non-negative values with row stride `n`.
pub(super) fn encode_quadrant(
    out: &mut BitWriter,
    a: &[i64],
    n: usize,
    nqx: usize,
    nqy: usize,
    nbitplanes: u32,
) {
    let log2n = levels(nqx, nqy);
    let (nqx2, nqy2) = (nqx.div_ceil(2), nqy.div_ceil(2));
    let limit = (nqx2 * nqy2).div_ceil(2);
    let mut level = Vec::with_capacity(nqx2 * nqy2);
    let mut reduced = Vec::with_capacity(nqx2 * nqy2);

    for bit in (0..nbitplanes).rev() {
        let plane_bit = |idx: usize| ((a[idx] >> bit) & 1) as u8;
        gather_blocks(n, nqx, nqy, plane_bit, &mut level);

        let mut codes = CodeBuffer::new(limit);
        let mut fits = codes.push_level(&level);
        let (mut nx, mut ny) = (nqx2, nqy2);
        for _ in 1..log2n {
            if !fits {
                break;
            }
            gather_blocks(ny, nx, ny, |idx| (level[idx] != 0) as u8, &mut reduced);
            std::mem::swap(&mut level, &mut reduced);
            nx = nx.div_ceil(2);
            ny = ny.div_ceil(2);
            fits = codes.push_level(&level);
        }

        if fits {
            out.write_bits(PLANE_QTREE, 4);
            codes.finish(out);
        } else {
            out.write_bits(PLANE_DIRECT, 4);
            gather_blocks(n, nqx, nqy, plane_bit, &mut level);
            for &block in &level {
                out.write_bits(block as u64, 4);
            }
        }
    }
}

/// OR the decoded bit planes of a quadrant into `a`.
pub(super) fn decode_quadrant(
    input: &mut BitReader<'_>,
    a: &mut [i64],
    n: usize,
    nqx: usize,
    nqy: usize,
    nbitplanes: u32,
) -> Result<()> {
    let log2n = levels(nqx, nqy);
    let (nqx2, nqy2) = (nqx.div_ceil(2), nqy.div_ceil(2));
    let mut level: Vec<u8> = Vec::with_capacity(nqx2 * nqy2);
    let mut expanded: Vec<u8> = Vec::with_capacity(nqx2 * nqy2);

    for bit in (0..nbitplanes).rev() {
        level.clear();
        match input.read_bits(4)? {
            PLANE_DIRECT => {
                for _ in 0..nqx2 * nqy2 {
                    level.push(input.read_bits(4)? as u8);
                }
            }
            PLANE_QTREE => {
                level.push(read_huffman(input)?);
                let (mut nx, mut ny) = (1usize, 1usize);
                let (mut nfx, mut nfy) = (nqx, nqy);
                let mut c = 1usize << log2n;
                for _ in 1..log2n {
                    c >>= 1;
                    nx <<= 1;
                    ny <<= 1;
                    if nfx <= c {
                        nx -= 1;
                    } else {
                        nfx -= c;
                    }
                    if nfy <= c {
                        ny -= 1;
                    } else {
                        nfy -= c;
                    }
                    expanded.clear();
                    expanded.resize(nx * ny, 0);
                    scatter_blocks(&level, ny, nx, ny, |idx| expanded[idx] = 1);
                    for node in expanded.iter_mut().rev() {
                        if *node != 0 {
                            *node = read_huffman(input)?;
                        }
                    }
                    std::mem::swap(&mut level, &mut expanded);
                }
            }
            other => {
                return Err(CodecError::decode(
                    Algorithm::Hcompress1,
                    format!("bad bit-plane format code {other:#x}"),
                ));
            }
        }
        let plane = 1i64 << bit;
        scatter_blocks(&level, n, nqx, nqy, |idx| a[idx] |= plane);
    }
    Ok(())
}
