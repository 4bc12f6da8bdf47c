use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::error::{CodecError, Result};
use crate::format::{NULL_VALUE, N_RANDOM, N_RESERVED_VALUES};

/// Per-tile parameters recorded alongside a quantized tile (`ZSCALE`,
/// `ZZERO`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TileQuantization {
    pub scale: f64,
    pub zero_point: f64,
}

/// Converts floating-point tiles to 32-bit integers and back.
///
/// A positive level derives the step from the tile's background noise
/// (`scale = noise / level`); a negative level is the step itself.
/// With a dither seed, a reproducible uniform offset is subtracted per sample
/// before rounding and added back on restore.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantizer {
    level: f64,
    dither_seed: Option<u32>,
}

impl Quantizer {
    pub fn new(level: f64, dither_seed: Option<u32>) -> Result<Self> {
        if !level.is_finite() || level == 0.0 {
            return Err(CodecError::InvalidQuantization(format!(
                "quantize level {level} does not select a lossy mode"
            )));
        }
        if let Some(seed) = dither_seed {
            if seed == 0 || seed as usize > N_RANDOM {
                return Err(CodecError::invalid_setting(
                    "dither_seed",
                    format!("{seed} is outside 1..={N_RANDOM}"),
                ));
            }
        }
        Ok(Self { level, dither_seed })
    }

    pub fn level(&self) -> f64 {
        self.level
    }

    pub fn dither_seed(&self) -> Option<u32> {
        self.dither_seed
    }

    /// Quantization step for a tile whose rows are `row_len` samples long.
    pub fn scale_for(&self, values: &[f64], row_len: usize) -> Result<f64> {
        let scale = if self.level > 0.0 {
            noise_estimate(values, row_len) / self.level
        } else {
            -self.level
        };
        if !(scale > 0.0) || !scale.is_finite() {
            return Err(CodecError::InvalidQuantization(format!(
                "computed scale {scale} is not positive"
            )));
        }
        Ok(scale)
    }

    /// Quantize one tile. NaN samples become [`NULL_VALUE`].
    pub fn quantize(
        &self,
        tile_index: usize,
        values: &[f64],
        row_len: usize,
    ) -> Result<(Vec<i32>, TileQuantization)> {
        let finite = values.iter().copied().filter(|v| !v.is_nan());
        let (min, max) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
        if min > max {
            // nothing but nulls
            return Ok((
                vec![NULL_VALUE; values.len()],
                TileQuantization {
                    scale: 1.0,
                    zero_point: 0.0,
                },
            ));
        }
        if !min.is_finite() || !max.is_finite() {
            return Err(CodecError::InvalidQuantization(
                "tile contains infinite samples".into(),
            ));
        }

        let scale = self.scale_for(values, row_len)?;
        let span = (max - min) / scale;
        if span >= 2.0 * i32::MAX as f64 - N_RESERVED_VALUES as f64 {
            return Err(CodecError::InvalidQuantization(format!(
                "range {min}..{max} needs more than 32 bits at scale {scale}"
            )));
        }
        let zero_point = if span < i32::MAX as f64 - N_RESERVED_VALUES as f64 {
            // keep the zero point on the quantization grid
            (min / scale + 0.5).trunc() * scale
        } else {
            (min + max) / 2.0
        };

        let mut dither = self.dither_seed.map(|seed| Dither::new(tile_index, seed));
        let quantized = values
            .iter()
            .map(|&x| {
                let offset = dither.as_mut().map_or(0.5, |d| d.next());
                if x.is_nan() {
                    NULL_VALUE
                } else {
                    ((x - zero_point) / scale + offset - 0.5).round() as i32
                }
            })
            .collect();
        Ok((quantized, TileQuantization { scale, zero_point }))
    }

    /// Restore a tile quantized with parameters `q`.
    pub fn dequantize(&self, tile_index: usize, values: &[i32], q: &TileQuantization) -> Vec<f64> {
        let mut dither = self.dither_seed.map(|seed| Dither::new(tile_index, seed));
        values
            .iter()
            .map(|&i| {
                let offset = dither.as_mut().map_or(0.5, |d| d.next());
                if i == NULL_VALUE {
                    f64::NAN
                } else {
                    (i as f64 - offset + 0.5) * q.scale + q.zero_point
                }
            })
            .collect()
    }
}

// ── Subtractive dithering ──────────────────────────────────────────────────

/// The 10 000-entry Park–Miller uniform sequence shared by writers and
/// readers of dithered tiles.
pub fn random_sequence() -> &'static [f32] {
    static TABLE: OnceLock<Vec<f32>> = OnceLock::new();
    TABLE.get_or_init(|| {
        const A: f64 = 16807.0;
        const M: f64 = 2147483647.0;
        let mut seed = 1.0f64;
        (0..N_RANDOM)
            .map(|_| {
                let temp = A * seed;
                seed = temp - M * (temp / M).floor();
                (seed / M) as f32
            })
            .collect()
    })
}

/// Walks the random sequence the way a tile's samples consume it.
struct Dither {
    table: &'static [f32],
    iseed: usize,
    next: usize,
}

impl Dither {
    fn new(tile_index: usize, seed: u32) -> Self {
        let table = random_sequence();
        let iseed = (tile_index + seed as usize - 1) % N_RANDOM;
        let next = (table[iseed] * 500.0) as usize;
        Self { table, iseed, next }
    }

    fn next(&mut self) -> f64 {
        let value = self.table[self.next] as f64;
        self.next += 1;
        if self.next == N_RANDOM {
            self.iseed = (self.iseed + 1) % N_RANDOM;
            self.next = (self.table[self.iseed] * 500.0) as usize;
        }
        value
    }
}

// ── Noise estimation ───────────────────────────────────────────────────────

const NOISE2_FACTOR: f64 = 1.0483579;
const NOISE3_FACTOR: f64 = 0.6052697;
const NOISE5_FACTOR: f64 = 0.1772048;

/// Background noise of a tile from median absolute differences.
///
/// Uses the 3rd-order estimator, replaced by the 2nd- or 5th-order one when
/// that is smaller and non-zero. Rows shorter than nine samples are joined
/// into one. NaN samples are skipped. Returns `0.0` when there is too little
/// data.
pub fn noise_estimate(values: &[f64], row_len: usize) -> f64 {
    let row_len = if row_len < 9 { values.len() } else { row_len };
    if row_len == 0 {
        return 0.0;
    }
    let mut rows2 = Vec::new();
    let mut rows3 = Vec::new();
    let mut rows5 = Vec::new();
    let mut d2 = Vec::new();
    let mut d3 = Vec::new();
    let mut d5 = Vec::new();

    for row in values.chunks(row_len) {
        let v: Vec<f64> = row.iter().copied().filter(|x| !x.is_nan()).collect();
        if v.len() < 9 {
            continue;
        }
        d2.clear();
        d3.clear();
        d5.clear();
        for i in 4..v.len() - 4 {
            if !(v[i] == v[i + 1] && v[i + 1] == v[i + 2]) {
                d2.push((v[i] - v[i + 2]).abs());
            }
            if !v[i - 2..=i + 2].windows(2).all(|w| w[0] == w[1]) {
                d3.push((2.0 * v[i] - v[i - 2] - v[i + 2]).abs());
                d5.push(
                    (6.0 * v[i] - 4.0 * v[i - 2] - 4.0 * v[i + 2] + v[i - 4] + v[i + 4]).abs(),
                );
            }
        }
        if let Some(m) = median(&mut d2) {
            rows2.push(m);
        }
        if let Some(m) = median(&mut d3) {
            rows3.push(m);
        }
        if let Some(m) = median(&mut d5) {
            rows5.push(m);
        }
    }

    let noise2 = NOISE2_FACTOR * median(&mut rows2).unwrap_or(0.0);
    let noise3 = NOISE3_FACTOR * median(&mut rows3).unwrap_or(0.0);
    let noise5 = NOISE5_FACTOR * median(&mut rows5).unwrap_or(0.0);

    let mut noise = noise3;
    for candidate in [noise2, noise5] {
        if candidate != 0.0 && candidate < noise {
            noise = candidate;
        }
    }
    noise
}

/// Lower median; reorders `values`.
fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let k = (values.len() - 1) / 2;
    let (_, m, _) = values.select_nth_unstable_by(k, |a, b| a.total_cmp(b));
    Some(*m)
}
