use serde::{Deserialize, Serialize};

use crate::error::{CodecError, Result};
use crate::format::{Algorithm, N_RANDOM};

/// Named bag of compression parameters, as read from the container's
/// `ZCMPTYPE` / `ZNAMEi` / `ZVALi` keywords.
///
/// Each algorithm reads only a subset of the keys; [`resolve`] validates the
/// bag into a [`CodecSettings`] carrying exactly that subset.
///
/// [`resolve`]: CompressionSettings::resolve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompressionSettings {
    pub algorithm: Algorithm,
    /// RICE samples per coding block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocksize: Option<usize>,
    /// Sample width in bytes as seen by RICE or HCOMPRESS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytepix: Option<usize>,
    /// Number of samples in the tile (RICE, PLIO).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tilesize: Option<usize>,
    /// HCOMPRESS digitization scale; `<= 0` is lossless.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    /// HCOMPRESS decode-time smoothing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smooth: Option<bool>,
    /// HCOMPRESS extent of the slow tile axis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nx: Option<usize>,
    /// HCOMPRESS extent of the fast tile axis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ny: Option<usize>,
    /// GZIP_2 sample width used for byte-plane shuffling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub itemsize: Option<usize>,
    /// Floating-point quantization level; `0` selects the lossless path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantize_level: Option<f64>,
    /// Enables subtractive dithering with this seed (1..=10000).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dither_seed: Option<u32>,
}

/// Validated parameters of a single codec.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CodecSettings {
    NoCompress,
    Gzip1,
    Gzip2 {
        itemsize: usize,
    },
    Rice1 {
        blocksize: usize,
        bytepix: usize,
        tilesize: usize,
    },
    Plio1 {
        tilesize: usize,
    },
    Hcompress1 {
        bytepix: usize,
        scale: i32,
        smooth: bool,
        nx: usize,
        ny: usize,
    },
}

impl CodecSettings {
    pub fn algorithm(&self) -> Algorithm {
        match self {
            CodecSettings::NoCompress => Algorithm::NoCompress,
            CodecSettings::Gzip1 => Algorithm::Gzip1,
            CodecSettings::Gzip2 { .. } => Algorithm::Gzip2,
            CodecSettings::Rice1 { .. } => Algorithm::Rice1,
            CodecSettings::Plio1 { .. } => Algorithm::Plio1,
            CodecSettings::Hcompress1 { .. } => Algorithm::Hcompress1,
        }
    }
}

/// Which tile-geometry key an algorithm takes from the tile shape.
const GEOMETRY_KEYS: [&str; 4] = ["tilesize", "nx", "ny", "itemsize"];

impl CompressionSettings {
    pub fn new(algorithm: Algorithm) -> Self {
        Self {
            algorithm,
            blocksize: None,
            bytepix: None,
            tilesize: None,
            scale: None,
            smooth: None,
            nx: None,
            ny: None,
            itemsize: None,
            quantize_level: None,
            dither_seed: None,
        }
    }

    pub fn with_blocksize(mut self, blocksize: usize) -> Self {
        self.blocksize = Some(blocksize);
        self
    }

    pub fn with_bytepix(mut self, bytepix: usize) -> Self {
        self.bytepix = Some(bytepix);
        self
    }

    pub fn with_tilesize(mut self, tilesize: usize) -> Self {
        self.tilesize = Some(tilesize);
        self
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn with_smooth(mut self, smooth: bool) -> Self {
        self.smooth = Some(smooth);
        self
    }

    pub fn with_dims(mut self, nx: usize, ny: usize) -> Self {
        self.nx = Some(nx);
        self.ny = Some(ny);
        self
    }

    pub fn with_itemsize(mut self, itemsize: usize) -> Self {
        self.itemsize = Some(itemsize);
        self
    }

    pub fn with_quantize_level(mut self, level: f64) -> Self {
        self.quantize_level = Some(level);
        self
    }

    pub fn with_dither_seed(mut self, seed: u32) -> Self {
        self.dither_seed = Some(seed);
        self
    }

    /// Validate the bag for its algorithm.
    ///
    /// Required keys that are absent fail with `MissingSetting`; values out of
    /// domain and keys the algorithm does not accept fail with
    /// `InvalidSetting`.
    pub fn resolve(&self) -> Result<CodecSettings> {
        let alg = self.algorithm;
        let accepted: &[&str] = match alg {
            Algorithm::NoCompress | Algorithm::Gzip1 => &[],
            Algorithm::Gzip2 => &["itemsize"],
            Algorithm::Rice1 => &["blocksize", "bytepix", "tilesize"],
            Algorithm::Plio1 => &["tilesize"],
            Algorithm::Hcompress1 => &["bytepix", "scale", "smooth", "nx", "ny"],
        };
        for (key, present) in self.codec_keys() {
            if present && !accepted.contains(&key) {
                return Err(CodecError::invalid_setting(
                    key,
                    format!("not a parameter of {alg}"),
                ));
            }
        }

        let settings = match alg {
            Algorithm::NoCompress => CodecSettings::NoCompress,
            Algorithm::Gzip1 => CodecSettings::Gzip1,
            Algorithm::Gzip2 => {
                let itemsize = require(alg, "itemsize", self.itemsize)?;
                if !matches!(itemsize, 1 | 2 | 4 | 8) {
                    return Err(CodecError::invalid_setting(
                        "itemsize",
                        format!("{itemsize} is not one of 1, 2, 4, 8"),
                    ));
                }
                CodecSettings::Gzip2 { itemsize }
            }
            Algorithm::Rice1 => {
                let blocksize = require(alg, "blocksize", self.blocksize)?;
                let bytepix = require(alg, "bytepix", self.bytepix)?;
                let tilesize = require(alg, "tilesize", self.tilesize)?;
                if blocksize == 0 {
                    return Err(CodecError::invalid_setting("blocksize", "must be positive"));
                }
                if !matches!(bytepix, 1 | 2 | 4) {
                    return Err(CodecError::invalid_setting(
                        "bytepix",
                        format!("{bytepix} is not one of 1, 2, 4"),
                    ));
                }
                check_tilesize(tilesize)?;
                CodecSettings::Rice1 {
                    blocksize,
                    bytepix,
                    tilesize,
                }
            }
            Algorithm::Plio1 => {
                let tilesize = require(alg, "tilesize", self.tilesize)?;
                check_tilesize(tilesize)?;
                CodecSettings::Plio1 { tilesize }
            }
            Algorithm::Hcompress1 => {
                let bytepix = require(alg, "bytepix", self.bytepix)?;
                let scale = require(alg, "scale", self.scale)?;
                let smooth = require(alg, "smooth", self.smooth)?;
                let nx = require(alg, "nx", self.nx)?;
                let ny = require(alg, "ny", self.ny)?;
                if !matches!(bytepix, 4 | 8) {
                    return Err(CodecError::invalid_setting(
                        "bytepix",
                        format!("{bytepix} is not one of 4, 8"),
                    ));
                }
                if nx == 0 || ny == 0 {
                    return Err(CodecError::InvalidTileShape(format!(
                        "HCOMPRESS tile {nx}x{ny} has a zero extent"
                    )));
                }
                CodecSettings::Hcompress1 {
                    bytepix,
                    scale: digitization_scale(scale)?,
                    smooth,
                    nx,
                    ny,
                }
            }
        };
        Ok(settings)
    }

    /// Check array-level parameters that the codec never sees.
    pub fn check_quantization(&self) -> Result<()> {
        if let Some(level) = self.quantize_level {
            if !level.is_finite() {
                return Err(CodecError::invalid_setting(
                    "quantize_level",
                    format!("{level} is not finite"),
                ));
            }
        }
        if let Some(seed) = self.dither_seed {
            if seed == 0 || seed as usize > N_RANDOM {
                return Err(CodecError::invalid_setting(
                    "dither_seed",
                    format!("{seed} is outside 1..={N_RANDOM}"),
                ));
            }
        }
        Ok(())
    }

    /// Check geometry keys supplied by the caller against the nominal tile.
    ///
    /// `itemsize` is the width of the samples handed to the codec.
    pub fn check_nominal_geometry(&self, tile_shape: &[usize], itemsize: usize) -> Result<()> {
        let nominal = self.tile_settings(tile_shape, itemsize)?;
        let pairs = [
            ("tilesize", self.tilesize, nominal.tilesize),
            ("nx", self.nx, nominal.nx),
            ("ny", self.ny, nominal.ny),
            ("itemsize", self.itemsize, nominal.itemsize),
        ];
        for (key, given, derived) in pairs {
            if let (Some(given), Some(derived)) = (given, derived) {
                if given != derived {
                    return Err(CodecError::invalid_setting(
                        key,
                        format!("{given} disagrees with tile geometry ({derived})"),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Settings for one tile, with geometry keys taken from its effective
    /// shape and sample width.
    pub fn tile_settings(&self, tile_shape: &[usize], itemsize: usize) -> Result<CompressionSettings> {
        let mut tile = self.clone();
        let len: usize = tile_shape.iter().product();
        match self.algorithm {
            Algorithm::Rice1 | Algorithm::Plio1 => tile.tilesize = Some(len),
            Algorithm::Gzip2 => tile.itemsize = Some(itemsize),
            Algorithm::Hcompress1 => {
                let (nx, ny) = hcompress_dims(tile_shape)?;
                tile.nx = Some(nx);
                tile.ny = Some(ny);
            }
            Algorithm::NoCompress | Algorithm::Gzip1 => {}
        }
        Ok(tile)
    }

    fn codec_keys(&self) -> [(&'static str, bool); 8] {
        [
            ("blocksize", self.blocksize.is_some()),
            ("bytepix", self.bytepix.is_some()),
            ("tilesize", self.tilesize.is_some()),
            ("scale", self.scale.is_some()),
            ("smooth", self.smooth.is_some()),
            ("nx", self.nx.is_some()),
            ("ny", self.ny.is_some()),
            ("itemsize", self.itemsize.is_some()),
        ]
    }

    /// Geometry keys that the assembler derives per tile.
    pub fn geometry_keys() -> &'static [&'static str] {
        &GEOMETRY_KEYS
    }
}

/// The two tile axes HCOMPRESS codes, as `(nx, ny)` = (slow, fast) extents.
///
/// The tile must have exactly two axes with extent greater than one. Axes of
/// extent one are squeezed away. When a boundary tile truncates one of the
/// two axes to a single sample, the positions of the nominal axes are used.
pub fn hcompress_axes(nominal_tile: &[usize]) -> Result<(usize, usize)> {
    let axes: Vec<usize> = nominal_tile
        .iter()
        .enumerate()
        .filter(|(_, &extent)| extent > 1)
        .map(|(axis, _)| axis)
        .collect();
    match axes.as_slice() {
        &[slow, fast] => Ok((slow, fast)),
        _ => Err(CodecError::InvalidTileShape(format!(
            "HCOMPRESS needs exactly two tile axes longer than one, got {nominal_tile:?}"
        ))),
    }
}

fn hcompress_dims(tile_shape: &[usize]) -> Result<(usize, usize)> {
    // Effective boundary tiles may have collapsed to extent one on a coded
    // axis; fall back to the last two axes in that case.
    match hcompress_axes(tile_shape) {
        Ok((slow, fast)) => Ok((tile_shape[slow], tile_shape[fast])),
        Err(err) => {
            let n = tile_shape.len();
            let long_axes = tile_shape.iter().filter(|&&e| e > 1).count();
            if n >= 2 && long_axes < 2 {
                let slow = tile_shape[..n - 1].iter().product();
                Ok((slow, tile_shape[n - 1]))
            } else {
                Err(err)
            }
        }
    }
}

fn require<T: Copy>(algorithm: Algorithm, key: &'static str, value: Option<T>) -> Result<T> {
    value.ok_or(CodecError::MissingSetting { algorithm, key })
}

fn check_tilesize(tilesize: usize) -> Result<()> {
    if tilesize == 0 {
        return Err(CodecError::invalid_setting("tilesize", "must be positive"));
    }
    Ok(())
}

/// HCOMPRESS integer digitization scale; non-positive means lossless.
fn digitization_scale(scale: f64) -> Result<i32> {
    if !scale.is_finite() {
        return Err(CodecError::invalid_setting(
            "scale",
            format!("{scale} is not finite"),
        ));
    }
    if scale <= 0.0 {
        return Ok(0);
    }
    let rounded = scale.round();
    if rounded > i32::MAX as f64 {
        return Err(CodecError::invalid_setting(
            "scale",
            format!("{scale} exceeds the 32-bit range"),
        ));
    }
    Ok(rounded as i32)
}
