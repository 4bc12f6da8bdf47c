use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::array::Array;
use crate::codec::CodecProvider;
use crate::dtype::{
    floats_from_bytes, floats_to_bytes, ints_from_bytes, read_int, signed_range,
    swap_bytes_in_place, write_int, ByteOrder, DType,
};
use crate::error::{CodecError, Result};
use crate::format::Algorithm;
use crate::quantize::{Quantizer, TileQuantization};
use crate::settings::{hcompress_axes, CompressionSettings};
use crate::tiler::{strides, Tile, TileGrid};

/// One encoded tile, as stored in a row of the container's tile table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressedTile {
    pub data: Vec<u8>,
    /// Present when the tile holds quantized floating-point samples.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantization: Option<TileQuantization>,
}

impl CompressedTile {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl From<Vec<u8>> for CompressedTile {
    fn from(data: Vec<u8>) -> Self {
        Self {
            data,
            quantization: None,
        }
    }
}

/// How samples of the array reach the codec.
#[derive(Debug, Clone, Copy)]
enum SamplePath {
    /// Integer samples, widened or narrowed to the codec's width.
    Integer,
    /// Floats quantized to 32-bit integers.
    Quantized(Quantizer),
    /// Floats passed as raw big-endian bytes to a byte-stream codec.
    RawFloat,
}

/// Everything decided about an array before any sample is touched.
#[derive(Debug, Clone)]
struct Plan {
    settings: CompressionSettings,
    path: SamplePath,
    dtype: DType,
    /// Width of the integers handed to the codec before layout conversion.
    sample_width: usize,
    codec_width: usize,
    codec_order: ByteOrder,
}

impl Plan {
    fn new<P: CodecProvider>(
        provider: &P,
        settings: &CompressionSettings,
        grid: &TileGrid,
        dtype: DType,
    ) -> Result<Self> {
        settings.check_quantization()?;
        let (path, settings) = if dtype.is_float() {
            let level = settings.quantize_level.ok_or(CodecError::MissingSetting {
                algorithm: settings.algorithm,
                key: "quantize_level",
            })?;
            if level == 0.0 {
                if settings.dither_seed.is_some() {
                    return Err(CodecError::invalid_setting(
                        "dither_seed",
                        "dithering requires a non-zero quantize_level",
                    ));
                }
                let settings = if settings.algorithm.is_byte_stream() {
                    settings.clone()
                } else {
                    debug!(
                        requested = %settings.algorithm,
                        "lossless float data, storing with GZIP_2"
                    );
                    CompressionSettings::new(Algorithm::Gzip2)
                };
                (SamplePath::RawFloat, settings)
            } else {
                let quantizer = Quantizer::new(level, settings.dither_seed)?;
                (SamplePath::Quantized(quantizer), settings.clone())
            }
        } else {
            (SamplePath::Integer, settings.clone())
        };

        let sample_width = match path {
            SamplePath::Quantized(_) => 4,
            SamplePath::Integer | SamplePath::RawFloat => dtype.itemsize(),
        };
        if settings.algorithm == Algorithm::Hcompress1 {
            hcompress_axes(grid.tile_shape())?;
        }
        settings.check_nominal_geometry(grid.tile_shape(), sample_width)?;
        let nominal = settings
            .tile_settings(grid.tile_shape(), sample_width)?
            .resolve()?;
        let layout = provider.codec(&nominal)?.sample_layout();

        Ok(Self {
            settings,
            path,
            dtype,
            sample_width,
            codec_width: layout.width.unwrap_or(sample_width),
            codec_order: layout.order,
        })
    }

    fn algorithm(&self) -> Algorithm {
        self.settings.algorithm
    }
}

/// Drives tiling, quantization and codec dispatch over a whole array.
///
/// Tiles are processed on the rayon pool. A failure aborts the operation,
/// reporting the failing tile with the lowest index, and nothing assembled so
/// far is returned.
pub struct TileAssembler<P> {
    provider: P,
}

impl<P: CodecProvider> TileAssembler<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Encode every tile of `array`, in tile-table order.
    pub fn compress_array(
        &self,
        array: &Array,
        tile_shape: &[usize],
        settings: &CompressionSettings,
    ) -> Result<Vec<CompressedTile>> {
        let grid = TileGrid::new(array.shape(), tile_shape)?;
        let plan = Plan::new(&self.provider, settings, &grid, array.dtype())?;
        debug!(
            algorithm = %plan.algorithm(),
            shape = ?array.shape(),
            tiles = grid.tile_count(),
            "compressing array"
        );

        let tiles: Vec<Tile> = grid.tiles().collect();
        let results: Vec<Result<CompressedTile>> = tiles
            .par_iter()
            .map(|tile| {
                self.encode_tile(&plan, array, tile)
                    .map_err(|err| err.in_tile(tile.index))
            })
            .collect();
        // in tile order, so the lowest failing index is reported
        let encoded = results.into_iter().collect::<Result<Vec<_>>>()?;

        let total: usize = encoded.iter().map(CompressedTile::len).sum();
        debug!(bytes = total, "array compressed");
        Ok(encoded)
    }

    /// Decode `tiles` into an array of `array_shape`, `dtype` and `byte_order`.
    pub fn decompress_array(
        &self,
        tiles: &[CompressedTile],
        settings: &CompressionSettings,
        array_shape: &[usize],
        tile_shape: &[usize],
        dtype: DType,
        byte_order: ByteOrder,
    ) -> Result<Array> {
        let grid = TileGrid::new(array_shape, tile_shape)?;
        if tiles.len() != grid.tile_count() {
            return Err(CodecError::InvalidTileShape(format!(
                "{} compressed tiles supplied for a grid of {}",
                tiles.len(),
                grid.tile_count()
            )));
        }
        let plan = Plan::new(&self.provider, settings, &grid, dtype)?;
        debug!(
            algorithm = %plan.algorithm(),
            shape = ?array_shape,
            tiles = grid.tile_count(),
            "decompressing array"
        );

        let mut out = Array::zeros(array_shape.to_vec(), dtype, byte_order);
        if out.is_empty() {
            return Ok(out);
        }
        let segments = tile_segments(out.data_mut(), &grid, dtype.itemsize());
        let layout: Vec<Tile> = grid.tiles().collect();
        let results: Vec<Result<()>> = layout
            .into_par_iter()
            .zip(segments.into_par_iter())
            .map(|(tile, segments)| {
                self.decode_tile_into(&plan, &tile, &tiles[tile.index], byte_order, segments)
                    .map_err(|err| err.in_tile(tile.index))
            })
            .collect();
        results.into_iter().collect::<Result<()>>()?;
        Ok(out)
    }

    fn encode_tile(&self, plan: &Plan, array: &Array, tile: &Tile) -> Result<CompressedTile> {
        let width = array.dtype().itemsize();
        let mut raw = Vec::with_capacity(tile.len() * width);
        for span in tile.row_spans(array.shape()) {
            raw.extend_from_slice(&array.data()[span.start * width..(span.start + span.len) * width]);
        }

        let mut quantization = None;
        let samples = match plan.path {
            SamplePath::Integer => {
                let values = ints_from_bytes(&raw, plan.dtype, array.byte_order());
                to_codec_bytes(&values, plan.sample_width, plan.codec_width, plan.codec_order)?
            }
            SamplePath::Quantized(quantizer) => {
                let values = floats_from_bytes(&raw, plan.dtype, array.byte_order());
                let row_len = tile.shape.last().copied().unwrap_or(0);
                let (ints, q) = quantizer.quantize(tile.index, &values, row_len)?;
                quantization = Some(q);
                let ints: Vec<i64> = ints.into_iter().map(i64::from).collect();
                to_codec_bytes(&ints, plan.sample_width, plan.codec_width, plan.codec_order)?
            }
            SamplePath::RawFloat => {
                if array.byte_order() != ByteOrder::Big {
                    swap_bytes_in_place(&mut raw, width);
                }
                raw
            }
        };

        let codec_settings = plan
            .settings
            .tile_settings(&tile.shape, plan.sample_width)?
            .resolve()?;
        let codec = self.provider.codec(&codec_settings)?;
        let data = codec.encode(&samples)?;
        trace!(tile = tile.index, raw = samples.len(), encoded = data.len(), "tile encoded");
        Ok(CompressedTile { data, quantization })
    }

    fn decode_tile_into(
        &self,
        plan: &Plan,
        tile: &Tile,
        compressed: &CompressedTile,
        byte_order: ByteOrder,
        segments: Vec<&mut [u8]>,
    ) -> Result<()> {
        let codec_settings = plan
            .settings
            .tile_settings(&tile.shape, plan.sample_width)?
            .resolve()?;
        let codec = self.provider.codec(&codec_settings)?;
        let width = match plan.path {
            SamplePath::RawFloat => plan.dtype.itemsize(),
            _ => plan.codec_width,
        };
        let decoded = codec.decode_bounded(&compressed.data, tile.len() * width)?;

        if decoded.len() != tile.len() * width {
            return Err(CodecError::decode(
                plan.algorithm(),
                format!(
                    "decoded {} bytes, expected {} samples of {} bytes",
                    decoded.len(),
                    tile.len(),
                    width
                ),
            ));
        }

        let bytes = match plan.path {
            SamplePath::Integer => {
                let values = from_codec_bytes(&decoded, plan.codec_width, plan.codec_order, plan.dtype);
                let mut out = Vec::with_capacity(values.len() * plan.dtype.itemsize());
                for v in values {
                    write_int(v, plan.dtype.itemsize(), byte_order, &mut out);
                }
                out
            }
            SamplePath::Quantized(quantizer) => {
                let q = compressed.quantization.ok_or_else(|| {
                    CodecError::InvalidQuantization(
                        "tile carries no quantization parameters".into(),
                    )
                })?;
                let ints: Vec<i32> = decoded
                    .chunks_exact(plan.codec_width)
                    .map(|c| read_int(c, true, plan.codec_order) as i32)
                    .collect();
                let values = quantizer.dequantize(tile.index, &ints, &q);
                floats_to_bytes(&values, plan.dtype, byte_order)
            }
            SamplePath::RawFloat => {
                let mut raw = decoded;
                if byte_order != ByteOrder::Big {
                    swap_bytes_in_place(&mut raw, width);
                }
                raw
            }
        };

        let mut pos = 0;
        for segment in segments {
            let n = segment.len();
            segment.copy_from_slice(&bytes[pos..pos + n]);
            pos += n;
        }
        trace!(tile = tile.index, encoded = compressed.len(), "tile decoded");
        Ok(())
    }
}

// ── Sample layout conversion ───────────────────────────────────────────────

/// Lay out `values` as `codec_width`-byte integers in `order`.
///
/// Narrowing is only allowed when the value fits the codec width's signed
/// range; otherwise the low bytes carry the bit pattern.
fn to_codec_bytes(
    values: &[i64],
    sample_width: usize,
    codec_width: usize,
    order: ByteOrder,
) -> Result<Vec<u8>> {
    let (min, max) = signed_range(codec_width);
    let narrowing = sample_width > codec_width;
    let mut out = Vec::with_capacity(values.len() * codec_width);
    for &value in values {
        if narrowing && (value < min || value > max) {
            return Err(CodecError::EncodingRange { value, min, max });
        }
        write_int(value, codec_width, order, &mut out);
    }
    Ok(out)
}

/// Read codec samples back, clamping to `dtype` when the codec is wider.
fn from_codec_bytes(bytes: &[u8], codec_width: usize, order: ByteOrder, dtype: DType) -> Vec<i64> {
    let width = dtype.itemsize();
    let clamp = if width < codec_width {
        Some(dtype_range(dtype))
    } else {
        None
    };
    bytes
        .chunks_exact(codec_width)
        .map(|chunk| {
            let v = read_int(chunk, true, order);
            match clamp {
                Some((lo, hi)) => v.clamp(lo, hi),
                None => v,
            }
        })
        .collect()
}

fn dtype_range(dtype: DType) -> (i64, i64) {
    let width = dtype.itemsize();
    if dtype.is_signed() {
        signed_range(width)
    } else if width >= 8 {
        (0, i64::MAX)
    } else {
        (0, (1i64 << (8 * width)) - 1)
    }
}

/// Split `data` into the row segments each tile owns, indexed by tile.
///
/// Segments of one tile come out in the tile's row-major order, so a decoded
/// tile can be copied across them sequentially.
fn tile_segments<'a>(data: &'a mut [u8], grid: &TileGrid, itemsize: usize) -> Vec<Vec<&'a mut [u8]>> {
    let shape = grid.array_shape();
    let tile_shape = grid.tile_shape();
    let ndim = shape.len();
    let grid_strides = strides(grid.grid_shape());
    let row_bytes = shape[ndim - 1] * itemsize;
    let piece_bytes = tile_shape[ndim - 1] * itemsize;

    let mut segments: Vec<Vec<&mut [u8]>> = (0..grid.tile_count()).map(|_| Vec::new()).collect();
    let mut coord = vec![0usize; ndim - 1];
    for row in data.chunks_mut(row_bytes) {
        let base: usize = (0..ndim - 1)
            .map(|d| (coord[d] / tile_shape[d]) * grid_strides[d])
            .sum();
        let mut rest = row;
        let mut k = 0;
        while !rest.is_empty() {
            let n = piece_bytes.min(rest.len());
            let (piece, tail) = std::mem::take(&mut rest).split_at_mut(n);
            segments[base + k].push(piece);
            rest = tail;
            k += 1;
        }

        for d in (0..ndim - 1).rev() {
            coord[d] += 1;
            if coord[d] < shape[d] {
                break;
            }
            coord[d] = 0;
        }
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segments_match_row_spans() {
        let shape = [5usize, 7];
        let grid = TileGrid::new(&shape, &[2, 3]).unwrap();
        let mut data: Vec<u8> = (0..35).collect();
        let expected: Vec<Vec<u8>> = grid
            .tiles()
            .map(|t| {
                t.row_spans(&shape)
                    .iter()
                    .flat_map(|s| (s.start..s.start + s.len).map(|v| v as u8))
                    .collect()
            })
            .collect();
        let segments = tile_segments(&mut data, &grid, 1);
        assert_eq!(segments.len(), grid.tile_count());
        for (segs, want) in segments.iter().zip(&expected) {
            let got: Vec<u8> = segs.iter().flat_map(|s| s.iter().copied()).collect();
            assert_eq!(&got, want);
        }
    }

    #[test]
    fn test_narrowing_checks_range() {
        let ok = to_codec_bytes(&[-128, 127], 4, 1, ByteOrder::Little).unwrap();
        assert_eq!(ok, vec![0x80, 0x7F]);
        let err = to_codec_bytes(&[128], 4, 1, ByteOrder::Little).unwrap_err();
        assert_eq!(
            err,
            CodecError::EncodingRange {
                value: 128,
                min: -128,
                max: 127
            }
        );
    }

    #[test]
    fn test_same_width_keeps_bit_pattern() {
        // u16 65535 through a 2-byte codec and back
        let bytes = to_codec_bytes(&[65535], 2, 2, ByteOrder::Big).unwrap();
        assert_eq!(bytes, vec![0xFF, 0xFF]);
        let back = from_codec_bytes(&bytes, 2, ByteOrder::Big, DType::U16);
        let mut out = Vec::new();
        write_int(back[0], 2, ByteOrder::Big, &mut out);
        assert_eq!(out, vec![0xFF, 0xFF]);
    }

    #[test]
    fn test_widening_decode_clamps_to_dtype() {
        let bytes = to_codec_bytes(&[256, -3], 4, 4, ByteOrder::Little).unwrap();
        assert_eq!(from_codec_bytes(&bytes, 4, ByteOrder::Little, DType::U8), vec![255, 0]);
        assert_eq!(from_codec_bytes(&bytes, 4, ByteOrder::Little, DType::I32), vec![256, -3]);
    }
}
