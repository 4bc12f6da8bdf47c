/// Integration test: whole arrays are split into tiles, every tile is coded
/// independently by the bundled codecs, and the array is reassembled from
/// the tile stream.
///
/// Test sequence, per algorithm:
///  1. Generate a deterministic pseudo-random array
///  2. Compress it with a tile shape that does and does not divide the array
///  3. Check one compressed tile decodes to exactly its sub-block
///  4. Decompress the whole tile list and compare with the original samples
use fitstile_codecs::{decode_array, decode_tile, encode_array, BundledCodecs};
use fitstile_core::{
    Algorithm, Array, ByteOrder, CodecError, CompressionSettings, DType, TileAssembler, TileGrid,
};

/// Generate `len` deterministic integers in `lo..lo + span` using a simple LCG.
fn pseudo_random_ints(len: usize, seed: u64, lo: i64, span: u64) -> Vec<i64> {
    let mut rng = seed;
    (0..len)
        .map(|_| {
            rng = rng
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            lo + ((rng >> 33) % span) as i64
        })
        .collect()
}

/// A smooth ramp with a little noise, like a sky background.
fn smooth_image(rows: usize, cols: usize, seed: u64) -> Vec<i64> {
    let noise = pseudo_random_ints(rows * cols, seed, -3, 7);
    (0..rows * cols)
        .map(|i| {
            let (r, c) = ((i / cols) as i64, (i % cols) as i64);
            1000 + 4 * r + 3 * c + noise[i]
        })
        .collect()
}

// ── helpers ───────────────────────────────────────────────────────────────

/// Samples of the sub-block covered by tile `index`, row-major.
fn tile_block(values: &[i64], shape: &[usize], tile_shape: &[usize], index: usize) -> Vec<i64> {
    let grid = TileGrid::new(shape, tile_shape).unwrap();
    let tile = grid.tile(index).unwrap();
    tile.row_spans(shape)
        .into_iter()
        .flat_map(|span| values[span.start..span.start + span.len].to_vec())
        .collect()
}

fn roundtrip(array: &Array, tile_shape: &[usize], settings: &CompressionSettings) -> Array {
    let tiles = encode_array(array, tile_shape, settings).unwrap();
    decode_array(
        &tiles,
        settings,
        array.shape(),
        tile_shape,
        array.dtype(),
        array.byte_order(),
    )
    .unwrap()
}

fn rice(bytepix: usize) -> CompressionSettings {
    CompressionSettings::new(Algorithm::Rice1)
        .with_blocksize(32)
        .with_bytepix(bytepix)
}

fn hcompress(scale: f64, smooth: bool) -> CompressionSettings {
    CompressionSettings::new(Algorithm::Hcompress1)
        .with_bytepix(4)
        .with_scale(scale)
        .with_smooth(smooth)
}

// ── tests ──────────────────────────────────────────────────────────────────

#[test]
fn test_rice_tiles_are_independent_little_endian_blocks() {
    let shape = [12, 12];
    let values = pseudo_random_ints(144, 7, -5000, 10_000);
    let array = Array::from_ints(shape.to_vec(), DType::I32, ByteOrder::Big, &values).unwrap();

    let tiles = encode_array(&array, &[4, 4], &rice(4)).unwrap();
    assert_eq!(tiles.len(), 9, "12x12 in 4x4 tiles is a 3x3 grid");
    assert!(tiles.iter().all(|t| t.quantization.is_none()));

    // tile 4 is the centre block; decode it on its own
    let tile_settings = rice(4).with_tilesize(16);
    let decoded = decode_tile(&tiles[4].data, &tile_settings).unwrap();
    let samples: Vec<i64> = decoded
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as i64)
        .collect();
    assert_eq!(samples, tile_block(&values, &shape, &[4, 4], 4));

    let restored = roundtrip(&array, &[4, 4], &rice(4));
    assert_eq!(restored, array, "RICE_1 must be lossless");
}

#[test]
fn test_plio_mask_roundtrip_native_tiles() {
    let shape = [12, 12];
    let values = pseudo_random_ints(144, 11, 0, 4)
        .into_iter()
        .map(|v| if v == 3 { 100 } else { v })
        .collect::<Vec<_>>();
    let array = Array::from_ints(shape.to_vec(), DType::I16, ByteOrder::Little, &values).unwrap();
    let settings = CompressionSettings::new(Algorithm::Plio1);

    let tiles = encode_array(&array, &[4, 4], &settings).unwrap();
    let decoded = decode_tile(&tiles[8].data, &settings.clone().with_tilesize(16)).unwrap();
    let samples: Vec<i64> = decoded
        .chunks_exact(4)
        .map(|c| i32::from_ne_bytes([c[0], c[1], c[2], c[3]]) as i64)
        .collect();
    assert_eq!(samples, tile_block(&values, &shape, &[4, 4], 8));

    assert_eq!(roundtrip(&array, &[4, 4], &settings), array);
}

#[test]
fn test_plio_rejects_negative_samples_with_tile_index() {
    let mut values = vec![1i64; 64];
    values[45] = -1;
    let array = Array::from_ints(vec![8, 8], DType::I32, ByteOrder::Big, &values).unwrap();
    let err = encode_array(&array, &[4, 4], &CompressionSettings::new(Algorithm::Plio1)).unwrap_err();
    // sample (5, 5) lives in tile (1, 1)
    assert!(matches!(err, CodecError::Tile { index: 3, .. }), "got {err:?}");
    assert!(matches!(err.kind(), CodecError::EncodingRange { value: -1, .. }));
}

#[test]
fn test_gzip2_tiles_hold_big_endian_shuffled_samples() {
    let shape = [12, 12];
    let values = pseudo_random_ints(144, 3, -300, 600);
    let array = Array::from_ints(shape.to_vec(), DType::I16, ByteOrder::Little, &values).unwrap();
    let settings = CompressionSettings::new(Algorithm::Gzip2);

    let tiles = encode_array(&array, &[4, 4], &settings).unwrap();
    let decoded = decode_tile(&tiles[0].data, &settings.clone().with_itemsize(2)).unwrap();
    let samples: Vec<i64> = decoded
        .chunks_exact(2)
        .map(|c| i16::from_be_bytes([c[0], c[1]]) as i64)
        .collect();
    assert_eq!(samples, tile_block(&values, &shape, &[4, 4], 0));

    assert_eq!(roundtrip(&array, &[4, 4], &settings), array);
}

#[test]
fn test_boundary_tiles_are_truncated_not_padded() {
    let shape = [10, 7];
    let values = pseudo_random_ints(70, 5, 0, 1 << 20);
    let array = Array::from_ints(shape.to_vec(), DType::I32, ByteOrder::Big, &values).unwrap();

    let grid = TileGrid::new(&shape, &[4, 4]).unwrap();
    assert_eq!(grid.grid_shape(), &[3, 2]);
    assert_eq!(grid.tile(5).unwrap().shape, vec![2, 3]);

    for settings in [
        rice(4),
        CompressionSettings::new(Algorithm::Gzip1),
        CompressionSettings::new(Algorithm::NoCompress),
        CompressionSettings::new(Algorithm::Plio1),
    ] {
        let restored = roundtrip(&array, &[4, 4], &settings);
        assert_eq!(restored, array, "{} boundary tiles", settings.algorithm);
    }
}

#[test]
fn test_row_tiles_match_default_tiling() {
    let shape = [5, 9];
    let values = pseudo_random_ints(45, 17, -100, 200);
    let array = Array::from_ints(shape.to_vec(), DType::I16, ByteOrder::Big, &values).unwrap();
    let tiles = encode_array(&array, &[1, 9], &rice(2)).unwrap();
    assert_eq!(tiles.len(), 5);
    assert_eq!(roundtrip(&array, &[1, 9], &rice(2)), array);
}

#[test]
fn test_hcompress_lossless_with_odd_boundary_tiles() {
    let shape = [13, 10];
    let values = pseudo_random_ints(130, 23, -20_000, 40_000);
    let array = Array::from_ints(shape.to_vec(), DType::I32, ByteOrder::Little, &values).unwrap();
    // last tile row is 1x4: HCOMPRESS still codes it as a 1-row image
    let restored = roundtrip(&array, &[4, 4], &hcompress(0.0, false));
    assert_eq!(restored, array);
}

#[test]
fn test_hcompress_cube_with_plane_tiles() {
    let shape = [3, 8, 8];
    let values = pseudo_random_ints(192, 29, 0, 5000);
    let array = Array::from_ints(shape.to_vec(), DType::I16, ByteOrder::Big, &values).unwrap();
    let restored = roundtrip(&array, &[1, 8, 8], &hcompress(0.0, false));
    assert_eq!(restored, array);
}

#[test]
fn test_hcompress_rejects_three_dimensional_tiles() {
    let array = Array::zeros(vec![4, 8, 8], DType::I32, ByteOrder::Big);
    let err = encode_array(&array, &[2, 4, 4], &hcompress(0.0, false)).unwrap_err();
    assert!(matches!(err, CodecError::InvalidTileShape(_)), "got {err:?}");
    assert!(err.is_configuration());
}

#[test]
fn test_hcompress_lossy_error_stays_near_scale() {
    let shape = [32, 32];
    let values = smooth_image(32, 32, 31);
    let array = Array::from_ints(shape.to_vec(), DType::I32, ByteOrder::Big, &values).unwrap();

    let lossless = encode_array(&array, &[16, 16], &hcompress(0.0, false)).unwrap();
    let lossy_settings = hcompress(8.0, false);
    let lossy = encode_array(&array, &[16, 16], &lossy_settings).unwrap();
    let size = |tiles: &[fitstile_core::CompressedTile]| tiles.iter().map(|t| t.len()).sum::<usize>();
    assert!(size(&lossy) < size(&lossless));

    let restored = decode_array(&lossy, &lossy_settings, &shape, &[16, 16], DType::I32, ByteOrder::Big)
        .unwrap()
        .to_ints();
    let errors: Vec<i64> = restored.iter().zip(&values).map(|(a, b)| (a - b).abs()).collect();
    let max = errors.iter().copied().max().unwrap();
    let mean = errors.iter().sum::<i64>() as f64 / errors.len() as f64;
    assert!(max <= 32, "max error {max} too large for scale 8");
    assert!(mean <= 8.0, "mean error {mean} too large for scale 8");
}

#[test]
fn test_quantized_floats_within_half_step() {
    let shape = [16, 16];
    let ints = pseudo_random_ints(256, 41, -100_000, 200_000);
    let mut values: Vec<f64> = ints.iter().map(|&v| v as f64 / 1000.0).collect();
    values[17] = f64::NAN;
    let array = Array::from_floats(shape.to_vec(), DType::F64, ByteOrder::Big, &values).unwrap();
    let settings = rice(4).with_quantize_level(-0.01);

    let tiles = encode_array(&array, &[8, 8], &settings).unwrap();
    for tile in &tiles {
        let q = tile.quantization.expect("quantized tiles carry their scale");
        assert_eq!(q.scale, 0.01);
    }

    let restored = decode_array(&tiles, &settings, &shape, &[8, 8], DType::F64, ByteOrder::Big)
        .unwrap()
        .to_floats();
    assert!(restored[17].is_nan(), "NaN must survive quantization");
    for (i, (a, b)) in restored.iter().zip(&values).enumerate() {
        if i == 17 {
            continue;
        }
        assert!((a - b).abs() <= 0.005 + 1e-9, "sample {i}: {a} vs {b}");
    }
}

#[test]
fn test_dithered_quantization_is_reproducible() {
    let shape = [8, 8];
    let values: Vec<f64> = pseudo_random_ints(64, 43, 0, 10_000)
        .into_iter()
        .map(|v| v as f64 * 0.37)
        .collect();
    let array = Array::from_floats(shape.to_vec(), DType::F32, ByteOrder::Little, &values).unwrap();
    let settings = rice(4).with_quantize_level(-0.5).with_dither_seed(1234);

    let first = encode_array(&array, &[4, 8], &settings).unwrap();
    let second = encode_array(&array, &[4, 8], &settings).unwrap();
    assert_eq!(first, second);

    let restored = decode_array(&first, &settings, &shape, &[4, 8], DType::F32, ByteOrder::Little)
        .unwrap()
        .to_floats();
    let original = array.to_floats();
    for (a, b) in restored.iter().zip(&original) {
        assert!((a - b).abs() <= 0.25 + 1e-3, "{a} vs {b}");
    }
}

#[test]
fn test_lossless_floats_fall_back_to_gzip2() {
    let shape = [6, 10];
    let values: Vec<f64> = pseudo_random_ints(60, 47, -1_000_000, 2_000_000)
        .into_iter()
        .map(|v| v as f64 / 7.0)
        .collect();
    let array = Array::from_floats(shape.to_vec(), DType::F32, ByteOrder::Little, &values).unwrap();
    let settings = rice(4).with_quantize_level(0.0);

    let tiles = encode_array(&array, &[3, 5], &settings).unwrap();
    assert!(tiles.iter().all(|t| t.data.starts_with(&[0x1f, 0x8b])));
    assert!(tiles.iter().all(|t| t.quantization.is_none()));

    let restored = roundtrip(&array, &[3, 5], &settings);
    assert_eq!(restored.data(), array.data(), "float fallback must be bit-exact");
}

#[test]
fn test_floats_require_quantize_level() {
    let array = Array::zeros(vec![4, 4], DType::F32, ByteOrder::Big);
    let err = encode_array(&array, &[4, 4], &rice(4)).unwrap_err();
    assert_eq!(
        err,
        CodecError::MissingSetting {
            algorithm: Algorithm::Rice1,
            key: "quantize_level"
        }
    );
}

#[test]
fn test_corrupt_tile_fails_whole_array() {
    let shape = [8, 8];
    let values = pseudo_random_ints(64, 53, -1000, 2000);
    let array = Array::from_ints(shape.to_vec(), DType::I32, ByteOrder::Big, &values).unwrap();
    let mut tiles = encode_array(&array, &[4, 4], &rice(4)).unwrap();
    tiles[2].data.truncate(3);

    let err = decode_array(&tiles, &rice(4), &shape, &[4, 4], DType::I32, ByteOrder::Big).unwrap_err();
    assert!(matches!(err, CodecError::Tile { index: 2, .. }), "got {err:?}");
    assert!(matches!(
        err.kind(),
        CodecError::Decode {
            algorithm: Algorithm::Rice1,
            ..
        }
    ));
    assert!(!err.is_configuration());
}

#[test]
fn test_tile_count_mismatch_is_rejected() {
    let array = Array::zeros(vec![8, 8], DType::I16, ByteOrder::Big);
    let tiles = encode_array(&array, &[4, 4], &rice(2)).unwrap();
    let err = decode_array(&tiles[..3], &rice(2), &[8, 8], &[4, 4], DType::I16, ByteOrder::Big)
        .unwrap_err();
    assert!(matches!(err, CodecError::InvalidTileShape(_)));
}

#[test]
fn test_decode_into_other_byte_order() {
    let shape = [6, 6];
    let values = pseudo_random_ints(36, 59, -30_000, 60_000);
    let array = Array::from_ints(shape.to_vec(), DType::I32, ByteOrder::Big, &values).unwrap();
    let tiles = encode_array(&array, &[3, 3], &rice(4)).unwrap();

    let restored = decode_array(&tiles, &rice(4), &shape, &[3, 3], DType::I32, ByteOrder::Little).unwrap();
    assert_eq!(restored.byte_order(), ByteOrder::Little);
    assert_eq!(restored, array.to_byte_order(ByteOrder::Little));
}

#[test]
fn test_narrow_codec_rejects_wide_samples() {
    let mut values = vec![0i64; 16];
    values[9] = 40_000;
    let array = Array::from_ints(vec![4, 4], DType::I32, ByteOrder::Big, &values).unwrap();
    let err = encode_array(&array, &[2, 2], &rice(2)).unwrap_err();
    assert!(matches!(err, CodecError::Tile { index: 2, .. }), "got {err:?}");
    assert!(matches!(err.kind(), CodecError::EncodingRange { value: 40_000, .. }));
}

#[test]
fn test_assembler_with_bundled_provider() {
    let array = Array::from_ints(vec![4, 6], DType::U8, ByteOrder::Big, &(0..24).collect::<Vec<i64>>()).unwrap();
    let assembler = TileAssembler::new(BundledCodecs);
    let settings = CompressionSettings::new(Algorithm::Gzip1);
    let tiles = assembler.compress_array(&array, &[2, 3], &settings).unwrap();
    let restored = assembler
        .decompress_array(&tiles, &settings, &[4, 6], &[2, 3], DType::U8, ByteOrder::Big)
        .unwrap();
    assert_eq!(restored, array);
}

#[test]
fn test_empty_array_has_no_tiles() {
    let array = Array::zeros(vec![0, 5], DType::I16, ByteOrder::Big);
    let tiles = encode_array(&array, &[2, 5], &rice(2)).unwrap();
    assert!(tiles.is_empty());
    let restored = decode_array(&tiles, &rice(2), &[0, 5], &[2, 5], DType::I16, ByteOrder::Big).unwrap();
    assert!(restored.is_empty());
}

#[test]
fn test_lossless_codecs_across_dtypes_and_byte_orders() {
    let shape = [10, 12];
    let tile_shape = [4, 5];
    let algorithms = [
        Algorithm::Gzip1,
        Algorithm::Gzip2,
        Algorithm::Rice1,
        Algorithm::Plio1,
        Algorithm::Hcompress1,
    ];
    let dtypes = [(DType::U8, 0i64, 256u64), (DType::I16, -3000, 6000), (DType::I32, -100_000, 200_000)];

    for (seed, &(dtype, lo, span)) in dtypes.iter().enumerate() {
        let signed_values = pseudo_random_ints(120, 61 + seed as u64, lo, span);
        for algorithm in algorithms {
            // PLIO only represents non-negative samples
            let values: Vec<i64> = if algorithm == Algorithm::Plio1 {
                signed_values.iter().map(|v| v.abs()).collect()
            } else {
                signed_values.clone()
            };
            let settings = match algorithm {
                Algorithm::Rice1 => rice(dtype.itemsize()),
                Algorithm::Hcompress1 => hcompress(0.0, false),
                other => CompressionSettings::new(other),
            };
            for order in [ByteOrder::Little, ByteOrder::Big] {
                let array = Array::from_ints(shape.to_vec(), dtype, order, &values).unwrap();
                let assembler = TileAssembler::new(BundledCodecs);
                let tiles = assembler.compress_array(&array, &tile_shape, &settings).unwrap();
                let restored = assembler
                    .decompress_array(&tiles, &settings, &shape, &tile_shape, dtype, order)
                    .unwrap();
                let case = format!("{algorithm} {dtype} {order:?}");
                assert_eq!(restored.byte_order(), order, "{case}");
                assert_eq!(restored.data(), array.data(), "{case}");
                assert_eq!(restored.to_ints(), values, "{case}");
            }
        }
    }
}

#[test]
fn test_lowest_failing_tile_is_reported() {
    let shape = [12, 12];
    let values = pseudo_random_ints(144, 67, -1000, 2000);
    let array = Array::from_ints(shape.to_vec(), DType::I32, ByteOrder::Big, &values).unwrap();
    let clean = encode_array(&array, &[4, 4], &rice(4)).unwrap();

    for _ in 0..8 {
        let mut tiles = clean.clone();
        tiles[7].data.truncate(2);
        tiles[2].data.truncate(2);
        let err = decode_array(&tiles, &rice(4), &shape, &[4, 4], DType::I32, ByteOrder::Big)
            .unwrap_err();
        assert!(matches!(err, CodecError::Tile { index: 2, .. }), "got {err:?}");
    }

    let mut masks = vec![0i64; 144];
    masks[5] = -1; // tile 1
    masks[140] = -2; // tile 8
    let array = Array::from_ints(shape.to_vec(), DType::I32, ByteOrder::Big, &masks).unwrap();
    let err = encode_array(&array, &[4, 4], &CompressionSettings::new(Algorithm::Plio1)).unwrap_err();
    assert!(matches!(err, CodecError::Tile { index: 1, .. }), "got {err:?}");
    assert!(matches!(err.kind(), CodecError::EncodingRange { value: -1, .. }));
}

#[test]
fn test_oversized_gzip_tile_is_rejected() {
    let array = Array::zeros(vec![4, 4], DType::I16, ByteOrder::Big);
    let settings = CompressionSettings::new(Algorithm::Gzip1);
    let mut tiles = encode_array(&array, &[2, 2], &settings).unwrap();
    // a tile whose stream inflates to far more than its 8 bytes
    let big = Array::zeros(vec![64, 64], DType::I16, ByteOrder::Big);
    tiles[3] = encode_array(&big, &[64, 64], &settings).unwrap().remove(0);
    let err = decode_array(&tiles, &settings, &[4, 4], &[2, 2], DType::I16, ByteOrder::Big)
        .unwrap_err();
    assert!(matches!(err, CodecError::Tile { index: 3, .. }), "got {err:?}");
    assert!(matches!(err.kind(), CodecError::Decode { .. }));
}
