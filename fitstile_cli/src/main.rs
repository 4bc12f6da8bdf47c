use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use fitstile_codecs::{decode_array, encode_array};
use fitstile_core::format::{DEFAULT_RICE_BLOCKSIZE, DEFAULT_RICE_BYTEPIX};
use fitstile_core::{
    Algorithm, Array, ByteOrder, CompressedTile, CompressionSettings, DType, TileGrid,
    TileQuantization,
};

/// Quantization level used for float arrays when none is given.
const DEFAULT_QUANTIZE_LEVEL: f64 = 4.0;

const MANIFEST_NAME: &str = "manifest.json";

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "fitstile",
    about = "Tile, compress and reassemble raw arrays with FITS tiled image codecs",
    version
)]
struct Cli {
    /// Log tile-level progress (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the tile grid and per-tile sizes of a compressed directory
    Inspect {
        /// Directory written by `compress`
        dir: PathBuf,
        /// Print one line per tile
        #[arg(long)]
        tiles: bool,
    },
    /// Compress a raw array file into one file per tile plus a manifest
    Compress {
        /// Raw sample file, row-major
        input: PathBuf,
        /// Output directory
        output: PathBuf,
        #[command(flatten)]
        array: ArrayArgs,
        #[command(flatten)]
        codec: CodecArgs,
    },
    /// Reassemble a raw array file from a compressed directory
    Decompress {
        /// Directory written by `compress`
        dir: PathBuf,
        /// Destination raw sample file
        output: PathBuf,
        /// Byte order of the written samples (defaults to the original)
        #[arg(long)]
        byte_order: Option<ByteOrder>,
    },
    /// Round-trip an array in memory and report ratio, error and throughput
    Bench {
        /// Raw sample file, row-major
        input: PathBuf,
        #[command(flatten)]
        array: ArrayArgs,
        #[command(flatten)]
        codec: CodecArgs,
        /// Number of round trips to time
        #[arg(short = 'n', long, default_value_t = 5)]
        iterations: usize,
    },
}

/// Layout of the raw input file.
#[derive(Args)]
struct ArrayArgs {
    /// Array extents, slowest axis first (e.g. 2048,2048)
    #[arg(long, value_delimiter = ',', required = true)]
    shape: Vec<usize>,
    /// Sample type: u8 i8 u16 i16 u32 i32 u64 i64 f32 f64
    #[arg(long)]
    dtype: DType,
    /// Byte order of the input samples: big | little | native
    #[arg(long, default_value = "big")]
    byte_order: ByteOrder,
    /// Tile extents (defaults to one row per tile)
    #[arg(long, value_delimiter = ',')]
    tile: Option<Vec<usize>>,
}

/// Compression settings, from a JSON file or from flags.
#[derive(Args)]
struct CodecArgs {
    /// JSON settings file; flags below override its keys
    #[arg(long)]
    settings: Option<PathBuf>,
    /// GZIP_1 | GZIP_2 | RICE_1 | PLIO_1 | HCOMPRESS_1 | NOCOMPRESS
    #[arg(short, long)]
    algorithm: Option<Algorithm>,
    /// RICE samples per coding block
    #[arg(long)]
    blocksize: Option<usize>,
    /// Sample width seen by RICE or HCOMPRESS
    #[arg(long)]
    bytepix: Option<usize>,
    /// HCOMPRESS digitization scale (0 = lossless)
    #[arg(long)]
    scale: Option<f64>,
    /// HCOMPRESS decode-time smoothing
    #[arg(long)]
    smooth: bool,
    /// Float quantization level (0 = lossless, negative = fixed step)
    #[arg(short, long, allow_negative_numbers = true)]
    quantize_level: Option<f64>,
    /// Subtractive dithering seed (1..=10000)
    #[arg(long)]
    dither_seed: Option<u32>,
}

/// Everything needed to reassemble a compressed directory.
#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    shape: Vec<usize>,
    tile_shape: Vec<usize>,
    dtype: DType,
    byte_order: ByteOrder,
    settings: CompressionSettings,
    tiles: Vec<TileEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TileEntry {
    file: String,
    bytes: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    quantization: Option<TileQuantization>,
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn init_logging(verbose: bool) {
    let default = if verbose {
        "fitstile=debug,fitstile_core=debug,fitstile_codecs=debug"
    } else {
        "warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Binary-prefixed size for reports, e.g. `1.50 KB`.
fn human_bytes(n: u64) -> String {
    const SCALED: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if n < 1024 {
        return format!("{n} B");
    }
    let mut value = n as f64 / 1024.0;
    let mut unit = SCALED[0];
    for &next in &SCALED[1..] {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = next;
    }
    format!("{value:.2} {unit}")
}

impl ArrayArgs {
    fn tile_shape(&self) -> Vec<usize> {
        match &self.tile {
            Some(tile) => tile.clone(),
            None => {
                let mut tile = vec![1; self.shape.len()];
                if let (Some(last), Some(extent)) = (tile.last_mut(), self.shape.last()) {
                    *last = *extent;
                }
                tile
            }
        }
    }

    fn load(&self, input: &Path) -> anyhow::Result<Array> {
        let data = fs::read(input).with_context(|| format!("reading input file {:?}", input))?;
        Array::new(self.shape.clone(), self.dtype, self.byte_order, data)
            .with_context(|| format!("interpreting {:?} as {:?} {}", input, self.shape, self.dtype))
    }
}

impl CodecArgs {
    /// Merge the settings file, the flags and per-algorithm defaults.
    fn resolve(&self, dtype: DType) -> anyhow::Result<CompressionSettings> {
        let mut settings = match &self.settings {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("reading settings file {:?}", path))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("parsing settings file {:?}", path))?
            }
            None => CompressionSettings::new(self.algorithm.unwrap_or(Algorithm::Rice1)),
        };
        if let Some(algorithm) = self.algorithm {
            settings.algorithm = algorithm;
        }
        settings.blocksize = self.blocksize.or(settings.blocksize);
        settings.bytepix = self.bytepix.or(settings.bytepix);
        settings.scale = self.scale.or(settings.scale);
        if self.smooth {
            settings.smooth = Some(true);
        }
        settings.quantize_level = self.quantize_level.or(settings.quantize_level);
        settings.dither_seed = self.dither_seed.or(settings.dither_seed);

        let wide = dtype.itemsize() == 8 && !dtype.is_float();
        match settings.algorithm {
            Algorithm::Rice1 => {
                settings.blocksize.get_or_insert(DEFAULT_RICE_BLOCKSIZE);
                settings.bytepix.get_or_insert(if dtype.is_float() {
                    DEFAULT_RICE_BYTEPIX
                } else {
                    dtype.itemsize().min(DEFAULT_RICE_BYTEPIX)
                });
            }
            Algorithm::Hcompress1 => {
                settings.bytepix.get_or_insert(if wide { 8 } else { 4 });
                settings.scale.get_or_insert(0.0);
                settings.smooth.get_or_insert(false);
            }
            Algorithm::NoCompress | Algorithm::Gzip1 | Algorithm::Gzip2 | Algorithm::Plio1 => {}
        }
        if dtype.is_float() {
            settings.quantize_level.get_or_insert(DEFAULT_QUANTIZE_LEVEL);
        }
        debug!(?settings, "compression settings");
        Ok(settings)
    }
}

fn tile_file_name(index: usize) -> String {
    format!("tile_{index:06}.bin")
}

fn read_manifest(dir: &Path) -> anyhow::Result<Manifest> {
    let path = dir.join(MANIFEST_NAME);
    let text =
        fs::read_to_string(&path).with_context(|| format!("reading manifest {:?}", path))?;
    serde_json::from_str(&text).with_context(|| format!("parsing manifest {:?}", path))
}

fn max_error(original: &Array, restored: &Array) -> f64 {
    original
        .to_floats()
        .iter()
        .zip(restored.to_floats())
        .filter(|(a, b)| !(a.is_nan() && b.is_nan()))
        .map(|(a, b)| (a - b).abs())
        .fold(0.0, f64::max)
}

// ── Subcommand implementations ─────────────────────────────────────────────

fn run_compress(
    input: PathBuf,
    output: PathBuf,
    array_args: ArrayArgs,
    codec_args: CodecArgs,
) -> anyhow::Result<()> {
    let array = array_args.load(&input)?;
    let tile_shape = array_args.tile_shape();
    let settings = codec_args.resolve(array.dtype())?;

    let t0 = Instant::now();
    let tiles = encode_array(&array, &tile_shape, &settings)
        .with_context(|| format!("compressing {:?} with {}", input, settings.algorithm))?;
    let elapsed = t0.elapsed();

    fs::create_dir_all(&output)
        .with_context(|| format!("creating output directory {:?}", output))?;
    let mut entries = Vec::with_capacity(tiles.len());
    for (index, tile) in tiles.iter().enumerate() {
        let file = tile_file_name(index);
        fs::write(output.join(&file), &tile.data)
            .with_context(|| format!("writing tile {} to {:?}", index, output))?;
        entries.push(TileEntry {
            file,
            bytes: tile.len(),
            quantization: tile.quantization,
        });
    }

    let manifest = Manifest {
        shape: array.shape().to_vec(),
        tile_shape,
        dtype: array.dtype(),
        byte_order: array.byte_order(),
        settings,
        tiles: entries,
    };
    let manifest_path = output.join(MANIFEST_NAME);
    fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)
        .with_context(|| format!("writing manifest {:?}", manifest_path))?;
    info!(tiles = tiles.len(), dir = ?output, "compressed array written");

    let raw_size = array.data().len() as u64;
    let compressed_size: u64 = tiles.iter().map(|t| t.len() as u64).sum();
    eprintln!("  algorithm   : {}", manifest.settings.algorithm);
    eprintln!("  shape       : {:?} {}", manifest.shape, manifest.dtype);
    eprintln!("  tile shape  : {:?}", manifest.tile_shape);
    eprintln!("  tiles       : {}", tiles.len());
    eprintln!("  raw size    : {}", human_bytes(raw_size));
    eprintln!("  compressed  : {}", human_bytes(compressed_size));
    eprintln!(
        "  ratio       : {:.2}x",
        raw_size as f64 / compressed_size.max(1) as f64
    );
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

fn run_decompress(dir: PathBuf, output: PathBuf, byte_order: Option<ByteOrder>) -> anyhow::Result<()> {
    let manifest = read_manifest(&dir)?;
    let tiles = manifest
        .tiles
        .iter()
        .map(|entry| {
            let path = dir.join(&entry.file);
            let data = fs::read(&path).with_context(|| format!("reading tile {:?}", path))?;
            Ok::<_, anyhow::Error>(CompressedTile {
                data,
                quantization: entry.quantization,
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let t0 = Instant::now();
    let array = decode_array(
        &tiles,
        &manifest.settings,
        &manifest.shape,
        &manifest.tile_shape,
        manifest.dtype,
        byte_order.unwrap_or(manifest.byte_order),
    )
    .with_context(|| format!("decompressing {:?}", dir))?;
    let elapsed = t0.elapsed();

    fs::write(&output, array.data())
        .with_context(|| format!("writing output file {:?}", output))?;

    let raw_size = array.data().len() as u64;
    eprintln!("  tiles       : {}", tiles.len());
    eprintln!("  raw size    : {}", human_bytes(raw_size));
    eprintln!(
        "  throughput  : {}/s",
        human_bytes((raw_size as f64 / elapsed.as_secs_f64()) as u64)
    );
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

fn run_inspect(dir: PathBuf, show_tiles: bool) -> anyhow::Result<()> {
    let manifest = read_manifest(&dir)?;
    let grid = TileGrid::new(&manifest.shape, &manifest.tile_shape)
        .with_context(|| format!("tile grid of {:?}", dir))?;

    let raw_size = (manifest.shape.iter().product::<usize>() * manifest.dtype.itemsize()) as u64;
    let compressed_size: u64 = manifest.tiles.iter().map(|t| t.bytes as u64).sum();

    println!("=== Tiled array: {:?} ===", dir);
    println!();
    println!("  algorithm      : {}", manifest.settings.algorithm);
    println!("  shape          : {:?}", manifest.shape);
    println!("  dtype          : {} ({:?} endian)", manifest.dtype, manifest.byte_order);
    println!("  tile shape     : {:?}", manifest.tile_shape);
    println!("  tile grid      : {:?}", grid.grid_shape());
    println!("  tile count     : {}", grid.tile_count());
    println!("  raw size       : {}", human_bytes(raw_size));
    println!("  compressed     : {}", human_bytes(compressed_size));
    println!(
        "  ratio          : {:.2}x",
        raw_size as f64 / compressed_size.max(1) as f64
    );
    if let Some(level) = manifest.settings.quantize_level {
        println!("  quantize level : {}", level);
    }

    if show_tiles {
        println!();
        println!(
            "  {:>8}  {:>16}  {:>16}  {:>12}  {:>14}",
            "tile", "offset", "shape", "compressed", "scale"
        );
        println!("  {}", "-".repeat(74));
        for (tile, entry) in grid.tiles().zip(&manifest.tiles) {
            let scale = entry
                .quantization
                .map(|q| format!("{:.6e}", q.scale))
                .unwrap_or_else(|| "-".into());
            println!(
                "  {:>8}  {:>16}  {:>16}  {:>12}  {:>14}",
                tile.index,
                format!("{:?}", tile.offset),
                format!("{:?}", tile.shape),
                human_bytes(entry.bytes as u64),
                scale
            );
        }
    }
    Ok(())
}

fn run_bench(
    input: PathBuf,
    array_args: ArrayArgs,
    codec_args: CodecArgs,
    iterations: usize,
) -> anyhow::Result<()> {
    if iterations == 0 {
        anyhow::bail!("iterations must be positive");
    }
    let array = array_args.load(&input)?;
    let tile_shape = array_args.tile_shape();
    let settings = codec_args.resolve(array.dtype())?;

    eprintln!(
        "benchmarking {} round trips of {:?} {} with {}...",
        iterations,
        array.shape(),
        array.dtype(),
        settings.algorithm
    );

    let mut encode_secs = Vec::with_capacity(iterations);
    let mut decode_secs = Vec::with_capacity(iterations);
    let mut last = None;
    for _ in 0..iterations {
        let t = Instant::now();
        let tiles = encode_array(&array, &tile_shape, &settings)?;
        encode_secs.push(t.elapsed().as_secs_f64());

        let t = Instant::now();
        let restored = decode_array(
            &tiles,
            &settings,
            array.shape(),
            &tile_shape,
            array.dtype(),
            array.byte_order(),
        )?;
        decode_secs.push(t.elapsed().as_secs_f64());
        last = Some((tiles, restored));
    }
    let Some((tiles, restored)) = last else {
        anyhow::bail!("no round trip completed");
    };

    encode_secs.sort_by(f64::total_cmp);
    decode_secs.sort_by(f64::total_cmp);
    let raw_size = array.data().len() as u64;
    let compressed_size: u64 = tiles.iter().map(|t| t.len() as u64).sum();
    let rate = |secs: f64| human_bytes((raw_size as f64 / secs.max(1e-9)) as u64);

    println!();
    println!("=== Tiled Round-Trip Benchmark ===");
    println!("  algorithm   : {}", settings.algorithm);
    println!("  tiles       : {}", tiles.len());
    println!("  raw size    : {}", human_bytes(raw_size));
    println!("  compressed  : {}", human_bytes(compressed_size));
    println!(
        "  ratio       : {:.2}x",
        raw_size as f64 / compressed_size.max(1) as f64
    );
    println!("  max error   : {}", max_error(&array, &restored));
    println!("  encode:");
    println!("    best   : {}/s", rate(encode_secs[0]));
    println!("    median : {}/s", rate(encode_secs[encode_secs.len() / 2]));
    println!("  decode:");
    println!("    best   : {}/s", rate(decode_secs[0]));
    println!("    median : {}/s", rate(decode_secs[decode_secs.len() / 2]));
    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match cli.command {
        Commands::Inspect { dir, tiles } => run_inspect(dir, tiles),
        Commands::Compress {
            input,
            output,
            array,
            codec,
        } => run_compress(input, output, array, codec),
        Commands::Decompress {
            dir,
            output,
            byte_order,
        } => run_decompress(dir, output, byte_order),
        Commands::Bench {
            input,
            array,
            codec,
            iterations,
        } => run_bench(input, array, codec, iterations),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn array_args(shape: &[usize], tile: Option<Vec<usize>>) -> ArrayArgs {
        ArrayArgs {
            shape: shape.to_vec(),
            dtype: DType::I16,
            byte_order: ByteOrder::Big,
            tile,
        }
    }

    fn codec_args(algorithm: Option<Algorithm>) -> CodecArgs {
        CodecArgs {
            settings: None,
            algorithm,
            blocksize: None,
            bytepix: None,
            scale: None,
            smooth: false,
            quantize_level: None,
            dither_seed: None,
        }
    }

    #[test]
    fn test_default_tile_is_one_row() {
        assert_eq!(array_args(&[4, 5, 6], None).tile_shape(), vec![1, 1, 6]);
        assert_eq!(array_args(&[4, 6], Some(vec![2, 3])).tile_shape(), vec![2, 3]);
    }

    #[test]
    fn test_rice_defaults_follow_dtype() {
        let s = codec_args(None).resolve(DType::I16).unwrap();
        assert_eq!(s.algorithm, Algorithm::Rice1);
        assert_eq!(s.blocksize, Some(DEFAULT_RICE_BLOCKSIZE));
        assert_eq!(s.bytepix, Some(2));
        assert_eq!(s.quantize_level, None);

        let s = codec_args(None).resolve(DType::F32).unwrap();
        assert_eq!(s.bytepix, Some(4));
        assert_eq!(s.quantize_level, Some(DEFAULT_QUANTIZE_LEVEL));
    }

    #[test]
    fn test_hcompress_defaults_and_overrides() {
        let mut args = codec_args(Some(Algorithm::Hcompress1));
        args.scale = Some(2.5);
        args.smooth = true;
        let s = args.resolve(DType::I64).unwrap();
        assert_eq!(s.bytepix, Some(8));
        assert_eq!(s.scale, Some(2.5));
        assert_eq!(s.smooth, Some(true));
        assert!(s.resolve().is_err(), "nx/ny are derived per tile");
    }

    #[test]
    fn test_manifest_json_roundtrip() {
        let manifest = Manifest {
            shape: vec![2, 3],
            tile_shape: vec![1, 3],
            dtype: DType::F32,
            byte_order: ByteOrder::Little,
            settings: CompressionSettings::new(Algorithm::Gzip2).with_quantize_level(4.0),
            tiles: vec![TileEntry {
                file: tile_file_name(0),
                bytes: 12,
                quantization: Some(TileQuantization {
                    scale: 0.5,
                    zero_point: 1.0,
                }),
            }],
        };
        let text = serde_json::to_string(&manifest).unwrap();
        assert!(text.contains("\"GZIP_2\""));
        let back: Manifest = serde_json::from_str(&text).unwrap();
        assert_eq!(back.settings, manifest.settings);
        assert_eq!(back.tiles[0].file, "tile_000000.bin");
        assert_eq!(back.tiles[0].quantization, manifest.tiles[0].quantization);
    }

    #[test]
    fn test_human_bytes_units() {
        assert_eq!(human_bytes(0), "0 B");
        assert_eq!(human_bytes(1023), "1023 B");
        assert_eq!(human_bytes(1536), "1.50 KB");
        assert_eq!(human_bytes(3 << 30), "3.00 GB");
        assert_eq!(human_bytes(5 << 50), "5120.00 TB");
    }
}
