//! Tile codecs for FITS tiled image compression.
//!
//! Every codec here produces streams that the reference FITS library reads
//! and reads the streams it writes. [`codec_for`] maps validated settings to
//! a codec; [`BundledCodecs`] plugs that registry into the core
//! [`TileAssembler`].

pub mod bits;
mod gzip;
mod hcompress;
mod nocompress;
mod plio;
mod rice;

pub use gzip::GzipCodec;
pub use hcompress::HcompressCodec;
pub use nocompress::NoCompressCodec;
pub use plio::PlioCodec;
pub use rice::RiceCodec;

use fitstile_core::{
    Array, ByteOrder, Codec, CodecProvider, CodecSettings, CompressedTile, CompressionSettings,
    DType, Result, TileAssembler,
};
use tracing::trace;

/// Build the codec for validated `settings`.
pub fn codec_for(settings: &CodecSettings) -> Result<Box<dyn Codec>> {
    let codec: Box<dyn Codec> = match *settings {
        CodecSettings::NoCompress => Box::new(NoCompressCodec),
        CodecSettings::Gzip1 => Box::new(GzipCodec::gzip1()),
        CodecSettings::Gzip2 { itemsize } => Box::new(GzipCodec::gzip2(itemsize)?),
        CodecSettings::Rice1 {
            blocksize,
            bytepix,
            tilesize,
        } => Box::new(RiceCodec::new(blocksize, bytepix, tilesize)?),
        CodecSettings::Plio1 { tilesize } => Box::new(PlioCodec::new(tilesize)),
        CodecSettings::Hcompress1 {
            bytepix,
            scale,
            smooth,
            nx,
            ny,
        } => Box::new(HcompressCodec::new(bytepix, scale, smooth, nx, ny)?),
    };
    trace!(codec = codec.name(), ?settings, "codec resolved");
    Ok(codec)
}

/// Registry of every codec in this crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct BundledCodecs;

impl CodecProvider for BundledCodecs {
    fn codec(&self, settings: &CodecSettings) -> Result<Box<dyn Codec>> {
        codec_for(settings)
    }
}

/// Compress one flattened tile.
///
/// `samples` must already be in the codec's layout (see
/// [`Codec::sample_layout`]) and `settings` must carry every key the
/// algorithm requires, tile geometry included.
pub fn encode_tile(samples: &[u8], settings: &CompressionSettings) -> Result<Vec<u8>> {
    codec_for(&settings.resolve()?)?.encode(samples)
}

/// Decompress one tile into the codec's sample layout.
pub fn decode_tile(compressed: &[u8], settings: &CompressionSettings) -> Result<Vec<u8>> {
    codec_for(&settings.resolve()?)?.decode(compressed)
}

/// Compress a whole array, one entry per tile in tile-table order.
pub fn encode_array(
    array: &Array,
    tile_shape: &[usize],
    settings: &CompressionSettings,
) -> Result<Vec<CompressedTile>> {
    TileAssembler::new(BundledCodecs).compress_array(array, tile_shape, settings)
}

/// Reassemble an array from its compressed tiles.
pub fn decode_array(
    tiles: &[CompressedTile],
    settings: &CompressionSettings,
    array_shape: &[usize],
    tile_shape: &[usize],
    dtype: DType,
    byte_order: ByteOrder,
) -> Result<Array> {
    TileAssembler::new(BundledCodecs).decompress_array(
        tiles,
        settings,
        array_shape,
        tile_shape,
        dtype,
        byte_order,
    )
}
