pub mod array;
pub mod assembler;
pub mod codec;
pub mod dtype;
pub mod error;
pub mod format;
pub mod quantize;
pub mod settings;
pub mod tiler;

pub use array::Array;
pub use assembler::{CompressedTile, TileAssembler};
pub use codec::{Codec, CodecProvider, SampleLayout};
pub use dtype::{ByteOrder, DType};
pub use error::{CodecError, Result};
pub use format::Algorithm;
pub use quantize::{Quantizer, TileQuantization};
pub use settings::{CodecSettings, CompressionSettings};
pub use tiler::{Tile, TileGrid};
