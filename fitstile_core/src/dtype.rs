use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Order of the bytes inside one multi-byte sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    Big,
    Little,
}

impl ByteOrder {
    /// Byte order of the host.
    pub const NATIVE: ByteOrder = if cfg!(target_endian = "big") {
        ByteOrder::Big
    } else {
        ByteOrder::Little
    };
}

impl FromStr for ByteOrder {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ">" | "big" | "be" => Ok(ByteOrder::Big),
            "<" | "little" | "le" => Ok(ByteOrder::Little),
            "=" | "native" => Ok(ByteOrder::NATIVE),
            other => Err(CodecError::invalid_setting(
                "byte_order",
                format!("unknown byte order '{other}'"),
            )),
        }
    }
}

/// Element type of an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
}

impl DType {
    /// Width of one sample in bytes.
    pub fn itemsize(self) -> usize {
        match self {
            DType::U8 | DType::I8 => 1,
            DType::U16 | DType::I16 => 2,
            DType::U32 | DType::I32 | DType::F32 => 4,
            DType::U64 | DType::I64 | DType::F64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            DType::I8 | DType::I16 | DType::I32 | DType::I64 | DType::F32 | DType::F64
        )
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_float() {
            'f'
        } else if self.is_signed() {
            'i'
        } else {
            'u'
        };
        write!(f, "{}{}", kind, self.itemsize())
    }
}

impl FromStr for DType {
    type Err = CodecError;

    /// Accepts numpy-style codes (`"i2"`, `"f8"`) and Rust names (`"i16"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "u1" | "u8" | "uint8" => Ok(DType::U8),
            "i1" | "i8" | "int8" => Ok(DType::I8),
            "u2" | "u16" | "uint16" => Ok(DType::U16),
            "i2" | "i16" | "int16" => Ok(DType::I16),
            "u4" | "u32" | "uint32" => Ok(DType::U32),
            "i4" | "i32" | "int32" => Ok(DType::I32),
            "u64" | "uint64" => Ok(DType::U64),
            "i64" | "int64" => Ok(DType::I64),
            "f4" | "f32" | "float32" => Ok(DType::F32),
            "f8" | "f64" | "float64" => Ok(DType::F64),
            other => Err(CodecError::invalid_setting(
                "dtype",
                format!("unknown dtype '{other}'"),
            )),
        }
    }
}

// ── Sample conversion ──────────────────────────────────────────────────────

/// Read one `width`-byte integer, sign-extending when `signed`.
#[inline]
pub fn read_int(bytes: &[u8], signed: bool, order: ByteOrder) -> i64 {
    let width = bytes.len();
    let mut raw = 0u64;
    match order {
        ByteOrder::Big => {
            for &b in bytes {
                raw = (raw << 8) | b as u64;
            }
        }
        ByteOrder::Little => {
            for &b in bytes.iter().rev() {
                raw = (raw << 8) | b as u64;
            }
        }
    }
    if signed && width < 8 {
        let shift = 64 - 8 * width as u32;
        ((raw << shift) as i64) >> shift
    } else {
        raw as i64
    }
}

/// Append the low `width` bytes of `value` in `order`.
#[inline]
pub fn write_int(value: i64, width: usize, order: ByteOrder, out: &mut Vec<u8>) {
    let le = value.to_le_bytes();
    match order {
        ByteOrder::Little => out.extend_from_slice(&le[..width]),
        ByteOrder::Big => out.extend(le[..width].iter().rev()),
    }
}

/// Decode integer samples of `dtype` to `i64`.
///
/// Unsigned 64-bit values above `i64::MAX` keep their bit pattern.
pub fn ints_from_bytes(bytes: &[u8], dtype: DType, order: ByteOrder) -> Vec<i64> {
    bytes
        .chunks_exact(dtype.itemsize())
        .map(|chunk| read_int(chunk, dtype.is_signed(), order))
        .collect()
}

/// Encode `i64` values as `dtype` samples, truncating to the dtype width.
pub fn ints_to_bytes(values: &[i64], dtype: DType, order: ByteOrder) -> Vec<u8> {
    let width = dtype.itemsize();
    let mut out = Vec::with_capacity(values.len() * width);
    for &v in values {
        write_int(v, width, order, &mut out);
    }
    out
}

/// Decode floating-point samples of `dtype` to `f64`.
pub fn floats_from_bytes(bytes: &[u8], dtype: DType, order: ByteOrder) -> Vec<f64> {
    let width = dtype.itemsize();
    bytes
        .chunks_exact(width)
        .map(|chunk| {
            let bits = read_int(chunk, false, order) as u64;
            if width == 4 {
                f32::from_bits(bits as u32) as f64
            } else {
                f64::from_bits(bits)
            }
        })
        .collect()
}

/// Encode `f64` values as `dtype` float samples.
pub fn floats_to_bytes(values: &[f64], dtype: DType, order: ByteOrder) -> Vec<u8> {
    let width = dtype.itemsize();
    let mut out = Vec::with_capacity(values.len() * width);
    for &v in values {
        let bits = if width == 4 {
            (v as f32).to_bits() as i64
        } else {
            v.to_bits() as i64
        };
        write_int(bits, width, order, &mut out);
    }
    out
}

/// Reverse the byte order of every `itemsize`-wide sample in place.
pub fn swap_bytes_in_place(bytes: &mut [u8], itemsize: usize) {
    if itemsize > 1 {
        for chunk in bytes.chunks_exact_mut(itemsize) {
            chunk.reverse();
        }
    }
}

/// Representable range of a signed integer `width` bytes wide.
pub fn signed_range(width: usize) -> (i64, i64) {
    if width >= 8 {
        (i64::MIN, i64::MAX)
    } else {
        let half = 1i64 << (8 * width - 1);
        (-half, half - 1)
    }
}
