use crate::dtype::{
    floats_from_bytes, floats_to_bytes, ints_from_bytes, ints_to_bytes, swap_bytes_in_place,
    ByteOrder, DType,
};
use crate::error::{CodecError, Result};

/// An n-dimensional numeric buffer with explicit dtype and byte order.
///
/// Samples are stored row-major: the last axis varies fastest.
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    shape: Vec<usize>,
    dtype: DType,
    byte_order: ByteOrder,
    data: Vec<u8>,
}

impl Array {
    /// Wrap raw sample bytes, checking the length against `shape` and `dtype`.
    pub fn new(shape: Vec<usize>, dtype: DType, byte_order: ByteOrder, data: Vec<u8>) -> Result<Self> {
        let expected = shape.iter().product::<usize>() * dtype.itemsize();
        if data.len() != expected {
            return Err(CodecError::invalid_setting(
                "data",
                format!(
                    "{} bytes do not match shape {:?} of {} ({} bytes)",
                    data.len(),
                    shape,
                    dtype,
                    expected
                ),
            ));
        }
        Ok(Self {
            shape,
            dtype,
            byte_order,
            data,
        })
    }

    pub fn zeros(shape: Vec<usize>, dtype: DType, byte_order: ByteOrder) -> Self {
        let len = shape.iter().product::<usize>() * dtype.itemsize();
        Self {
            shape,
            dtype,
            byte_order,
            data: vec![0u8; len],
        }
    }

    /// Build an integer array from `i64` values (truncated to the dtype width).
    pub fn from_ints(shape: Vec<usize>, dtype: DType, byte_order: ByteOrder, values: &[i64]) -> Result<Self> {
        if dtype.is_float() {
            return Err(CodecError::invalid_setting(
                "dtype",
                format!("{dtype} is not an integer dtype"),
            ));
        }
        Self::new(shape, dtype, byte_order, ints_to_bytes(values, dtype, byte_order))
    }

    /// Build a floating-point array from `f64` values.
    pub fn from_floats(shape: Vec<usize>, dtype: DType, byte_order: ByteOrder, values: &[f64]) -> Result<Self> {
        if !dtype.is_float() {
            return Err(CodecError::invalid_setting(
                "dtype",
                format!("{dtype} is not a floating-point dtype"),
            ));
        }
        Self::new(shape, dtype, byte_order, floats_to_bytes(values, dtype, byte_order))
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Samples as `i64`; floating-point samples are truncated toward zero.
    pub fn to_ints(&self) -> Vec<i64> {
        if self.dtype.is_float() {
            self.to_floats().into_iter().map(|v| v as i64).collect()
        } else {
            ints_from_bytes(&self.data, self.dtype, self.byte_order)
        }
    }

    /// Samples as `f64`.
    pub fn to_floats(&self) -> Vec<f64> {
        if self.dtype.is_float() {
            floats_from_bytes(&self.data, self.dtype, self.byte_order)
        } else {
            self.to_ints().into_iter().map(|v| v as f64).collect()
        }
    }

    /// Copy of this array with samples stored in `order`.
    pub fn to_byte_order(&self, order: ByteOrder) -> Array {
        let mut out = self.clone();
        if order != self.byte_order {
            swap_bytes_in_place(&mut out.data, self.dtype.itemsize());
            out.byte_order = order;
        }
        out
    }
}
