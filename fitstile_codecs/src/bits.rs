//! MSB-first bit packing shared by the RICE and HCOMPRESS coders.

use fitstile_core::{Algorithm, CodecError, Result};

/// Packs variable-width values into a growing byte buffer, most significant
/// bit first. The final partial byte is padded with zeros.
///
/// ```
/// # use fitstile_codecs::bits::BitWriter;
/// let mut writer = BitWriter::new();
/// writer.write_bits(0b1010, 4);
/// writer.write_bits(0b11, 2);
/// assert_eq!(writer.finish(), vec![0b1010_1100]);
/// ```
#[derive(Debug, Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    current: u8,
    /// Bits already used in `current`.
    filled: u32,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(bytes),
            ..Self::default()
        }
    }

    /// Number of bits written so far.
    pub fn bit_len(&self) -> usize {
        self.bytes.len() * 8 + self.filled as usize
    }

    /// Write the low `width` bits of `value` (`width <= 64`).
    pub fn write_bits(&mut self, value: u64, width: u32) {
        debug_assert!(width <= 64);
        let mut remaining = width;
        while remaining > 0 {
            let free = 8 - self.filled;
            let take = free.min(remaining);
            let shift = remaining - take;
            let chunk = ((value >> shift) & ((1u64 << take) - 1)) as u8;
            self.current |= chunk << (free - take);
            self.filled += take;
            remaining -= take;
            if self.filled == 8 {
                self.bytes.push(self.current);
                self.current = 0;
                self.filled = 0;
            }
        }
    }

    pub fn write_bit(&mut self, bit: bool) {
        self.write_bits(bit as u64, 1);
    }

    /// Write `count` zero bits.
    pub fn write_zeros(&mut self, mut count: u64) {
        while count > 0 {
            let n = count.min(64) as u32;
            self.write_bits(0, n);
            count -= n as u64;
        }
    }

    /// Append whole bytes; the writer must be byte aligned.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        if self.filled == 0 {
            self.bytes.extend_from_slice(bytes);
        } else {
            for &b in bytes {
                self.write_bits(b as u64, 8);
            }
        }
    }

    /// Pad with zeros to the next byte boundary.
    pub fn align(&mut self) {
        if self.filled > 0 {
            self.bytes.push(self.current);
            self.current = 0;
            self.filled = 0;
        }
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.align();
        self.bytes
    }
}

/// Reads values written by [`BitWriter`].
///
/// Running past the end of the buffer is a `Decode` error for the codec the
/// reader was created for.
pub struct BitReader<'a> {
    buffer: &'a [u8],
    bit_pos: usize,
    algorithm: Algorithm,
}

impl<'a> BitReader<'a> {
    pub fn new(buffer: &'a [u8], algorithm: Algorithm) -> Self {
        Self {
            buffer,
            bit_pos: 0,
            algorithm,
        }
    }

    pub fn bit_position(&self) -> usize {
        self.bit_pos
    }

    pub fn remaining_bits(&self) -> usize {
        (self.buffer.len() * 8).saturating_sub(self.bit_pos)
    }

    fn truncated(&self) -> CodecError {
        CodecError::decode(
            self.algorithm,
            format!(
                "compressed stream ends after {} bytes",
                self.buffer.len()
            ),
        )
    }

    /// Read `width` bits (`width <= 64`) as an unsigned value.
    pub fn read_bits(&mut self, width: u32) -> Result<u64> {
        debug_assert!(width <= 64);
        if self.remaining_bits() < width as usize {
            return Err(self.truncated());
        }
        let mut value = 0u64;
        let mut remaining = width;
        while remaining > 0 {
            let byte = self.buffer[self.bit_pos / 8];
            let offset = (self.bit_pos % 8) as u32;
            let avail = 8 - offset;
            let take = avail.min(remaining);
            let chunk = (byte >> (avail - take)) & ((1u16 << take) - 1) as u8;
            value = (value << take) | chunk as u64;
            self.bit_pos += take as usize;
            remaining -= take;
        }
        Ok(value)
    }

    pub fn read_bit(&mut self) -> Result<bool> {
        Ok(self.read_bits(1)? == 1)
    }

    /// Count zero bits up to and including the next one bit; returns the
    /// number of zeros.
    pub fn read_unary(&mut self) -> Result<u64> {
        let mut zeros = 0u64;
        loop {
            let idx = self.bit_pos / 8;
            if idx >= self.buffer.len() {
                return Err(self.truncated());
            }
            let offset = (self.bit_pos % 8) as u32;
            let rest = self.buffer[idx] << offset;
            if rest == 0 {
                zeros += (8 - offset) as u64;
                self.bit_pos += (8 - offset) as usize;
            } else {
                let lead = rest.leading_zeros();
                zeros += lead as u64;
                self.bit_pos += lead as usize + 1;
                return Ok(zeros);
            }
        }
    }

    /// Read `n` whole bytes; the reader must be byte aligned.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        debug_assert_eq!(self.bit_pos % 8, 0);
        let start = self.bit_pos / 8;
        let end = start.checked_add(n).ok_or_else(|| self.truncated())?;
        if end > self.buffer.len() {
            return Err(self.truncated());
        }
        self.bit_pos = end * 8;
        Ok(&self.buffer[start..end])
    }

    /// Skip to the next byte boundary.
    pub fn align(&mut self) {
        self.bit_pos = self.bit_pos.div_ceil(8) * 8;
    }
}
