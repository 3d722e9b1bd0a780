//! Bounded read cursor over a caller-supplied buffer.

use crate::error::{CodecError, CodecResult};

/// A bounded read cursor.
///
/// The reader advances a position within `[0, data.len())` and never
/// allocates. All multi-byte integers are read big-endian; floats are
/// reconstructed from their bit-identical integer representation.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Creates a reader over the given bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Returns the current read position.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Returns the number of unread bytes.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Returns true if all bytes have been consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Rewinds the cursor by `n` bytes.
    ///
    /// Used by callers that peek a type tag before dispatching.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::RewindPastStart`] if fewer than `n` bytes have
    /// been consumed.
    pub fn unread(&mut self, n: usize) -> CodecResult<()> {
        if n > self.pos {
            return Err(CodecError::RewindPastStart {
                requested: n,
                consumed: self.pos,
            });
        }
        self.pos -= n;
        Ok(())
    }

    /// Reads `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(CodecError::UnexpectedEof);
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> CodecResult<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    /// Reads a signed byte.
    pub fn read_i8(&mut self) -> CodecResult<i8> {
        Ok(self.read_u8()? as i8)
    }

    /// Reads a big-endian u16.
    pub fn read_u16(&mut self) -> CodecResult<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    /// Reads a big-endian i16.
    pub fn read_i16(&mut self) -> CodecResult<i16> {
        Ok(self.read_u16()? as i16)
    }

    /// Reads a big-endian u32.
    pub fn read_u32(&mut self) -> CodecResult<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a big-endian i32.
    pub fn read_i32(&mut self) -> CodecResult<i32> {
        Ok(self.read_u32()? as i32)
    }

    /// Reads a big-endian u64.
    pub fn read_u64(&mut self) -> CodecResult<u64> {
        let b = self.read_bytes(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_be_bytes(buf))
    }

    /// Reads a big-endian i64.
    pub fn read_i64(&mut self) -> CodecResult<i64> {
        Ok(self.read_u64()? as i64)
    }

    /// Reads an IEEE 754 float from its bit pattern.
    pub fn read_f32(&mut self) -> CodecResult<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    /// Reads an IEEE 754 double from its bit pattern.
    pub fn read_f64(&mut self) -> CodecResult<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    /// Reads a length-prefixed (i32) byte slice.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::NegativeLength`] if the prefix is negative.
    pub fn read_var_bytes(&mut self) -> CodecResult<&'a [u8]> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(CodecError::NegativeLength { length: len });
        }
        self.read_bytes(len as usize)
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> CodecResult<&'a str> {
        let bytes = self.read_var_bytes()?;
        std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)
    }

    /// Reads a zigzag-encoded variable-length integer.
    ///
    /// Accumulates 7 bits per byte while the continuation bit (0x80) is set.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::VarintOverflow`] if the encoding exceeds the
    /// 64-bit shift limit, or [`CodecError::UnexpectedEof`] if the input ends
    /// mid-varint.
    pub fn read_varint(&mut self) -> CodecResult<i64> {
        let mut value: u64 = 0;
        let mut shift: u32 = 0;
        loop {
            let byte = self.read_u8()?;
            if shift >= 64 {
                return Err(CodecError::VarintOverflow);
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        // Zigzag decode: interleaved sign back to two's complement.
        Ok(((value >> 1) as i64) ^ -((value & 1) as i64))
    }
}
