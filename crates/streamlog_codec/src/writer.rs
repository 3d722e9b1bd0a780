//! Bounded write cursor over a caller-owned buffer.

use crate::error::{CodecError, CodecResult};

/// A reserved region inside a [`Writer`]'s buffer.
///
/// Returned by [`Writer::reserve`] for two-pass writes where a trailing
/// length or checksum is patched into an earlier offset once its value is
/// known. The slot records its offset relative to the start of the writer's
/// buffer, so it stays valid across writer instances over the same region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservedSlot {
    offset: usize,
    len: usize,
}

impl ReservedSlot {
    /// Creates a slot from a raw offset and length.
    ///
    /// Intended for callers that persist slot positions across writer
    /// instances (e.g. as stream offsets) and rebuild them later.
    #[must_use]
    pub const fn at(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }

    /// Offset of the slot relative to the buffer start.
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Length of the slot in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the slot is zero-length.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A bounded write cursor.
///
/// Tracks a position against the fixed capacity of a caller-owned buffer.
/// Every write checks `position + len <= capacity` and fails with
/// [`CodecError::CapacityExceeded`] rather than growing the buffer: callers
/// pre-size via a max-serialized-size computation before writing.
///
/// All multi-byte integers are written big-endian; floats are transported as
/// their bit-identical integer representation.
pub struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    /// Creates a writer over the given buffer.
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Returns the current write position.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Returns the fixed capacity of the underlying buffer.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Returns the number of bytes still writable.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn check(&self, len: usize) -> CodecResult<()> {
        if self.remaining() < len {
            return Err(CodecError::CapacityExceeded {
                needed: len,
                available: self.remaining(),
            });
        }
        Ok(())
    }

    /// Writes raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> CodecResult<()> {
        self.check(bytes.len())?;
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
        Ok(())
    }

    /// Writes one byte.
    pub fn write_u8(&mut self, v: u8) -> CodecResult<()> {
        self.write_bytes(&[v])
    }

    /// Writes a signed byte.
    pub fn write_i8(&mut self, v: i8) -> CodecResult<()> {
        self.write_u8(v as u8)
    }

    /// Writes a big-endian u16.
    pub fn write_u16(&mut self, v: u16) -> CodecResult<()> {
        self.write_bytes(&v.to_be_bytes())
    }

    /// Writes a big-endian i16.
    pub fn write_i16(&mut self, v: i16) -> CodecResult<()> {
        self.write_bytes(&v.to_be_bytes())
    }

    /// Writes a big-endian u32.
    pub fn write_u32(&mut self, v: u32) -> CodecResult<()> {
        self.write_bytes(&v.to_be_bytes())
    }

    /// Writes a big-endian i32.
    pub fn write_i32(&mut self, v: i32) -> CodecResult<()> {
        self.write_bytes(&v.to_be_bytes())
    }

    /// Writes a big-endian u64.
    pub fn write_u64(&mut self, v: u64) -> CodecResult<()> {
        self.write_bytes(&v.to_be_bytes())
    }

    /// Writes a big-endian i64.
    pub fn write_i64(&mut self, v: i64) -> CodecResult<()> {
        self.write_bytes(&v.to_be_bytes())
    }

    /// Writes an IEEE 754 float as its bit pattern.
    pub fn write_f32(&mut self, v: f32) -> CodecResult<()> {
        self.write_u32(v.to_bits())
    }

    /// Writes an IEEE 754 double as its bit pattern.
    pub fn write_f64(&mut self, v: f64) -> CodecResult<()> {
        self.write_u64(v.to_bits())
    }

    /// Writes a length-prefixed (i32) byte slice.
    pub fn write_var_bytes(&mut self, bytes: &[u8]) -> CodecResult<()> {
        self.check(4 + bytes.len())?;
        self.write_i32(bytes.len() as i32)?;
        self.write_bytes(bytes)
    }

    /// Writes a length-prefixed UTF-8 string.
    pub fn write_string(&mut self, s: &str) -> CodecResult<()> {
        self.write_var_bytes(s.as_bytes())
    }

    /// Writes `n` zero bytes.
    pub fn fill_zeros(&mut self, n: usize) -> CodecResult<()> {
        self.check(n)?;
        self.buf[self.pos..self.pos + n].fill(0);
        self.pos += n;
        Ok(())
    }

    /// Writes a zigzag-encoded variable-length integer.
    pub fn write_varint(&mut self, v: i64) -> CodecResult<()> {
        self.check(Self::varint_size(v))?;
        let mut value = ((v << 1) ^ (v >> 63)) as u64;
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.write_u8(byte)?;
                break;
            }
            self.write_u8(byte | 0x80)?;
        }
        Ok(())
    }

    /// Returns the encoded size of a zigzag varint.
    #[must_use]
    pub fn varint_size(v: i64) -> usize {
        let mut value = ((v << 1) ^ (v >> 63)) as u64;
        let mut size = 1;
        while value >= 0x80 {
            value >>= 7;
            size += 1;
        }
        size
    }

    /// Reserves `len` bytes (zero-filled) and returns a patchable slot.
    pub fn reserve(&mut self, len: usize) -> CodecResult<ReservedSlot> {
        let offset = self.pos;
        self.fill_zeros(len)?;
        Ok(ReservedSlot { offset, len })
    }

    fn patch(&mut self, slot: ReservedSlot, value: &[u8]) -> CodecResult<()> {
        if slot.len != value.len() {
            return Err(CodecError::SlotMismatch {
                slot_len: slot.len,
                value_len: value.len(),
            });
        }
        // Slots are always behind the write position.
        self.buf[slot.offset..slot.offset + slot.len].copy_from_slice(value);
        Ok(())
    }

    /// Patches a single byte into a reserved slot.
    pub fn patch_u8(&mut self, slot: ReservedSlot, v: u8) -> CodecResult<()> {
        self.patch(slot, &[v])
    }

    /// Patches a big-endian u32 into a reserved slot.
    pub fn patch_u32(&mut self, slot: ReservedSlot, v: u32) -> CodecResult<()> {
        self.patch(slot, &v.to_be_bytes())
    }

    /// Patches a big-endian i32 into a reserved slot.
    pub fn patch_i32(&mut self, slot: ReservedSlot, v: i32) -> CodecResult<()> {
        self.patch(slot, &v.to_be_bytes())
    }

    /// Sets one bit inside a reserved region (used for null bitmaps).
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::SlotMismatch`] if the bit index falls outside
    /// the slot.
    pub fn patch_bit(&mut self, slot: ReservedSlot, bit: usize) -> CodecResult<()> {
        let byte = bit / 8;
        if byte >= slot.len {
            return Err(CodecError::SlotMismatch {
                slot_len: slot.len,
                value_len: byte + 1,
            });
        }
        self.buf[slot.offset + byte] |= 0x80 >> (bit % 8);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::Reader;

    #[test]
    fn writes_are_bounded() {
        let mut buf = [0u8; 4];
        let mut w = Writer::new(&mut buf);
        w.write_u32(7).unwrap();
        assert_eq!(
            w.write_u8(1),
            Err(CodecError::CapacityExceeded {
                needed: 1,
                available: 0
            })
        );
    }

    #[test]
    fn fixed_width_layout_is_big_endian() {
        let mut buf = [0u8; 8];
        let mut w = Writer::new(&mut buf);
        w.write_u16(0x0102).unwrap();
        w.write_i32(-1).unwrap();
        assert_eq!(&buf[..6], &[0x01, 0x02, 0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn reserve_then_patch_length() {
        let mut buf = [0u8; 16];
        let mut w = Writer::new(&mut buf);
        let slot = w.reserve(4).unwrap();
        w.write_bytes(b"payload").unwrap();
        let len = (w.position() - 4) as i32;
        w.patch_i32(slot, len).unwrap();
        let mut r = Reader::new(&buf);
        assert_eq!(r.read_i32().unwrap(), 7);
        assert_eq!(r.read_bytes(7).unwrap(), b"payload");
    }

    #[test]
    fn patch_length_must_match_slot() {
        let mut buf = [0u8; 8];
        let mut w = Writer::new(&mut buf);
        let slot = w.reserve(2).unwrap();
        assert!(matches!(
            w.patch_u32(slot, 1),
            Err(CodecError::SlotMismatch { .. })
        ));
    }

    #[test]
    fn bitmap_bits_are_msb_first() {
        let mut buf = [0u8; 2];
        let mut w = Writer::new(&mut buf);
        let slot = w.reserve(2).unwrap();
        w.patch_bit(slot, 0).unwrap();
        w.patch_bit(slot, 9).unwrap();
        assert_eq!(buf, [0x80, 0x40]);
    }

    #[test]
    fn bit_outside_slot_rejected() {
        let mut buf = [0u8; 1];
        let mut w = Writer::new(&mut buf);
        let slot = w.reserve(1).unwrap();
        assert!(matches!(
            w.patch_bit(slot, 8),
            Err(CodecError::SlotMismatch { .. })
        ));
    }

    #[test]
    fn fill_zeros_advances_position() {
        let mut buf = [0xffu8; 4];
        let mut w = Writer::new(&mut buf);
        w.fill_zeros(3).unwrap();
        assert_eq!(w.position(), 3);
        assert_eq!(buf, [0, 0, 0, 0xff]);
    }

    #[test]
    fn varint_sizes() {
        assert_eq!(Writer::varint_size(0), 1);
        assert_eq!(Writer::varint_size(-64), 1);
        assert_eq!(Writer::varint_size(64), 2);
        assert_eq!(Writer::varint_size(i64::MAX), 10);
        assert_eq!(Writer::varint_size(i64::MIN), 10);
    }
}
