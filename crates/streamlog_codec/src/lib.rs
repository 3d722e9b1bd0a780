//! # streamlog codec
//!
//! Binary codec primitives for streamlog wire formats.
//!
//! This crate provides two complementary cursors over caller-owned buffers:
//! - [`Reader`]: bounded fixed-width and zigzag-varint reads, with an
//!   [`Reader::unread`] rewind for type-tag dispatch
//! - [`Writer`]: capacity-checked fixed-width and varint writes, plus the
//!   reserve-then-patch pattern ([`Writer::reserve`] / [`ReservedSlot`]) used
//!   for trailing lengths and checksums whose values are only known after the
//!   payload is serialized
//!
//! The codec never resizes a buffer: callers pre-size writes via a
//! max-serialized-size computation. All multi-byte integers use big-endian
//! byte order; floats and doubles travel as their bit-identical integer
//! representation.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod reader;
mod writer;

pub use error::{CodecError, CodecResult};
pub use reader::Reader;
pub use writer::{ReservedSlot, Writer};

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn varint_roundtrip(v in any::<i64>()) {
            let mut buf = [0u8; 10];
            let mut w = Writer::new(&mut buf);
            w.write_varint(v).unwrap();
            let written = w.position();
            prop_assert_eq!(written, Writer::varint_size(v));
            let mut r = Reader::new(&buf[..written]);
            prop_assert_eq!(r.read_varint().unwrap(), v);
            prop_assert!(r.is_empty());
        }

        #[test]
        fn fixed_width_roundtrip(a in any::<i64>(), b in any::<i32>(), c in any::<f64>()) {
            let mut buf = [0u8; 20];
            let mut w = Writer::new(&mut buf);
            w.write_i64(a).unwrap();
            w.write_i32(b).unwrap();
            w.write_f64(c).unwrap();
            let mut r = Reader::new(&buf);
            prop_assert_eq!(r.read_i64().unwrap(), a);
            prop_assert_eq!(r.read_i32().unwrap(), b);
            prop_assert_eq!(r.read_f64().unwrap().to_bits(), c.to_bits());
        }

        #[test]
        fn var_bytes_roundtrip(data in prop::collection::vec(any::<u8>(), 0..256)) {
            let mut buf = vec![0u8; data.len() + 4];
            let mut w = Writer::new(&mut buf);
            w.write_var_bytes(&data).unwrap();
            let mut r = Reader::new(&buf);
            prop_assert_eq!(r.read_var_bytes().unwrap(), data.as_slice());
        }
    }
}
