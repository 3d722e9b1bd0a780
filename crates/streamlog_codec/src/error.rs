//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while reading or writing wire bytes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Unexpected end of input while reading.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// A write would exceed the fixed capacity of the buffer.
    ///
    /// Callers are expected to pre-size writes via a max-serialized-size
    /// computation; the codec never grows a buffer mid-write.
    #[error("write of {needed} bytes exceeds remaining capacity {available}")]
    CapacityExceeded {
        /// Bytes the write needed.
        needed: usize,
        /// Bytes remaining in the buffer.
        available: usize,
    },

    /// A variable-length integer exceeded its type-width shift limit.
    #[error("varint exceeds 64-bit width")]
    VarintOverflow,

    /// A patch value did not match the reserved slot's length.
    #[error("patch of {value_len} bytes into a {slot_len}-byte reserved slot")]
    SlotMismatch {
        /// Length of the reserved slot.
        slot_len: usize,
        /// Length of the value being patched.
        value_len: usize,
    },

    /// A length-prefixed string was not valid UTF-8.
    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    /// A negative length prefix was read.
    #[error("negative length prefix: {length}")]
    NegativeLength {
        /// The length that was read.
        length: i32,
    },

    /// An `unread` call tried to rewind past the start of the buffer.
    #[error("cannot rewind {requested} bytes, only {consumed} consumed")]
    RewindPastStart {
        /// Bytes requested to rewind.
        requested: usize,
        /// Bytes consumed so far.
        consumed: usize,
    },
}
