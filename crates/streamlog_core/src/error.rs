//! Error types for streamlog core.

use streamlog_codec::CodecError;
use thiserror::Error;

/// Result type for stream operations.
pub type StreamResult<T> = Result<T, StreamError>;

/// Errors that can occur while appending to or managing a stream.
///
/// The two classes matter to callers in very different ways:
/// [`StreamError::Overflow`] is recoverable — the offending transaction must
/// be rejected or retried upstream, and the stream stays consistent.
/// [`StreamError::ProtocolViolation`] is an unrecoverable invariant breach;
/// continuing to append would produce an undetectably corrupt byte stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// A single transaction's payload exceeds the maximum buffer size even
    /// after one promotion to a larger buffer.
    #[error("transaction of {required} bytes exceeds maximum buffer capacity {limit}")]
    Overflow {
        /// Bytes the transaction required.
        required: usize,
        /// Largest payload capacity a block can provide.
        limit: usize,
    },

    /// A time-ordering or wire-framing invariant was violated.
    #[error("protocol violation: {message}")]
    ProtocolViolation {
        /// Description of the violated invariant.
        message: String,
    },

    /// The stream was poisoned by an earlier protocol violation and rejects
    /// all further appends until explicitly re-armed.
    #[error("stream is poisoned by an earlier protocol violation")]
    Poisoned,

    /// A codec-level failure. Streams pre-size every write, so this
    /// indicates a sizing bug and is treated as fatal by callers.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl StreamError {
    /// Creates a protocol violation error.
    pub fn protocol_violation(message: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            message: message.into(),
        }
    }

    /// Returns true if the error is recoverable by rejecting the
    /// originating transaction.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Overflow { .. })
    }
}
