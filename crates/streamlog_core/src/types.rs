//! Core type definitions for streamlog.

use std::fmt;

/// Universal stream offset: a cumulative byte position within one logical
/// stream, assigned once per appended byte and never reused.
pub type Uso = u64;

/// Engine-assigned single-partition transaction handle.
///
/// Handles are non-decreasing per stream; a handle moving backward is a
/// fatal protocol violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SpHandle(pub i64);

impl SpHandle {
    /// Creates a new handle.
    #[must_use]
    pub const fn new(h: i64) -> Self {
        Self(h)
    }

    /// Returns the raw handle value.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for SpHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sp:{}", self.0)
    }
}

/// Engine-assigned unique id carrying the originating site in its low bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct UniqueId(pub i64);

/// Site field value reserved for multi-partition coordinators.
const MP_SITE_BITS: i64 = 0x3fff;

impl UniqueId {
    /// Creates a new unique id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }

    /// Returns true if this id was minted by the multi-partition
    /// coordinator site.
    #[must_use]
    pub const fn is_multi_partition(self) -> bool {
        self.0 & MP_SITE_BITS == MP_SITE_BITS
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uid:{}", self.0)
    }
}

/// Sequence number for ordering transactions (DR) or rows (export).
///
/// Gaps or duplicates observed by a consumer after restart indicate lost or
/// replayed data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SequenceNumber(pub i64);

impl SequenceNumber {
    /// Creates a new sequence number.
    #[must_use]
    pub const fn new(seq: i64) -> Self {
        Self(seq)
    }

    /// Returns the raw sequence value.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }

    /// Returns the next sequence number.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq:{}", self.0)
    }
}

/// Stable identifier of a table as known to downstream consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TableHandle(pub i64);

impl TableHandle {
    /// Creates a new table handle.
    #[must_use]
    pub const fn new(h: i64) -> Self {
        Self(h)
    }

    /// Returns the raw handle value.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for TableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table:{}", self.0)
    }
}

/// Identity of a stream instance, passed to the topend with every hand-off.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamIdentity {
    /// Logical partition that owns the stream.
    pub partition_id: i32,
    /// Table or stream name as exposed to consumers.
    pub name: String,
}

impl StreamIdentity {
    /// Creates a new stream identity.
    pub fn new(partition_id: i32, name: impl Into<String>) -> Self {
        Self {
            partition_id,
            name: name.into(),
        }
    }
}

impl fmt::Display for StreamIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@p{}", self.name, self.partition_id)
    }
}

/// Registration key for a stream in the flush coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId(pub u64);

impl StreamId {
    /// Creates a new stream id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sp_handle_ordering() {
        assert!(SpHandle::new(1) < SpHandle::new(2));
    }

    #[test]
    fn sequence_number_next() {
        assert_eq!(SequenceNumber::new(5).next().as_i64(), 6);
    }

    #[test]
    fn multi_partition_unique_ids() {
        assert!(UniqueId::new(0x3fff).is_multi_partition());
        assert!(UniqueId::new((77 << 14) | 0x3fff).is_multi_partition());
        assert!(!UniqueId::new(42).is_multi_partition());
    }

    #[test]
    fn stream_identity_display() {
        let id = StreamIdentity::new(3, "orders");
        assert_eq!(format!("{id}"), "orders@p3");
    }
}
