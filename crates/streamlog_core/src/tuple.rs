//! Tuple serialization seam.
//!
//! Streams frame records; the embedding engine knows column layouts. The
//! [`StreamTuple`] trait lets a stream ask a row to serialize itself into
//! a wire position the stream has already framed, and to expose the
//! partitioning inputs the replication protocol hashes over.

use streamlog_codec::{CodecResult, ReservedSlot, Writer};

/// A row the engine wants appended to a stream.
pub trait StreamTuple {
    /// Number of user-visible columns.
    fn visible_column_count(&self) -> usize;

    /// Upper bound on the serialized size of this row's columns, used for
    /// capacity reservation before any bytes are framed.
    fn max_serialized_size(&self) -> usize;

    /// Serializes the columns in replication row format: column data only,
    /// with nulls recorded by patching `bitmap` starting at
    /// `first_column_bit`.
    fn serialize_to_dr(
        &self,
        w: &mut Writer<'_>,
        bitmap: ReservedSlot,
        first_column_bit: usize,
    ) -> CodecResult<()>;

    /// Serializes the columns in export row format. Same contract as
    /// [`StreamTuple::serialize_to_dr`]; the formats differ only in
    /// how individual column types are encoded.
    fn serialize_to_export(
        &self,
        w: &mut Writer<'_>,
        bitmap: ReservedSlot,
        first_column_bit: usize,
    ) -> CodecResult<()>;

    /// Index of the partitioning column, if the table is partitioned.
    fn partition_column_index(&self) -> Option<u32>;

    /// Serialized partitioning column value, or `None` for replicated
    /// tables.
    fn partition_key(&self) -> Option<&[u8]>;
}

/// Hashes a serialized partition key to a partition hash value.
pub trait PartitionHasher {
    /// Hash for a row's serialized partition key.
    fn hash(&self, key: &[u8]) -> i32;
}

/// Default hasher over the serialized key bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Crc32cHasher;

impl PartitionHasher for Crc32cHasher {
    fn hash(&self, key: &[u8]) -> i32 {
        crc32c::crc32c(key) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hasher_is_stable() {
        let h = Crc32cHasher;
        assert_eq!(h.hash(b"key"), h.hash(b"key"));
        assert_ne!(h.hash(b"key-a"), h.hash(b"key-b"));
    }
}
