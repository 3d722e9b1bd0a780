//! Hand-assembled replication wire vectors.
//!
//! These build the expected bytes for small transactions independently of
//! the stream implementation, so a framing regression shows up as a byte
//! diff rather than a round-trip that quietly agrees with itself.

use streamlog_codec::{CodecResult, Writer};
use streamlog_core::dr::{DrRecordType, TxnHashFlag, DR_PROTOCOL_VERSION};
use streamlog_core::{SequenceNumber, StreamTuple, TableHandle, UniqueId};

/// Expected wire bytes of one transaction containing a single insert.
///
/// # Errors
///
/// Propagates codec errors; the scratch buffer is generously sized, so an
/// error means the row lies about its serialized size.
pub fn single_insert_transaction(
    sequence: SequenceNumber,
    unique_id: UniqueId,
    table: TableHandle,
    row: &dyn StreamTuple,
    flag: TxnHashFlag,
    first_hash: i32,
) -> CodecResult<Vec<u8>> {
    let bitmap_len = row.visible_column_count().div_ceil(8);
    let mut buf = vec![0u8; 64 + bitmap_len + row.max_serialized_size()];
    let mut w = Writer::new(&mut buf);

    // Begin record, with the slots already resolved.
    w.write_u8(DR_PROTOCOL_VERSION)?;
    w.write_u8(DrRecordType::BeginTxn.as_byte())?;
    w.write_i64(sequence.as_i64())?;
    w.write_i64(unique_id.as_i64())?;
    w.write_u8(flag.as_byte())?;
    let txn_length_slot = w.reserve(4)?;
    w.write_i32(first_hash)?;

    // Insert record.
    w.write_u8(DR_PROTOCOL_VERSION)?;
    w.write_u8(DrRecordType::Insert.as_byte())?;
    w.write_i64(table.as_i64())?;
    let row_length_slot = w.reserve(4)?;
    let image_start = w.position();
    let bitmap = w.reserve(bitmap_len)?;
    row.serialize_to_dr(&mut w, bitmap, 0)?;
    w.patch_i32(row_length_slot, (w.position() - image_start) as i32)?;

    // End record; the CRC covers everything before its own slot.
    w.write_u8(DR_PROTOCOL_VERSION)?;
    w.write_u8(DrRecordType::EndTxn.as_byte())?;
    w.write_i64(sequence.as_i64())?;
    let crc_at = w.position();
    let total = crc_at + 4;
    w.patch_i32(txn_length_slot, total as i32)?;

    let crc = crc32c::crc32c(&buf[..crc_at]);
    let mut tail = Writer::new(&mut buf[crc_at..]);
    tail.write_u32(crc)?;
    buf.truncate(total);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{ColumnValue, FixtureRow};
    use streamlog_core::dr::{ActiveDrWire, DrTupleStream};
    use streamlog_core::{
        CollectingTopend, Crc32cHasher, PartitionHasher, SpHandle, StreamConfig, StreamIdentity,
    };

    #[test]
    fn stream_output_matches_hand_assembled_vector() {
        let row = FixtureRow::partitioned(
            vec![ColumnValue::BigInt(7), ColumnValue::VarChar("golden".into())],
            0,
        );
        let expected = single_insert_transaction(
            SequenceNumber::new(1),
            UniqueId::new(31337),
            TableHandle::new(12),
            &row,
            TxnHashFlag::Single,
            Crc32cHasher.hash(&7_i64.to_be_bytes()),
        )
        .unwrap();

        let topend = CollectingTopend::new();
        let mut stream = DrTupleStream::new(
            StreamIdentity::new(0, "golden"),
            StreamConfig::new(),
            Box::new(ActiveDrWire),
            Box::new(Crc32cHasher),
            Box::new(topend.clone()),
        );
        stream
            .append_tuple(
                SpHandle::new(0),
                SpHandle::new(1),
                UniqueId::new(31337),
                TableHandle::new(12),
                &row,
                DrRecordType::Insert,
            )
            .unwrap();
        stream
            .end_transaction(SpHandle::new(1), UniqueId::new(31337))
            .unwrap();
        stream.periodic_flush(-1, SpHandle::new(1)).unwrap();

        assert_eq!(topend.payload_bytes(), expected);
    }

    #[test]
    fn replicated_vector_uses_the_zero_hash() {
        let row = FixtureRow::replicated(vec![ColumnValue::BigInt(1)]);
        let expected = single_insert_transaction(
            SequenceNumber::new(1),
            UniqueId::new(5),
            TableHandle::new(2),
            &row,
            TxnHashFlag::Replicated,
            streamlog_core::dr::REPLICATED_HASH,
        )
        .unwrap();

        let topend = CollectingTopend::new();
        let mut stream = DrTupleStream::new(
            StreamIdentity::new(0, "golden"),
            StreamConfig::new(),
            Box::new(ActiveDrWire),
            Box::new(Crc32cHasher),
            Box::new(topend.clone()),
        );
        stream
            .append_tuple(
                SpHandle::new(0),
                SpHandle::new(1),
                UniqueId::new(5),
                TableHandle::new(2),
                &row,
                DrRecordType::Insert,
            )
            .unwrap();
        stream
            .end_transaction(SpHandle::new(1), UniqueId::new(5))
            .unwrap();
        stream.periodic_flush(-1, SpHandle::new(1)).unwrap();

        assert_eq!(topend.payload_bytes(), expected);
    }
}
