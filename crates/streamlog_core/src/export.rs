//! Export / change-data-capture stream.
//!
//! Every appended row is framed with six metadata columns (transaction id,
//! timestamp, sequence number, partition id, site id, operation) followed
//! by the table's visible columns. There is no cross-row checksum;
//! downstream ordering and dedup rely on the monotonic per-row sequence
//! number and on the committed sequence number stamped on each block.

use crate::block::{BlockMeta, StreamBlock};
use crate::chain::BufferChain;
use crate::config::StreamConfig;
use crate::error::{StreamError, StreamResult};
use crate::topend::{BlockSignal, ControlSignal, Topend};
use crate::tuple::StreamTuple;
use crate::types::{SequenceNumber, SpHandle, StreamIdentity, UniqueId, Uso};

/// Metadata columns preceding the visible columns in every export row.
pub const EXPORT_METADATA_COLUMNS: usize = 6;

/// Partition column index recorded for rows of replicated tables.
const NO_PARTITION_COLUMN: i32 = -1;

/// Operation byte of an export row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExportOperation {
    /// Row inserted.
    Insert = 1,
    /// Row deleted.
    Delete = 2,
}

impl ExportOperation {
    /// Wire byte for this operation.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Export block metadata consumed downstream for resume and dedup.
#[derive(Debug, Clone, Default)]
pub struct ExportBlockMeta {
    /// Rows whose bytes live in this block.
    pub row_count: u32,
    /// Sequence number of the block's first row.
    pub start_sequence_number: Option<SequenceNumber>,
    /// Newest committed sequence number at hand-off time, capped at the
    /// block's own last row.
    pub committed_sequence_number: Option<SequenceNumber>,
}

impl ExportBlockMeta {
    /// Sequence number of the block's last row.
    #[must_use]
    pub fn last_sequence_number(&self) -> Option<SequenceNumber> {
        self.start_sequence_number
            .map(|s| SequenceNumber::new(s.as_i64() + i64::from(self.row_count) - 1))
    }
}

impl BlockMeta for ExportBlockMeta {
    // Reserved region at the front of every export block, zero filled; the
    // export manager fills it when the block goes out.
    const HEADER_SIZE: usize = 8;
}

/// Append-only export stream for one table partition.
pub struct ExportTupleStream {
    chain: BufferChain<ExportBlockMeta>,
    topend: Box<dyn Topend<ExportBlockMeta>>,
    identity: StreamIdentity,
    site_id: i64,
    next_sequence_number: SequenceNumber,
    committed_sequence_number: SequenceNumber,
    // Row accounting for the open transaction, needed when its bytes
    // migrate to a new block or get rolled back.
    open_txn_row_count: u32,
    open_txn_start_sequence: SequenceNumber,
}

impl ExportTupleStream {
    /// Creates a stream whose first row takes `start_sequence`.
    #[must_use]
    pub fn new(
        identity: StreamIdentity,
        config: StreamConfig,
        site_id: i64,
        start_sequence: SequenceNumber,
        topend: Box<dyn Topend<ExportBlockMeta>>,
    ) -> Self {
        Self {
            chain: BufferChain::new(config),
            topend,
            identity,
            site_id,
            next_sequence_number: start_sequence,
            committed_sequence_number: SequenceNumber::new(start_sequence.as_i64() - 1),
            open_txn_row_count: 0,
            open_txn_start_sequence: start_sequence,
        }
    }

    /// Stream identity.
    #[must_use]
    pub fn identity(&self) -> &StreamIdentity {
        &self.identity
    }

    /// Sequence number the next appended row will take.
    #[must_use]
    pub fn next_sequence_number(&self) -> SequenceNumber {
        self.next_sequence_number
    }

    /// Newest committed row sequence number.
    #[must_use]
    pub fn committed_sequence_number(&self) -> SequenceNumber {
        self.committed_sequence_number
    }

    /// Current write offset.
    #[must_use]
    pub fn write_uso(&self) -> Uso {
        self.chain.write_uso()
    }

    /// Offset through which all bytes are committed.
    #[must_use]
    pub fn committed_uso(&self) -> Uso {
        self.chain.committed_uso()
    }

    /// Appends one row, registering its transaction with the chain first so
    /// a handle transition commits the previous transaction's rows.
    ///
    /// # Errors
    ///
    /// [`StreamError::Overflow`] when a single row exceeds the large block
    /// capacity; nothing has been written.
    pub fn append_tuple(
        &mut self,
        last_committed_sp: SpHandle,
        sp_handle: SpHandle,
        unique_id: UniqueId,
        timestamp: i64,
        tuple: &dyn StreamTuple,
        operation: ExportOperation,
    ) -> StreamResult<SequenceNumber> {
        let outcome = self.chain.commit(last_committed_sp, sp_handle, unique_id)?;
        if outcome.advanced() {
            self.note_commit();
            let _ = self.push_pending(BlockSignal::Committed, false)?;
        }

        let visible = tuple.visible_column_count();
        let bitmap_len = (EXPORT_METADATA_COLUMNS + visible).div_ceil(8);
        let max_row = 4 + 4 + 4 + bitmap_len + 8 * 5 + 1 + tuple.max_serialized_size();
        self.ensure_row_capacity(max_row)?;

        let sequence = self.next_sequence_number;
        let partition_column = tuple
            .partition_column_index()
            .map_or(NO_PARTITION_COLUMN, |i| i as i32);
        let txn_id = sp_handle.as_i64();
        let partition_id = i64::from(self.identity.partition_id);
        let site_id = self.site_id;
        self.chain.with_writer(|w| {
            let len_slot = w.reserve(4)?;
            let row_start = w.position();
            w.write_i32(partition_column)?;
            w.write_i32((EXPORT_METADATA_COLUMNS + visible) as i32)?;
            let bitmap = w.reserve(bitmap_len)?;
            w.write_i64(txn_id)?;
            w.write_i64(timestamp)?;
            w.write_i64(sequence.as_i64())?;
            w.write_i64(partition_id)?;
            w.write_i64(site_id)?;
            w.write_u8(operation.as_byte())?;
            tuple.serialize_to_export(w, bitmap, EXPORT_METADATA_COLUMNS)?;
            w.patch_i32(len_slot, (w.position() - row_start) as i32)?;
            Ok(())
        })?;

        self.next_sequence_number = sequence.next();
        if self.open_txn_row_count == 0 {
            self.open_txn_start_sequence = sequence;
        }
        self.open_txn_row_count += 1;
        if let Some(block) = self.chain.current_block_mut() {
            let meta = block.meta_mut();
            if meta.row_count == 0 {
                meta.start_sequence_number = Some(sequence);
            }
            meta.row_count += 1;
        }
        Ok(sequence)
    }

    /// Registers a commit and hands off every fully covered block.
    ///
    /// `sync` asks the consumer for durability before acknowledging;
    /// `flush` additionally rotates the current block out when all of its
    /// bytes are committed.
    pub fn commit(
        &mut self,
        last_committed_sp: SpHandle,
        sp_handle: SpHandle,
        unique_id: UniqueId,
        sync: bool,
        flush: bool,
    ) -> StreamResult<()> {
        let outcome = self.chain.commit(last_committed_sp, sp_handle, unique_id)?;
        if outcome.advanced() {
            self.note_commit();
        }
        let _ = self.push_pending(BlockSignal::Committed, sync)?;
        if flush && self.current_fully_committed() {
            self.rotate_current(0)?;
            let _ = self.push_pending(BlockSignal::Flush, sync)?;
        }
        Ok(())
    }

    /// Discards uncommitted rows written past `mark`. `next_sequence` is the
    /// sequence number the first rolled-back row carried; appending resumes
    /// from it.
    pub fn rollback_to(&mut self, mark: Uso, next_sequence: SequenceNumber) -> StreamResult<()> {
        let rolled = self.next_sequence_number.as_i64() - next_sequence.as_i64();
        let rolled = u32::try_from(rolled).map_err(|_| {
            StreamError::protocol_violation(format!(
                "rollback to future sequence {next_sequence}, next is {}",
                self.next_sequence_number
            ))
        })?;
        if rolled > self.open_txn_row_count {
            return Err(StreamError::protocol_violation(format!(
                "rollback of {rolled} rows exceeds the open transaction's {}",
                self.open_txn_row_count
            )));
        }
        self.chain.rollback_to(mark)?;
        if let Some(block) = self.chain.current_block_mut() {
            let meta = block.meta_mut();
            meta.row_count -= rolled;
            if meta.row_count == 0 {
                meta.start_sequence_number = None;
            }
        }
        self.open_txn_row_count -= rolled;
        self.next_sequence_number = next_sequence;
        Ok(())
    }

    /// Age-bound flush. Hands off a block only when it is fully committed;
    /// when a flush is due but nothing committed exists to release, an
    /// explicit no-data signal goes downstream instead.
    pub fn periodic_flush(
        &mut self,
        current_time_us: i64,
        last_committed_sp: SpHandle,
    ) -> StreamResult<bool> {
        if !self.chain.flush_due(current_time_us) {
            return Ok(false);
        }
        if last_committed_sp >= self.chain.open_sp_handle() && self.write_uso() > self.committed_uso()
        {
            self.chain.commit_open_transaction();
            self.note_commit();
        }
        let mut pushed = self.push_pending(BlockSignal::Flush, false)?;
        if self.current_fully_committed() {
            self.rotate_current(0)?;
            pushed += self.push_pending(BlockSignal::Flush, false)?;
        }
        if pushed == 0 {
            self.topend.signal(&self.identity, ControlSignal::NoData);
        }
        Ok(true)
    }

    /// Shuts the stream down: releases every committed byte, then tells the
    /// consumer no further blocks will follow.
    pub fn end_generation(mut self) -> StreamResult<()> {
        let _ = self.push_pending(BlockSignal::Flush, true)?;
        if self.current_fully_committed() {
            self.rotate_current(0)?;
            let _ = self.push_pending(BlockSignal::Flush, true)?;
        }
        self.topend
            .signal(&self.identity, ControlSignal::EndOfGeneration);
        Ok(())
    }

    fn current_fully_committed(&self) -> bool {
        self.chain
            .current_block()
            .is_some_and(|b| b.offset() > 0 && b.end_uso() <= self.chain.committed_uso())
    }

    fn note_commit(&mut self) {
        self.committed_sequence_number =
            SequenceNumber::new(self.next_sequence_number.as_i64() - 1);
        self.open_txn_row_count = 0;
        self.open_txn_start_sequence = self.next_sequence_number;
        let committed = self.committed_sequence_number;
        for block in self.chain.blocks_mut() {
            let meta = block.meta_mut();
            if let (Some(start), Some(last)) =
                (meta.start_sequence_number, meta.last_sequence_number())
            {
                let capped = last.min(committed);
                if capped >= start {
                    meta.committed_sequence_number = Some(capped);
                }
            }
        }
    }

    /// Reserves row capacity, fixing block row accounting when the open
    /// transaction's bytes migrate to a new block.
    fn ensure_row_capacity(&mut self, len: usize) -> StreamResult<()> {
        if self
            .chain
            .current_block()
            .is_some_and(|b| b.remaining() >= len)
        {
            return Ok(());
        }
        self.rotate_current(len)
    }

    fn rotate_current(&mut self, min: usize) -> StreamResult<()> {
        let pending_before = self.chain.pending_len();
        self.chain.extend_buffer_chain(min)?;
        if self.open_txn_row_count == 0 {
            return Ok(());
        }
        // Migrated rows belong to the new block, not the one rotated out.
        if self.chain.pending_len() > pending_before {
            if let Some(old) = self.chain.pending_back_mut() {
                let meta = old.meta_mut();
                meta.row_count -= self.open_txn_row_count;
                if meta.row_count == 0 {
                    meta.start_sequence_number = None;
                }
            }
        }
        let start = self.open_txn_start_sequence;
        let count = self.open_txn_row_count;
        if let Some(curr) = self.chain.current_block_mut() {
            let meta = curr.meta_mut();
            meta.row_count = count;
            meta.start_sequence_number = Some(start);
        }
        Ok(())
    }

    fn push_pending(&mut self, signal: BlockSignal, sync: bool) -> StreamResult<usize> {
        let blocks: Vec<StreamBlock<ExportBlockMeta>> = self.chain.take_committed_pending();
        let count = blocks.len();
        for block in blocks {
            let finished = block.finish()?;
            tracing::debug!(
                stream = %self.identity,
                uso = finished.uso(),
                rows = finished.meta().row_count,
                ?signal,
                "export block handed off"
            );
            self.topend.push_block(&self.identity, finished, signal, sync);
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topend::CollectingTopend;
    use streamlog_codec::{CodecResult, Reader, ReservedSlot, Writer};

    struct TestRow {
        replicated: bool,
        payload: Vec<u8>,
        null_first_column: bool,
    }

    impl TestRow {
        fn new(payload: &[u8]) -> Self {
            Self {
                replicated: false,
                payload: payload.to_vec(),
                null_first_column: false,
            }
        }
    }

    impl StreamTuple for TestRow {
        fn visible_column_count(&self) -> usize {
            2
        }

        fn max_serialized_size(&self) -> usize {
            self.payload.len() * 2
        }

        fn serialize_to_dr(
            &self,
            w: &mut Writer<'_>,
            bitmap: ReservedSlot,
            first_column_bit: usize,
        ) -> CodecResult<()> {
            self.serialize_to_export(w, bitmap, first_column_bit)
        }

        fn serialize_to_export(
            &self,
            w: &mut Writer<'_>,
            bitmap: ReservedSlot,
            first_column_bit: usize,
        ) -> CodecResult<()> {
            if self.null_first_column {
                w.patch_bit(bitmap, first_column_bit)?;
            } else {
                w.write_bytes(&self.payload)?;
            }
            w.write_bytes(&self.payload)?;
            Ok(())
        }

        fn partition_column_index(&self) -> Option<u32> {
            if self.replicated {
                None
            } else {
                Some(1)
            }
        }

        fn partition_key(&self) -> Option<&[u8]> {
            if self.replicated {
                None
            } else {
                Some(&self.payload)
            }
        }
    }

    fn stream_with_config(
        config: StreamConfig,
    ) -> (ExportTupleStream, CollectingTopend<ExportBlockMeta>) {
        let topend = CollectingTopend::new();
        let stream = ExportTupleStream::new(
            StreamIdentity::new(3, "orders"),
            config,
            42,
            SequenceNumber::new(1),
            Box::new(topend.clone()),
        );
        (stream, topend)
    }

    fn stream() -> (ExportTupleStream, CollectingTopend<ExportBlockMeta>) {
        stream_with_config(StreamConfig::new())
    }

    #[test]
    fn row_wire_layout() {
        let (mut s, topend) = stream();
        let row = TestRow::new(b"ab");
        let seq = s
            .append_tuple(
                SpHandle::new(0),
                SpHandle::new(5),
                UniqueId::new(50),
                777,
                &row,
                ExportOperation::Insert,
            )
            .unwrap();
        assert_eq!(seq, SequenceNumber::new(1));
        s.commit(SpHandle::new(5), SpHandle::new(5), UniqueId::new(50), false, true)
            .unwrap();

        let bytes = topend.payload_bytes();
        let mut r = Reader::new(&bytes);
        let row_len = r.read_i32().unwrap();
        assert_eq!(row_len as usize, bytes.len() - 4);
        assert_eq!(r.read_i32().unwrap(), 1); // partition column index
        assert_eq!(r.read_i32().unwrap(), 8); // 6 metadata + 2 visible
        assert_eq!(r.read_u8().unwrap(), 0); // no nulls
        assert_eq!(r.read_i64().unwrap(), 5); // txn id
        assert_eq!(r.read_i64().unwrap(), 777); // timestamp
        assert_eq!(r.read_i64().unwrap(), 1); // sequence number
        assert_eq!(r.read_i64().unwrap(), 3); // partition id
        assert_eq!(r.read_i64().unwrap(), 42); // site id
        assert_eq!(r.read_u8().unwrap(), ExportOperation::Insert.as_byte());
        assert_eq!(r.read_bytes(4).unwrap(), b"abab");
        assert!(r.is_empty());
    }

    #[test]
    fn null_columns_set_bits_past_the_metadata_prefix() {
        let (mut s, topend) = stream();
        let row = TestRow {
            replicated: true,
            payload: b"z".to_vec(),
            null_first_column: true,
        };
        s.append_tuple(
            SpHandle::new(0),
            SpHandle::new(5),
            UniqueId::new(50),
            0,
            &row,
            ExportOperation::Delete,
        )
        .unwrap();
        s.commit(SpHandle::new(5), SpHandle::new(5), UniqueId::new(50), false, true)
            .unwrap();

        let bytes = topend.payload_bytes();
        let mut r = Reader::new(&bytes);
        let _ = r.read_i32().unwrap();
        assert_eq!(r.read_i32().unwrap(), -1); // replicated table
        assert_eq!(r.read_i32().unwrap(), 8);
        // Bit 6 (first visible column), most significant bit first.
        assert_eq!(r.read_u8().unwrap(), 0x80 >> 6);
    }

    #[test]
    fn sequence_numbers_stay_contiguous_across_transactions() {
        let (mut s, _topend) = stream();
        let row = TestRow::new(b"r");
        let mut expected = 1;
        for sp in 1..=4_i64 {
            for _ in 0..3 {
                let seq = s
                    .append_tuple(
                        SpHandle::new(sp - 1),
                        SpHandle::new(sp),
                        UniqueId::new(sp * 10),
                        0,
                        &row,
                        ExportOperation::Insert,
                    )
                    .unwrap();
                assert_eq!(seq, SequenceNumber::new(expected));
                expected += 1;
            }
        }
        assert_eq!(s.next_sequence_number(), SequenceNumber::new(13));
        // Handle transitions committed transactions 1..=3.
        assert_eq!(s.committed_sequence_number(), SequenceNumber::new(9));
    }

    #[test]
    fn commit_stamps_committed_sequence_and_pushes_with_sync() {
        let (mut s, topend) = stream();
        let row = TestRow::new(b"r");
        for _ in 0..2 {
            s.append_tuple(
                SpHandle::new(0),
                SpHandle::new(5),
                UniqueId::new(50),
                0,
                &row,
                ExportOperation::Insert,
            )
            .unwrap();
        }
        s.commit(SpHandle::new(5), SpHandle::new(5), UniqueId::new(50), true, true)
            .unwrap();

        let pushed = topend.blocks();
        assert_eq!(pushed.len(), 1);
        assert!(pushed[0].sync);
        let meta = pushed[0].block.meta();
        assert_eq!(meta.row_count, 2);
        assert_eq!(meta.start_sequence_number, Some(SequenceNumber::new(1)));
        assert_eq!(meta.committed_sequence_number, Some(SequenceNumber::new(2)));
        assert_eq!(meta.last_sequence_number(), Some(SequenceNumber::new(2)));
    }

    #[test]
    fn flush_with_nothing_committed_signals_no_data() {
        let (mut s, topend) = stream();
        let row = TestRow::new(b"r");
        s.append_tuple(
            SpHandle::new(0),
            SpHandle::new(5),
            UniqueId::new(50),
            0,
            &row,
            ExportOperation::Insert,
        )
        .unwrap();
        // Transaction 5 is still open; the committed handle lags behind.
        let flushed = s.periodic_flush(-1, SpHandle::new(4)).unwrap();
        assert!(flushed);
        assert_eq!(topend.block_count(), 0);
        assert_eq!(topend.signals(), vec![ControlSignal::NoData]);
    }

    #[test]
    fn flush_releases_fully_committed_block() {
        let (mut s, topend) = stream();
        let row = TestRow::new(b"r");
        s.append_tuple(
            SpHandle::new(0),
            SpHandle::new(5),
            UniqueId::new(50),
            0,
            &row,
            ExportOperation::Insert,
        )
        .unwrap();
        let flushed = s.periodic_flush(-1, SpHandle::new(5)).unwrap();
        assert!(flushed);
        assert_eq!(topend.block_count(), 1);
        let pushed = topend.blocks();
        assert_eq!(pushed[0].signal, BlockSignal::Flush);
        assert_eq!(
            pushed[0].block.meta().committed_sequence_number,
            Some(SequenceNumber::new(1))
        );
        assert!(topend.signals().is_empty());
    }

    #[test]
    fn rollback_reuses_sequence_numbers() {
        let (mut s, topend) = stream();
        let row = TestRow::new(b"r");
        let sp = SpHandle::new(5);
        let uid = UniqueId::new(50);

        s.append_tuple(SpHandle::new(0), sp, uid, 0, &row, ExportOperation::Insert)
            .unwrap();
        let mark = s.write_uso();
        let first_rolled = s.next_sequence_number();
        s.append_tuple(SpHandle::new(0), sp, uid, 0, &row, ExportOperation::Insert)
            .unwrap();
        s.append_tuple(SpHandle::new(0), sp, uid, 0, &row, ExportOperation::Insert)
            .unwrap();

        s.rollback_to(mark, first_rolled).unwrap();
        assert_eq!(s.next_sequence_number(), SequenceNumber::new(2));
        assert_eq!(s.write_uso(), mark);

        let seq = s
            .append_tuple(SpHandle::new(0), sp, uid, 0, &row, ExportOperation::Insert)
            .unwrap();
        assert_eq!(seq, SequenceNumber::new(2));
        s.commit(sp, sp, uid, false, true).unwrap();
        assert_eq!(topend.blocks()[0].block.meta().row_count, 2);
    }

    #[test]
    fn migrated_rows_are_counted_on_the_new_block() {
        // Tiny blocks force a rotation inside the open transaction.
        let (mut s, topend) =
            stream_with_config(StreamConfig::new().default_capacity(128).large_capacity(256));
        let sp = SpHandle::new(5);
        let uid = UniqueId::new(50);
        let row = TestRow::new(&[9u8; 20]);

        // One committed transaction fills part of the first block.
        s.append_tuple(SpHandle::new(0), SpHandle::new(4), UniqueId::new(40), 0, &row, ExportOperation::Insert)
            .unwrap();
        // The next transaction's rows spill into a fresh block.
        for _ in 0..2 {
            s.append_tuple(SpHandle::new(4), sp, uid, 0, &row, ExportOperation::Insert)
                .unwrap();
        }
        s.commit(sp, sp, uid, false, true).unwrap();

        let pushed = topend.blocks();
        let total_rows: u32 = pushed.iter().map(|p| p.block.meta().row_count).sum();
        assert_eq!(total_rows, 3);
        // Every pushed block's sequence range is internally consistent.
        let mut next_expected = 1;
        for p in &pushed {
            let meta = p.block.meta();
            if meta.row_count == 0 {
                continue;
            }
            assert_eq!(
                meta.start_sequence_number,
                Some(SequenceNumber::new(next_expected))
            );
            next_expected += i64::from(meta.row_count);
        }
        assert_eq!(next_expected, 4);
    }

    #[test]
    fn end_generation_signals_after_draining() {
        let (mut s, topend) = stream();
        let row = TestRow::new(b"r");
        s.append_tuple(
            SpHandle::new(0),
            SpHandle::new(5),
            UniqueId::new(50),
            0,
            &row,
            ExportOperation::Insert,
        )
        .unwrap();
        s.commit(SpHandle::new(5), SpHandle::new(5), UniqueId::new(50), false, false)
            .unwrap();
        s.end_generation().unwrap();

        assert_eq!(topend.block_count(), 1);
        assert_eq!(topend.signals(), vec![ControlSignal::EndOfGeneration]);
    }

    #[test]
    fn oversized_row_overflows_without_writing() {
        let (mut s, _topend) =
            stream_with_config(StreamConfig::new().default_capacity(64).large_capacity(128));
        let row = TestRow::new(&[0u8; 200]);
        let err = s
            .append_tuple(
                SpHandle::new(0),
                SpHandle::new(5),
                UniqueId::new(50),
                0,
                &row,
                ExportOperation::Insert,
            )
            .unwrap_err();
        assert!(matches!(err, StreamError::Overflow { .. }));
        assert_eq!(s.write_uso(), 0);
        assert_eq!(s.next_sequence_number(), SequenceNumber::new(1));
    }
}
