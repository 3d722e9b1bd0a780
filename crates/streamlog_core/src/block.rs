//! Stream blocks: fixed-capacity buffer segments with USO bookkeeping.
//!
//! A [`StreamBlock`] is one exclusively owned buffer segment in a stream's
//! chain. It reserves a protocol-specific header region at the front
//! (written lazily at [`StreamBlock::finish`] time) and tracks how many
//! payload bytes have been consumed. Blocks are created by the buffer
//! chain, mutated only by their owning stream, and become immutable
//! [`FinishedBlock`]s when handed to the external consumer.

use crate::error::{StreamError, StreamResult};
use crate::types::{SequenceNumber, SpHandle, UniqueId, Uso};
use bytes::{Bytes, BytesMut};
use streamlog_codec::{CodecResult, Writer};

/// Protocol-specific block metadata.
///
/// Implementations carry the per-block bookkeeping a downstream consumer
/// needs for dedup and resume, and may finalize a header region once the
/// block's full row count and timestamps are known.
pub trait BlockMeta: Default + std::fmt::Debug {
    /// Bytes reserved at the front of every block for this protocol.
    const HEADER_SIZE: usize;

    /// Finalizes the header region. The default implementation leaves the
    /// zero-filled reservation untouched; formats whose header depends on
    /// accumulated row metadata override it.
    fn write_out_header(&self, _header: &mut [u8], _payload: &[u8]) -> CodecResult<()> {
        Ok(())
    }
}

/// Plain block with no header and no protocol metadata.
impl BlockMeta for () {
    const HEADER_SIZE: usize = 0;
}

/// Whether a block was allocated at the default or the large capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    /// Default-capacity block.
    Normal,
    /// Promoted block for a transaction that did not fit the default size.
    Large,
}

/// One fixed-capacity buffer segment of a stream.
///
/// The block's payload footprint is `[uso, uso + offset)` in stream
/// coordinates. Reserve-then-patch slots are addressed by USO so they stay
/// valid when a partial transaction migrates to a new block.
#[derive(Debug)]
pub struct StreamBlock<M: BlockMeta> {
    buf: BytesMut,
    uso: Uso,
    offset: usize,
    block_type: BlockType,
    last_committed_sp_handle: SpHandle,
    last_sp_unique_id: UniqueId,
    meta: M,
}

impl<M: BlockMeta> StreamBlock<M> {
    /// Allocates a zeroed block of `capacity` total bytes (header included)
    /// whose first payload byte sits at `uso`.
    pub fn new(capacity: usize, uso: Uso, block_type: BlockType) -> Self {
        debug_assert!(capacity > M::HEADER_SIZE);
        Self {
            buf: BytesMut::zeroed(capacity),
            uso,
            offset: 0,
            block_type,
            last_committed_sp_handle: SpHandle::default(),
            last_sp_unique_id: UniqueId::default(),
            meta: M::default(),
        }
    }

    /// USO of the first payload byte.
    #[must_use]
    pub fn uso(&self) -> Uso {
        self.uso
    }

    /// USO one past the last consumed payload byte.
    #[must_use]
    pub fn end_uso(&self) -> Uso {
        self.uso + self.offset as u64
    }

    /// Payload bytes consumed so far.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Total payload capacity (header excluded).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.len() - M::HEADER_SIZE
    }

    /// Payload bytes still writable.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity() - self.offset
    }

    /// Whether the block was allocated at default or large capacity.
    #[must_use]
    pub fn block_type(&self) -> BlockType {
        self.block_type
    }

    /// Protocol metadata.
    pub fn meta(&self) -> &M {
        &self.meta
    }

    /// Mutable protocol metadata.
    pub fn meta_mut(&mut self) -> &mut M {
        &mut self.meta
    }

    /// Last committed handle stamped on this block.
    #[must_use]
    pub fn last_committed_sp_handle(&self) -> SpHandle {
        self.last_committed_sp_handle
    }

    /// Last completed unique id stamped on this block.
    #[must_use]
    pub fn last_sp_unique_id(&self) -> UniqueId {
        self.last_sp_unique_id
    }

    /// Stamps the unique id of the most recently completed transaction,
    /// consumed by downstream dedup logic.
    pub fn record_completed_unique_id(&mut self, unique_id: UniqueId) {
        self.last_sp_unique_id = unique_id;
    }

    /// Stamps the last committed handle, consumed by downstream resume
    /// logic.
    pub fn record_last_committed_sp_handle(&mut self, sp_handle: SpHandle) {
        self.last_committed_sp_handle = sp_handle;
    }

    /// Returns a writer over the unconsumed payload region.
    ///
    /// Callers advance the block with [`StreamBlock::consumed`] once the
    /// writer's position is final.
    pub fn writer(&mut self) -> Writer<'_> {
        Writer::new(&mut self.buf[M::HEADER_SIZE + self.offset..])
    }

    /// Advances the write offset by `n` bytes.
    pub fn consumed(&mut self, n: usize) {
        debug_assert!(self.offset + n <= self.capacity());
        self.offset += n;
    }

    /// Rewinds the write offset to correspond to the global USO `mark`.
    ///
    /// # Errors
    ///
    /// Protocol violation if the mark falls before this block's USO or past
    /// its current offset.
    pub fn truncate_to(&mut self, mark: Uso) -> StreamResult<()> {
        if mark < self.uso || mark > self.end_uso() {
            return Err(StreamError::protocol_violation(format!(
                "truncate mark {mark} outside block extent [{}, {}]",
                self.uso,
                self.end_uso()
            )));
        }
        self.offset = (mark - self.uso) as usize;
        Ok(())
    }

    /// Returns true if `at` falls inside the consumed payload.
    #[must_use]
    pub fn contains(&self, at: Uso) -> bool {
        at >= self.uso && at < self.end_uso()
    }

    fn index_of(&self, at: Uso, len: usize) -> StreamResult<usize> {
        if at < self.uso || at + len as u64 > self.end_uso() {
            return Err(StreamError::protocol_violation(format!(
                "patch of {len} bytes at {at} outside block extent [{}, {})",
                self.uso,
                self.end_uso()
            )));
        }
        Ok(M::HEADER_SIZE + (at - self.uso) as usize)
    }

    /// Patches one byte previously reserved at stream offset `at`.
    pub fn patch_u8_at(&mut self, at: Uso, v: u8) -> StreamResult<()> {
        let i = self.index_of(at, 1)?;
        self.buf[i] = v;
        Ok(())
    }

    /// Patches a big-endian i32 previously reserved at stream offset `at`.
    pub fn patch_i32_at(&mut self, at: Uso, v: i32) -> StreamResult<()> {
        let i = self.index_of(at, 4)?;
        self.buf[i..i + 4].copy_from_slice(&v.to_be_bytes());
        Ok(())
    }

    /// Patches a big-endian u32 previously reserved at stream offset `at`.
    pub fn patch_u32_at(&mut self, at: Uso, v: u32) -> StreamResult<()> {
        let i = self.index_of(at, 4)?;
        self.buf[i..i + 4].copy_from_slice(&v.to_be_bytes());
        Ok(())
    }

    /// Consumed payload bytes between two stream offsets.
    pub fn payload_between(&self, from: Uso, to: Uso) -> StreamResult<&[u8]> {
        if from < self.uso || to > self.end_uso() || from > to {
            return Err(StreamError::protocol_violation(format!(
                "range [{from}, {to}) outside block extent [{}, {})",
                self.uso,
                self.end_uso()
            )));
        }
        let start = M::HEADER_SIZE + (from - self.uso) as usize;
        let end = M::HEADER_SIZE + (to - self.uso) as usize;
        Ok(&self.buf[start..end])
    }

    /// CRC32C over the consumed payload between two stream offsets.
    pub fn crc32c_of(&self, from: Uso, to: Uso) -> StreamResult<u32> {
        Ok(crc32c::crc32c(self.payload_between(from, to)?))
    }

    /// Full consumed payload.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.buf[M::HEADER_SIZE..M::HEADER_SIZE + self.offset]
    }

    /// Finalizes the header and converts the block into its immutable
    /// hand-off form. Ownership of the backing memory moves with the
    /// returned value.
    pub fn finish(mut self) -> CodecResult<FinishedBlock<M>> {
        let offset = self.offset;
        {
            let (header, payload) = self.buf.split_at_mut(M::HEADER_SIZE);
            self.meta.write_out_header(header, &payload[..offset])?;
        }
        self.buf.truncate(M::HEADER_SIZE + offset);
        Ok(FinishedBlock {
            data: self.buf.freeze(),
            uso: self.uso,
            block_type: self.block_type,
            last_committed_sp_handle: self.last_committed_sp_handle,
            last_sp_unique_id: self.last_sp_unique_id,
            meta: self.meta,
        })
    }
}

/// An immutable block handed to the external consumer.
///
/// The frozen buffer can no longer be reached from the stream that produced
/// it; releasing the memory is the consumer's responsibility.
#[derive(Debug, Clone)]
pub struct FinishedBlock<M: BlockMeta> {
    data: Bytes,
    uso: Uso,
    block_type: BlockType,
    last_committed_sp_handle: SpHandle,
    last_sp_unique_id: UniqueId,
    meta: M,
}

impl<M: BlockMeta> FinishedBlock<M> {
    /// Raw bytes: finalized header followed by payload.
    #[must_use]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Finalized header region.
    #[must_use]
    pub fn header(&self) -> &[u8] {
        &self.data[..M::HEADER_SIZE]
    }

    /// Payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.data[M::HEADER_SIZE..]
    }

    /// USO of the first payload byte.
    #[must_use]
    pub fn uso(&self) -> Uso {
        self.uso
    }

    /// USO one past the last payload byte.
    #[must_use]
    pub fn end_uso(&self) -> Uso {
        self.uso + (self.data.len() - M::HEADER_SIZE) as u64
    }

    /// Whether the block was allocated at default or large capacity.
    #[must_use]
    pub fn block_type(&self) -> BlockType {
        self.block_type
    }

    /// Last committed handle stamped on the block.
    #[must_use]
    pub fn last_committed_sp_handle(&self) -> SpHandle {
        self.last_committed_sp_handle
    }

    /// Last completed unique id stamped on the block.
    #[must_use]
    pub fn last_sp_unique_id(&self) -> UniqueId {
        self.last_sp_unique_id
    }

    /// Protocol metadata.
    pub fn meta(&self) -> &M {
        &self.meta
    }
}

/// Block metadata for topic batches.
///
/// Reserves a fixed batch-header region and fills it from accumulated
/// row/timestamp metadata only at finish time:
/// `[batchLength u32][crc32c u32][rowCount u32][firstTimestamp i64]
/// [lastTimestamp i64]`.
#[derive(Debug, Clone, Default)]
pub struct TopicBlockMeta {
    /// Rows accumulated in this batch.
    pub row_count: u32,
    /// Sequence number of the first row, if any.
    pub start_sequence_number: Option<SequenceNumber>,
    /// Timestamp of the first row.
    pub first_timestamp: i64,
    /// Timestamp of the last row.
    pub last_timestamp: i64,
}

impl TopicBlockMeta {
    /// Records one appended row's timestamp.
    pub fn record_row(&mut self, sequence: SequenceNumber, timestamp: i64) {
        if self.row_count == 0 {
            self.first_timestamp = timestamp;
            self.start_sequence_number = Some(sequence);
        }
        self.row_count += 1;
        self.last_timestamp = timestamp;
    }
}

impl BlockMeta for TopicBlockMeta {
    const HEADER_SIZE: usize = 28;

    fn write_out_header(&self, header: &mut [u8], payload: &[u8]) -> CodecResult<()> {
        let mut w = Writer::new(header);
        w.write_u32(payload.len() as u32)?;
        w.write_u32(crc32c::crc32c(payload))?;
        w.write_u32(self.row_count)?;
        w.write_i64(self.first_timestamp)?;
        w.write_i64(self.last_timestamp)?;
        Ok(())
    }
}

/// A block accumulating one topic batch.
pub type TopicStreamBlock = StreamBlock<TopicBlockMeta>;

#[cfg(test)]
mod tests {
    use super::*;
    use streamlog_codec::Reader;

    #[test]
    fn consume_and_truncate() {
        let mut block: StreamBlock<()> = StreamBlock::new(64, 100, BlockType::Normal);
        {
            let mut w = block.writer();
            w.write_i64(7).unwrap();
            w.write_i64(8).unwrap();
        }
        block.consumed(16);
        assert_eq!(block.end_uso(), 116);
        assert_eq!(block.remaining(), 48);

        block.truncate_to(108).unwrap();
        assert_eq!(block.offset(), 8);
        assert_eq!(block.end_uso(), 108);
    }

    #[test]
    fn truncate_outside_extent_fails() {
        let mut block: StreamBlock<()> = StreamBlock::new(64, 100, BlockType::Normal);
        block.consumed(8);
        assert!(matches!(
            block.truncate_to(99),
            Err(StreamError::ProtocolViolation { .. })
        ));
        assert!(matches!(
            block.truncate_to(109),
            Err(StreamError::ProtocolViolation { .. })
        ));
    }

    #[test]
    fn patch_by_uso() {
        let mut block: StreamBlock<()> = StreamBlock::new(64, 1000, BlockType::Normal);
        {
            let mut w = block.writer();
            w.write_u8(0xaa).unwrap();
            w.reserve(4).unwrap();
        }
        block.consumed(5);
        block.patch_i32_at(1001, -9).unwrap();
        let mut r = Reader::new(block.payload());
        assert_eq!(r.read_u8().unwrap(), 0xaa);
        assert_eq!(r.read_i32().unwrap(), -9);
    }

    #[test]
    fn patch_outside_consumed_region_fails() {
        let mut block: StreamBlock<()> = StreamBlock::new(64, 0, BlockType::Normal);
        block.consumed(2);
        assert!(block.patch_i32_at(0, 1).is_err());
    }

    #[test]
    fn crc_covers_requested_range() {
        let mut block: StreamBlock<()> = StreamBlock::new(64, 0, BlockType::Normal);
        {
            let mut w = block.writer();
            w.write_bytes(b"123456789").unwrap();
        }
        block.consumed(9);
        // Standard CRC32C check value for "123456789".
        assert_eq!(block.crc32c_of(0, 9).unwrap(), 0xe306_9283);
    }

    #[test]
    fn finish_freezes_payload() {
        let mut block: StreamBlock<()> = StreamBlock::new(64, 5, BlockType::Large);
        {
            let mut w = block.writer();
            w.write_bytes(b"xyz").unwrap();
        }
        block.consumed(3);
        block.record_completed_unique_id(UniqueId::new(9));
        let finished = block.finish().unwrap();
        assert_eq!(finished.payload(), b"xyz");
        assert_eq!(finished.uso(), 5);
        assert_eq!(finished.end_uso(), 8);
        assert_eq!(finished.block_type(), BlockType::Large);
        assert_eq!(finished.last_sp_unique_id(), UniqueId::new(9));
    }

    #[test]
    fn topic_header_finalized_at_finish() {
        let mut block = TopicStreamBlock::new(128, 0, BlockType::Normal);
        {
            let mut w = block.writer();
            w.write_bytes(b"rowdata").unwrap();
        }
        block.consumed(7);
        block.meta_mut().record_row(SequenceNumber::new(10), 111);
        block.meta_mut().record_row(SequenceNumber::new(11), 222);

        let finished = block.finish().unwrap();
        let mut r = Reader::new(finished.header());
        assert_eq!(r.read_u32().unwrap(), 7); // batch length
        assert_eq!(r.read_u32().unwrap(), crc32c::crc32c(b"rowdata"));
        assert_eq!(r.read_u32().unwrap(), 2); // row count
        assert_eq!(r.read_i64().unwrap(), 111);
        assert_eq!(r.read_i64().unwrap(), 222);
        assert_eq!(finished.payload(), b"rowdata");
    }
}
