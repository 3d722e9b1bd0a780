//! Disaster-recovery replication stream.
//!
//! Frames transactions into the versioned binary replication log:
//! `[protocolVersion u8][recordType u8]` followed by the record body. A
//! transaction opens with a `BeginTxn` record whose hash flag, byte length,
//! and first partition hash are reserved and patched at commit time, and
//! closes with an `EndTxn` record whose CRC32C over the whole transaction
//! extent is patched last. Framing violations poison the stream: the
//! triggering call fails and every later append returns
//! [`StreamError::Poisoned`] until an explicit [`DrTupleStream::rearm`].

use crate::block::{BlockMeta, FinishedBlock};
use crate::chain::BufferChain;
use crate::config::StreamConfig;
use crate::error::{StreamError, StreamResult};
use crate::topend::{BlockSignal, Topend};
use crate::tuple::{PartitionHasher, StreamTuple};
use crate::types::{SequenceNumber, SpHandle, StreamIdentity, TableHandle, UniqueId, Uso};

/// Protocol version emitted by [`ActiveDrWire`].
pub const DR_PROTOCOL_VERSION: u8 = 8;
/// Protocol version emitted by [`CompatibleDrWire`] for older peers.
pub const DR_COMPATIBLE_PROTOCOL_VERSION: u8 = 7;

/// Sentinel partition hash for table truncates, which have no partition
/// affinity.
pub const TRUNCATE_HASH: i32 = i32::MIN;
/// Partition hash recorded for rows of replicated tables.
pub const REPLICATED_HASH: i32 = 0;

const BEGIN_RECORD_SIZE: usize = 27;
const END_RECORD_SIZE: usize = 14;
const DELIMITER_SIZE: usize = 6;
const ROW_HEADER_SIZE: usize = 14;

// Reserved slot positions relative to the begin record's first byte.
const HASH_FLAG_OFFSET: u64 = 18;
const TXN_LENGTH_OFFSET: u64 = 19;
const FIRST_HASH_OFFSET: u64 = 23;
// CRC slot position relative to the end record's first byte.
const CRC_OFFSET: u64 = 10;

/// Record type byte of a replication record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DrRecordType {
    /// Row insert.
    Insert = 1,
    /// Row delete.
    Delete = 2,
    /// Row update carrying old and new images.
    Update = 3,
    /// Transaction open.
    BeginTxn = 4,
    /// Transaction close.
    EndTxn = 5,
    /// Whole-table truncate.
    TruncateTable = 6,
    /// Partition hash changed between consecutive rows.
    HashDelimiter = 7,
    /// Out-of-band control event.
    Event = 8,
}

impl DrRecordType {
    /// Wire byte for this record type.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Parses a wire byte.
    #[must_use]
    pub const fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Insert),
            2 => Some(Self::Delete),
            3 => Some(Self::Update),
            4 => Some(Self::BeginTxn),
            5 => Some(Self::EndTxn),
            6 => Some(Self::TruncateTable),
            7 => Some(Self::HashDelimiter),
            8 => Some(Self::Event),
            _ => None,
        }
    }
}

/// Per-transaction partition classification patched into the begin record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TxnHashFlag {
    /// No rows appended yet.
    #[default]
    Placeholder = 0,
    /// Every row targeted a replicated table.
    Replicated = 1,
    /// All rows hashed to a single partition.
    Single = 2,
    /// Rows hashed to more than one partition.
    Multi = 3,
    /// The transaction contains a table truncate.
    Special = 4,
}

impl TxnHashFlag {
    /// Wire byte for this flag.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Out-of-band event kinds carried by [`DrRecordType::Event`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DrEventType {
    /// Schema changed.
    CatalogUpdate = 1,
    /// Replication stream starting.
    StreamStart = 2,
    /// Replication stream ending.
    StreamEnd = 3,
    /// Partition ownership moved.
    ElasticRebalance = 4,
    /// Table contents swapped.
    SwapTable = 5,
}

impl DrEventType {
    /// Wire byte for this event type.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Selects the protocol version byte stamped on every record.
pub trait DrWireFormat {
    /// Version byte for this wire format.
    fn protocol_version(&self) -> u8;
}

/// Current wire format.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActiveDrWire;

impl DrWireFormat for ActiveDrWire {
    fn protocol_version(&self) -> u8 {
        DR_PROTOCOL_VERSION
    }
}

/// Frozen previous wire format for clusters that have not upgraded.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompatibleDrWire;

impl DrWireFormat for CompatibleDrWire {
    fn protocol_version(&self) -> u8 {
        DR_COMPATIBLE_PROTOCOL_VERSION
    }
}

/// Replication block metadata consumed by the downstream cluster for
/// dedup and resume.
#[derive(Debug, Clone, Default)]
pub struct DrBlockMeta {
    /// Whether any transaction completed inside this block.
    pub has_begin_txn: bool,
    /// Offset within the block of the last completed transaction's begin
    /// record.
    pub last_begin_txn_offset: usize,
    /// Rows carried by transactions completed in this block.
    pub row_count: u32,
    /// Sequence number of the first transaction completed in this block.
    pub start_sequence_number: Option<SequenceNumber>,
    /// Sequence number of the last transaction completed in this block.
    pub last_sequence_number: Option<SequenceNumber>,
    /// Unique id of the last multi-partition transaction in this block.
    pub last_mp_unique_id: Option<UniqueId>,
    /// Event type, when this block carries an out-of-band event.
    pub event_type: Option<DrEventType>,
}

impl BlockMeta for DrBlockMeta {
    // Reserved region at the front of every replication block, zero
    // filled; the shipping layer fills it when the block goes out.
    const HEADER_SIZE: usize = 8;
}

/// Accounting snapshot taken at the stream offset a row starts at, so a
/// rollback into the transaction body can restore the classification state
/// the rolled-back rows changed.
#[derive(Debug, Clone, Copy)]
struct RowMark {
    uso: Uso,
    row_count: u32,
    first_hash: Option<i32>,
    last_hash: Option<i32>,
    flag: TxnHashFlag,
}

struct OpenTxn {
    sequence_number: SequenceNumber,
    sp_handle: SpHandle,
    unique_id: UniqueId,
    begin_uso: Uso,
    row_count: u32,
    first_hash: Option<i32>,
    last_hash: Option<i32>,
    flag: TxnHashFlag,
    marks: Vec<RowMark>,
}

/// Append-only replication stream for one partition.
pub struct DrTupleStream {
    chain: BufferChain<DrBlockMeta>,
    topend: Box<dyn Topend<DrBlockMeta>>,
    identity: StreamIdentity,
    wire: Box<dyn DrWireFormat>,
    hasher: Box<dyn PartitionHasher>,
    open_sequence_number: SequenceNumber,
    committed_sequence_number: SequenceNumber,
    txn: Option<OpenTxn>,
    poisoned: Option<String>,
}

impl DrTupleStream {
    /// Creates a stream writing the given wire format.
    #[must_use]
    pub fn new(
        identity: StreamIdentity,
        config: StreamConfig,
        wire: Box<dyn DrWireFormat>,
        hasher: Box<dyn PartitionHasher>,
        topend: Box<dyn Topend<DrBlockMeta>>,
    ) -> Self {
        Self {
            chain: BufferChain::new(config),
            topend,
            identity,
            wire,
            hasher,
            open_sequence_number: SequenceNumber::default(),
            committed_sequence_number: SequenceNumber::default(),
            txn: None,
            poisoned: None,
        }
    }

    /// Stream identity.
    #[must_use]
    pub fn identity(&self) -> &StreamIdentity {
        &self.identity
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

    /// Sequence number of the last completed transaction.
    #[must_use]
    pub fn committed_sequence_number(&self) -> SequenceNumber {
        self.committed_sequence_number
    }

    /// Sequence number of the open transaction, equal to the committed one
    /// when no transaction is open.
    #[must_use]
    pub fn open_sequence_number(&self) -> SequenceNumber {
        self.open_sequence_number
    }

    /// Whether the stream has been poisoned by a framing violation.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    fn guard(&self) -> StreamResult<()> {
        if self.poisoned.is_some() {
            return Err(StreamError::Poisoned);
        }
        Ok(())
    }

    fn poison(&mut self, message: String) -> StreamError {
        tracing::error!(stream = %self.identity, %message, "replication stream poisoned");
        self.poisoned = Some(message.clone());
        StreamError::ProtocolViolation { message }
    }

    /// Validates transaction identifiers, opening a new transaction when
    /// none is open.
    fn transaction_checks(
        &mut self,
        last_committed_sp: SpHandle,
        sp_handle: SpHandle,
        unique_id: UniqueId,
    ) -> StreamResult<()> {
        self.guard()?;
        match &self.txn {
            Some(t) => {
                let (open_sp, open_uid) = (t.sp_handle, t.unique_id);
                if open_sp != sp_handle || open_uid != unique_id {
                    return Err(self.poison(format!(
                        "append for {sp_handle}/{unique_id} while {open_sp}/{open_uid} is open"
                    )));
                }
                Ok(())
            }
            None => {
                let outcome = self.chain.commit(last_committed_sp, sp_handle, unique_id)?;
                if outcome.advanced() {
                    self.push_pending(BlockSignal::Committed, false)?;
                }
                self.begin_transaction(sp_handle, unique_id)
            }
        }
    }

    fn begin_transaction(&mut self, sp_handle: SpHandle, unique_id: UniqueId) -> StreamResult<()> {
        let sequence = self.committed_sequence_number.next();
        self.ensure_txn_space(BEGIN_RECORD_SIZE)?;

        if let Some(last) = self
            .chain
            .current_block()
            .and_then(|b| b.meta().last_sequence_number)
        {
            if last.next() != sequence {
                return Err(self.poison(format!(
                    "sequence gap: block ends at {last}, next transaction is {sequence}"
                )));
            }
        }

        let begin_uso = self.chain.write_uso();
        let version = self.wire.protocol_version();
        self.chain.with_writer(|w| {
            w.write_u8(version)?;
            w.write_u8(DrRecordType::BeginTxn.as_byte())?;
            w.write_i64(sequence.as_i64())?;
            w.write_i64(unique_id.as_i64())?;
            let _ = w.reserve(1)?; // hash flag
            let _ = w.reserve(4)?; // transaction length
            let _ = w.reserve(4)?; // first partition hash
            Ok(())
        })?;

        self.open_sequence_number = sequence;
        self.txn = Some(OpenTxn {
            sequence_number: sequence,
            sp_handle,
            unique_id,
            begin_uso,
            row_count: 0,
            first_hash: None,
            last_hash: None,
            flag: TxnHashFlag::Placeholder,
            marks: Vec::new(),
        });
        Ok(())
    }

    /// Reserves space for the open transaction, rolling it back when even a
    /// large block cannot hold it.
    fn ensure_txn_space(&mut self, len: usize) -> StreamResult<()> {
        match self.chain.ensure_capacity(len) {
            Err(err @ StreamError::Overflow { .. }) => {
                if let Some(t) = self.txn.take() {
                    tracing::warn!(
                        stream = %self.identity,
                        sequence = %t.sequence_number,
                        "oversized transaction rolled back"
                    );
                    self.chain.rollback_to(t.begin_uso)?;
                    self.open_sequence_number = self.committed_sequence_number;
                }
                Err(err)
            }
            other => other,
        }
    }

    /// Snapshots the transaction's accounting at the offset the next row
    /// (delimiter included) starts at.
    fn mark_row(&mut self) {
        let uso = self.chain.write_uso();
        if let Some(t) = self.txn.as_mut() {
            t.marks.push(RowMark {
                uso,
                row_count: t.row_count,
                first_hash: t.first_hash,
                last_hash: t.last_hash,
                flag: t.flag,
            });
        }
    }

    fn note_row(&mut self, hash: i32, replicated: bool) {
        let Some(t) = self.txn.as_mut() else { return };
        t.row_count += 1;
        if t.first_hash.is_none() {
            t.first_hash = Some(hash);
        }
        t.last_hash = Some(hash);
        t.flag = match t.flag {
            TxnHashFlag::Placeholder => {
                if replicated {
                    TxnHashFlag::Replicated
                } else {
                    TxnHashFlag::Single
                }
            }
            TxnHashFlag::Single => {
                if t.first_hash == Some(hash) {
                    TxnHashFlag::Single
                } else {
                    TxnHashFlag::Multi
                }
            }
            flag => flag,
        };
    }

    fn row_hash(&self, tuple: &dyn StreamTuple) -> (i32, bool) {
        match tuple.partition_key() {
            Some(key) => (self.hasher.hash(key), false),
            None => (REPLICATED_HASH, true),
        }
    }

    fn delimiter_size(&self, hash: i32) -> usize {
        let needs = self
            .txn
            .as_ref()
            .and_then(|t| t.last_hash)
            .is_some_and(|last| last != hash);
        if needs {
            DELIMITER_SIZE
        } else {
            0
        }
    }

    fn write_delimiter(&mut self, hash: i32) -> StreamResult<()> {
        let version = self.wire.protocol_version();
        self.chain.with_writer(|w| {
            w.write_u8(version)?;
            w.write_u8(DrRecordType::HashDelimiter.as_byte())?;
            w.write_i32(hash)?;
            Ok(())
        })
    }

    /// Appends one insert or delete record to the open transaction, opening
    /// it first when necessary.
    ///
    /// # Errors
    ///
    /// [`StreamError::Overflow`] when the transaction exceeds the large
    /// block capacity; the partial transaction has been rolled back and the
    /// stream accepts the next one. Framing violations poison the stream.
    pub fn append_tuple(
        &mut self,
        last_committed_sp: SpHandle,
        sp_handle: SpHandle,
        unique_id: UniqueId,
        table: TableHandle,
        tuple: &dyn StreamTuple,
        record_type: DrRecordType,
    ) -> StreamResult<()> {
        debug_assert!(matches!(
            record_type,
            DrRecordType::Insert | DrRecordType::Delete
        ));
        self.transaction_checks(last_committed_sp, sp_handle, unique_id)?;

        let (hash, replicated) = self.row_hash(tuple);
        let delimiter = self.delimiter_size(hash);
        let bitmap_len = tuple.visible_column_count().div_ceil(8);
        let needed =
            delimiter + ROW_HEADER_SIZE + bitmap_len + tuple.max_serialized_size();
        self.ensure_txn_space(needed)?;
        self.mark_row();

        if delimiter > 0 {
            self.write_delimiter(hash)?;
        }
        let version = self.wire.protocol_version();
        self.chain.with_writer(|w| {
            w.write_u8(version)?;
            w.write_u8(record_type.as_byte())?;
            w.write_i64(table.as_i64())?;
            let len_slot = w.reserve(4)?;
            let image_start = w.position();
            let bitmap = w.reserve(bitmap_len)?;
            tuple.serialize_to_dr(w, bitmap, 0)?;
            w.patch_i32(len_slot, (w.position() - image_start) as i32)?;
            Ok(())
        })?;
        self.note_row(hash, replicated);
        Ok(())
    }

    /// Appends an update record carrying the old and new row images.
    ///
    /// Partition hashing follows the new image.
    pub fn append_update_record(
        &mut self,
        last_committed_sp: SpHandle,
        sp_handle: SpHandle,
        unique_id: UniqueId,
        table: TableHandle,
        old_tuple: &dyn StreamTuple,
        new_tuple: &dyn StreamTuple,
    ) -> StreamResult<()> {
        self.transaction_checks(last_committed_sp, sp_handle, unique_id)?;

        let (hash, replicated) = self.row_hash(new_tuple);
        let delimiter = self.delimiter_size(hash);
        let old_bitmap_len = old_tuple.visible_column_count().div_ceil(8);
        let new_bitmap_len = new_tuple.visible_column_count().div_ceil(8);
        let needed = delimiter
            + ROW_HEADER_SIZE
            + old_bitmap_len
            + old_tuple.max_serialized_size()
            + 4
            + new_bitmap_len
            + new_tuple.max_serialized_size();
        self.ensure_txn_space(needed)?;
        self.mark_row();

        if delimiter > 0 {
            self.write_delimiter(hash)?;
        }
        let version = self.wire.protocol_version();
        self.chain.with_writer(|w| {
            w.write_u8(version)?;
            w.write_u8(DrRecordType::Update.as_byte())?;
            w.write_i64(table.as_i64())?;

            let old_slot = w.reserve(4)?;
            let old_start = w.position();
            let old_bitmap = w.reserve(old_bitmap_len)?;
            old_tuple.serialize_to_dr(w, old_bitmap, 0)?;
            w.patch_i32(old_slot, (w.position() - old_start) as i32)?;

            let new_slot = w.reserve(4)?;
            let new_start = w.position();
            let new_bitmap = w.reserve(new_bitmap_len)?;
            new_tuple.serialize_to_dr(w, new_bitmap, 0)?;
            w.patch_i32(new_slot, (w.position() - new_start) as i32)?;
            Ok(())
        })?;
        self.note_row(hash, replicated);
        Ok(())
    }

    /// Appends a whole-table truncate record. The transaction becomes
    /// special and the row carries the sentinel hash, so surrounding rows
    /// get delimiters on the way in and out.
    pub fn truncate_table(
        &mut self,
        last_committed_sp: SpHandle,
        sp_handle: SpHandle,
        unique_id: UniqueId,
        table: TableHandle,
        table_name: &str,
    ) -> StreamResult<()> {
        self.transaction_checks(last_committed_sp, sp_handle, unique_id)?;

        let delimiter = self.delimiter_size(TRUNCATE_HASH);
        let needed = delimiter + 2 + 8 + 4 + table_name.len();
        self.ensure_txn_space(needed)?;
        self.mark_row();

        if delimiter > 0 {
            self.write_delimiter(TRUNCATE_HASH)?;
        }
        let version = self.wire.protocol_version();
        self.chain.with_writer(|w| {
            w.write_u8(version)?;
            w.write_u8(DrRecordType::TruncateTable.as_byte())?;
            w.write_i64(table.as_i64())?;
            w.write_var_bytes(table_name.as_bytes())?;
            Ok(())
        })?;
        self.note_row(TRUNCATE_HASH, false);
        if let Some(t) = self.txn.as_mut() {
            t.flag = TxnHashFlag::Special;
        }
        Ok(())
    }

    /// Closes the open transaction: writes the end record, patches the
    /// begin record's reserved slots, and patches the CRC32C over the whole
    /// transaction extent last.
    ///
    /// Returns the transaction's sequence number.
    pub fn end_transaction(
        &mut self,
        sp_handle: SpHandle,
        unique_id: UniqueId,
    ) -> StreamResult<SequenceNumber> {
        self.guard()?;
        match &self.txn {
            None => {
                return Err(self.poison(format!(
                    "end of {sp_handle}/{unique_id} without an open transaction"
                )));
            }
            Some(t) => {
                let (open_sp, open_uid) = (t.sp_handle, t.unique_id);
                if open_sp != sp_handle || open_uid != unique_id {
                    return Err(self.poison(format!(
                        "end of {sp_handle}/{unique_id} does not match open {open_sp}/{open_uid}"
                    )));
                }
            }
        }
        self.ensure_txn_space(END_RECORD_SIZE)?;
        let Some(t) = self.txn.take() else {
            return Err(StreamError::protocol_violation("transaction vanished"));
        };

        let end_base = self.chain.write_uso();
        let crc_at = end_base + CRC_OFFSET;
        let version = self.wire.protocol_version();
        let sequence = t.sequence_number;
        self.chain.with_writer(|w| {
            w.write_u8(version)?;
            w.write_u8(DrRecordType::EndTxn.as_byte())?;
            w.write_i64(sequence.as_i64())?;
            let _ = w.reserve(4)?; // CRC32C
            Ok(())
        })?;

        let txn_length = (self.chain.write_uso() - t.begin_uso) as i32;
        let block = self
            .chain
            .current_block_mut()
            .ok_or_else(|| StreamError::protocol_violation("no current block at end"))?;
        block.patch_u8_at(t.begin_uso + HASH_FLAG_OFFSET, t.flag.as_byte())?;
        block.patch_i32_at(t.begin_uso + TXN_LENGTH_OFFSET, txn_length)?;
        block.patch_i32_at(
            t.begin_uso + FIRST_HASH_OFFSET,
            t.first_hash.unwrap_or(REPLICATED_HASH),
        )?;
        let crc = block.crc32c_of(t.begin_uso, crc_at)?;
        block.patch_u32_at(crc_at, crc)?;

        let begin_offset = (t.begin_uso - block.uso()) as usize;
        let meta = block.meta_mut();
        meta.has_begin_txn = true;
        meta.last_begin_txn_offset = begin_offset;
        meta.row_count += t.row_count;
        if meta.start_sequence_number.is_none() {
            meta.start_sequence_number = Some(sequence);
        }
        meta.last_sequence_number = Some(sequence);
        if unique_id.is_multi_partition() {
            meta.last_mp_unique_id = Some(unique_id);
        }

        self.committed_sequence_number = sequence;
        self.open_sequence_number = sequence;
        self.chain.commit_open_transaction();
        self.push_pending(BlockSignal::Committed, false)?;
        Ok(sequence)
    }

    /// Writes an out-of-band control event into its own block and hands it
    /// off immediately.
    ///
    /// # Errors
    ///
    /// Poisons the stream when a transaction is open.
    pub fn generate_dr_event(
        &mut self,
        event_type: DrEventType,
        unique_id: UniqueId,
        payload: &[u8],
    ) -> StreamResult<()> {
        self.guard()?;
        if self.txn.is_some() {
            return Err(self.poison(format!(
                "event {event_type:?} generated inside an open transaction"
            )));
        }

        let size = 2 + 1 + 8 + 4 + payload.len();
        // The event must own its block: rotate any written bytes out first.
        if self.chain.current_block().is_some_and(|b| b.offset() > 0) {
            self.chain.extend_buffer_chain(size)?;
        } else {
            self.chain.ensure_capacity(size)?;
        }

        let version = self.wire.protocol_version();
        self.chain.with_writer(|w| {
            w.write_u8(version)?;
            w.write_u8(DrRecordType::Event.as_byte())?;
            w.write_u8(event_type.as_byte())?;
            w.write_i64(unique_id.as_i64())?;
            w.write_var_bytes(payload)?;
            Ok(())
        })?;
        if let Some(block) = self.chain.current_block_mut() {
            block.meta_mut().event_type = Some(event_type);
        }
        self.chain.commit_open_transaction();
        self.chain.extend_buffer_chain(0)?;
        self.push_pending(BlockSignal::Committed, true)?;
        tracing::debug!(stream = %self.identity, ?event_type, "replication event shipped");
        Ok(())
    }

    /// Discards everything written past `mark`. A rollback at or before the
    /// open transaction's begin record closes it; a rollback into the
    /// transaction body restores the row accounting recorded at the mark, so
    /// the bytes produced afterward match a stream that never saw the
    /// rolled-back rows.
    pub fn rollback_to(&mut self, mark: Uso) -> StreamResult<()> {
        self.guard()?;
        self.chain.rollback_to(mark)?;
        if self.txn.as_ref().is_some_and(|t| mark <= t.begin_uso) {
            self.txn = None;
            self.open_sequence_number = self.committed_sequence_number;
        } else if let Some(t) = self.txn.as_mut() {
            if let Some(i) = t.marks.iter().position(|m| m.uso >= mark) {
                let m = t.marks[i];
                t.row_count = m.row_count;
                t.first_hash = m.first_hash;
                t.last_hash = m.last_hash;
                t.flag = m.flag;
                t.marks.truncate(i);
            }
        }
        Ok(())
    }

    /// Age-bound flush. Permitted while poisoned so already committed bytes
    /// still drain. Negative `current_time_us` forces the flush.
    pub fn periodic_flush(
        &mut self,
        current_time_us: i64,
        last_committed_sp: SpHandle,
    ) -> StreamResult<bool> {
        let flushed = self.chain.periodic_flush(current_time_us, last_committed_sp)?;
        if flushed {
            self.push_pending(BlockSignal::Flush, false)?;
        }
        Ok(flushed)
    }

    /// Clears a poisoned state: the uncommitted tail is rolled back and
    /// open identifiers are re-derived from committed state. The next
    /// append starts a fresh transaction.
    pub fn rearm(&mut self) -> StreamResult<()> {
        self.chain.rollback_to(self.chain.committed_uso())?;
        self.txn = None;
        self.open_sequence_number = self.committed_sequence_number;
        self.poisoned = None;
        Ok(())
    }

    fn push_pending(&mut self, signal: BlockSignal, sync: bool) -> StreamResult<()> {
        for block in self.chain.take_committed_pending() {
            let finished: FinishedBlock<DrBlockMeta> = block.finish()?;
            self.topend.push_block(&self.identity, finished, signal, sync);
        }
        Ok(())
    }
}
