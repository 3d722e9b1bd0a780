//! Scripted end-to-end scenarios across both stream protocols.

use streamlog_core::dr::{ActiveDrWire, DrBlockMeta, DrRecordType, DrTupleStream};
use streamlog_core::export::{ExportBlockMeta, ExportOperation, ExportTupleStream};
use streamlog_core::{
    CollectingTopend, Crc32cHasher, SequenceNumber, SpHandle, StreamConfig, StreamIdentity,
    StreamResult, StreamTuple, TableHandle, UniqueId,
};

/// A replication stream wired to a recording topend.
pub struct DrHarness {
    /// The stream under test.
    pub stream: DrTupleStream,
    /// Recording of everything the stream handed off.
    pub topend: CollectingTopend<DrBlockMeta>,
}

impl DrHarness {
    /// Builds a partition-zero stream with the given configuration.
    #[must_use]
    pub fn new(config: StreamConfig) -> Self {
        let topend = CollectingTopend::new();
        let stream = DrTupleStream::new(
            StreamIdentity::new(0, "scenario"),
            config,
            Box::new(ActiveDrWire),
            Box::new(Crc32cHasher),
            Box::new(topend.clone()),
        );
        Self { stream, topend }
    }

    /// Appends `rows` as one transaction and ends it.
    pub fn run_transaction(
        &mut self,
        sp: i64,
        unique: i64,
        table: i64,
        rows: &[&dyn StreamTuple],
    ) -> StreamResult<SequenceNumber> {
        for row in rows {
            self.stream.append_tuple(
                SpHandle::new(sp - 1),
                SpHandle::new(sp),
                UniqueId::new(unique),
                TableHandle::new(table),
                *row,
                DrRecordType::Insert,
            )?;
        }
        self.stream
            .end_transaction(SpHandle::new(sp), UniqueId::new(unique))
    }

    /// Forces a flush and returns every byte handed off so far.
    pub fn drain(&mut self, sp: i64) -> StreamResult<Vec<u8>> {
        self.stream.periodic_flush(-1, SpHandle::new(sp))?;
        Ok(self.topend.payload_bytes())
    }
}

/// An export stream wired to a recording topend.
pub struct ExportHarness {
    /// The stream under test.
    pub stream: ExportTupleStream,
    /// Recording of everything the stream handed off.
    pub topend: CollectingTopend<ExportBlockMeta>,
}

impl ExportHarness {
    /// Builds a partition-zero stream starting at sequence one.
    #[must_use]
    pub fn new(config: StreamConfig) -> Self {
        let topend = CollectingTopend::new();
        let stream = ExportTupleStream::new(
            StreamIdentity::new(0, "scenario"),
            config,
            7,
            SequenceNumber::new(1),
            Box::new(topend.clone()),
        );
        Self { stream, topend }
    }

    /// Appends `rows` under one transaction and commits it.
    pub fn run_transaction(
        &mut self,
        sp: i64,
        unique: i64,
        rows: &[&dyn StreamTuple],
    ) -> StreamResult<()> {
        for row in rows {
            self.stream.append_tuple(
                SpHandle::new(sp - 1),
                SpHandle::new(sp),
                UniqueId::new(unique),
                0,
                *row,
                ExportOperation::Insert,
            )?;
        }
        self.stream.commit(
            SpHandle::new(sp),
            SpHandle::new(sp),
            UniqueId::new(unique),
            false,
            false,
        )
    }
}
