//! Write-path logging core of a partitioned relational engine.
//!
//! Every mutating transaction appends framed records to per-partition,
//! append-only streams built on a chain of fixed-capacity buffers. Two wire
//! protocols share the chain machinery: the disaster-recovery replication
//! log ([`dr::DrTupleStream`]) and the export / change-data-capture feed
//! ([`export::ExportTupleStream`]). Completed buffers cross a [`Topend`]
//! trait object to the embedding system, which owns all IO.
//!
//! Positions are expressed as universal stream offsets (USO): a per-stream
//! monotone byte count. The committed offset never exceeds the write
//! offset, and bytes below it are immutable.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod block;
pub mod chain;
pub mod config;
pub mod dr;
pub mod error;
pub mod export;
pub mod flush;
pub mod topend;
pub mod tuple;
pub mod types;

pub use block::{BlockMeta, BlockType, FinishedBlock, StreamBlock, TopicBlockMeta};
pub use chain::{BufferChain, CommitOutcome};
pub use config::StreamConfig;
pub use dr::{DrBlockMeta, DrEventType, DrRecordType, DrTupleStream, TxnHashFlag};
pub use error::{StreamError, StreamResult};
pub use export::{ExportBlockMeta, ExportOperation, ExportTupleStream};
pub use flush::FlushCoordinator;
pub use topend::{BlockSignal, CollectingTopend, ControlSignal, Topend};
pub use tuple::{Crc32cHasher, PartitionHasher, StreamTuple};
pub use types::{
    SequenceNumber, SpHandle, StreamId, StreamIdentity, TableHandle, UniqueId, Uso,
};
