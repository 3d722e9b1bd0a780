//! Hand-off boundary between streams and the embedding system.
//!
//! Streams never perform IO. Finished blocks and control signals cross a
//! [`Topend`] trait object owned by the stream; the embedding system
//! decides what durability, networking, or acknowledgment means.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::block::{BlockMeta, FinishedBlock};
use crate::types::StreamIdentity;

/// Why a block is being handed off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSignal {
    /// The block's bytes are fully covered by a commit.
    Committed,
    /// The block was rotated out by an age-bound or forced flush.
    Flush,
}

/// Out-of-band notifications that carry no block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// A flush came due but no fully committed bytes exist to hand off.
    NoData,
    /// The stream is shutting down; no further blocks will follow.
    EndOfGeneration,
}

/// Consumer of finished blocks for one protocol's block metadata.
pub trait Topend<M: BlockMeta> {
    /// Receives an immutable block. `sync` asks the consumer to make the
    /// bytes durable before acknowledging.
    fn push_block(
        &mut self,
        source: &StreamIdentity,
        block: FinishedBlock<M>,
        signal: BlockSignal,
        sync: bool,
    );

    /// Receives a control signal with no block attached.
    fn signal(&mut self, source: &StreamIdentity, signal: ControlSignal);
}

/// A block as recorded by [`CollectingTopend`].
#[derive(Debug, Clone)]
pub struct PushedBlock<M: BlockMeta> {
    /// The handed-off block.
    pub block: FinishedBlock<M>,
    /// Why it was handed off.
    pub signal: BlockSignal,
    /// Whether durability was requested.
    pub sync: bool,
}

#[derive(Debug)]
struct Inner<M: BlockMeta> {
    blocks: Vec<PushedBlock<M>>,
    signals: Vec<ControlSignal>,
}

/// In-memory topend that records everything pushed to it.
///
/// Cloning yields a second handle onto the same recording, so tests can
/// keep one handle while the stream owns the other.
#[derive(Debug)]
pub struct CollectingTopend<M: BlockMeta> {
    inner: Arc<Mutex<Inner<M>>>,
}

impl<M: BlockMeta> Clone for CollectingTopend<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: BlockMeta> Default for CollectingTopend<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: BlockMeta> CollectingTopend<M> {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                blocks: Vec::new(),
                signals: Vec::new(),
            })),
        }
    }

    /// Blocks pushed so far, oldest first.
    #[must_use]
    pub fn blocks(&self) -> Vec<PushedBlock<M>>
    where
        M: Clone,
    {
        self.inner.lock().blocks.clone()
    }

    /// Control signals received so far.
    #[must_use]
    pub fn signals(&self) -> Vec<ControlSignal> {
        self.inner.lock().signals.clone()
    }

    /// Number of blocks pushed so far.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.inner.lock().blocks.len()
    }

    /// Concatenated payload bytes of every pushed block, in push order.
    #[must_use]
    pub fn payload_bytes(&self) -> Vec<u8> {
        let inner = self.inner.lock();
        let mut out = Vec::new();
        for pushed in &inner.blocks {
            out.extend_from_slice(pushed.block.payload());
        }
        out
    }
}

impl<M: BlockMeta> Topend<M> for CollectingTopend<M> {
    fn push_block(
        &mut self,
        _source: &StreamIdentity,
        block: FinishedBlock<M>,
        signal: BlockSignal,
        sync: bool,
    ) {
        self.inner.lock().blocks.push(PushedBlock {
            block,
            signal,
            sync,
        });
    }

    fn signal(&mut self, _source: &StreamIdentity, signal: ControlSignal) {
        self.inner.lock().signals.push(signal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockType, StreamBlock};

    #[test]
    fn recorder_is_shared_across_clones() {
        let recorder: CollectingTopend<()> = CollectingTopend::new();
        let mut handle = recorder.clone();
        let source = StreamIdentity::new(3, "orders");

        let mut block: StreamBlock<()> = StreamBlock::new(16, 0, BlockType::Normal);
        {
            let mut w = block.writer();
            w.write_bytes(b"ab").unwrap();
        }
        block.consumed(2);
        handle.push_block(&source, block.finish().unwrap(), BlockSignal::Committed, true);
        handle.signal(&source, ControlSignal::NoData);

        assert_eq!(recorder.block_count(), 1);
        assert_eq!(recorder.payload_bytes(), b"ab");
        let pushed = recorder.blocks();
        assert_eq!(pushed[0].signal, BlockSignal::Committed);
        assert!(pushed[0].sync);
        assert_eq!(recorder.signals(), vec![ControlSignal::NoData]);
    }
}
