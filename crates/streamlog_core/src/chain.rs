//! The append-only buffer chain shared by every stream flavor.
//!
//! A [`BufferChain`] owns the current write block plus a queue of filled
//! blocks awaiting commit coverage. It tracks the stream's write and commit
//! USOs, migrates uncommitted transaction bytes when a block fills, and
//! enforces the ordering rules around commit and rollback. Protocol framing
//! lives in the stream layers; the chain only moves bytes.

use std::collections::VecDeque;

use crate::block::{BlockMeta, BlockType, StreamBlock};
use crate::config::StreamConfig;
use crate::error::{StreamError, StreamResult};
use crate::types::{SpHandle, UniqueId, Uso};
use streamlog_codec::Writer;

/// What a commit call did to the chain's transaction bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    /// The previously open transaction became committed.
    pub previous_committed: bool,
    /// The transaction named by the call was itself already complete and
    /// committed in the same step.
    pub open_committed: bool,
}

impl CommitOutcome {
    /// True if any transaction transitioned to committed.
    #[must_use]
    pub fn advanced(&self) -> bool {
        self.previous_committed || self.open_committed
    }
}

/// Ordered chain of stream blocks with commit tracking.
#[derive(Debug)]
pub struct BufferChain<M: BlockMeta> {
    config: StreamConfig,
    uso: Uso,
    committed_uso: Uso,
    open_sp_handle: SpHandle,
    open_unique_id: Option<UniqueId>,
    committed_sp_handle: SpHandle,
    committed_unique_id: Option<UniqueId>,
    curr: Option<StreamBlock<M>>,
    pending: VecDeque<StreamBlock<M>>,
    last_flush_us: i64,
}

impl<M: BlockMeta> BufferChain<M> {
    /// Creates an empty chain starting at USO zero.
    #[must_use]
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            uso: 0,
            committed_uso: 0,
            open_sp_handle: SpHandle::default(),
            open_unique_id: None,
            committed_sp_handle: SpHandle::default(),
            committed_unique_id: None,
            curr: None,
            pending: VecDeque::new(),
            last_flush_us: 0,
        }
    }

    /// Current write offset.
    #[must_use]
    pub fn write_uso(&self) -> Uso {
        self.uso
    }

    /// Offset through which all bytes are committed.
    #[must_use]
    pub fn committed_uso(&self) -> Uso {
        self.committed_uso
    }

    /// Handle of the transaction currently open, if one is.
    #[must_use]
    pub fn open_sp_handle(&self) -> SpHandle {
        self.open_sp_handle
    }

    /// Unique id of the transaction currently open, once one has been seen
    /// for the open handle.
    #[must_use]
    pub fn open_unique_id(&self) -> Option<UniqueId> {
        self.open_unique_id
    }

    /// Handle of the most recently committed transaction.
    #[must_use]
    pub fn committed_sp_handle(&self) -> SpHandle {
        self.committed_sp_handle
    }

    /// Stream configuration.
    #[must_use]
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// The block currently accepting writes, if any.
    pub fn current_block(&self) -> Option<&StreamBlock<M>> {
        self.curr.as_ref()
    }

    /// Mutable access to the current write block.
    pub fn current_block_mut(&mut self) -> Option<&mut StreamBlock<M>> {
        self.curr.as_mut()
    }

    /// Number of filled blocks awaiting commit coverage.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Mutable access to the most recently queued pending block.
    pub fn pending_back_mut(&mut self) -> Option<&mut StreamBlock<M>> {
        self.pending.back_mut()
    }

    /// Mutable iteration over every owned block, pending first.
    pub fn blocks_mut(&mut self) -> impl Iterator<Item = &mut StreamBlock<M>> {
        self.pending.iter_mut().chain(self.curr.as_mut())
    }

    /// Guarantees the current block can take at least `min` more bytes.
    ///
    /// # Errors
    ///
    /// [`StreamError::Overflow`] if even a large block cannot hold `min`
    /// bytes plus the uncommitted tail that must migrate with it.
    pub fn ensure_capacity(&mut self, min: usize) -> StreamResult<()> {
        match &self.curr {
            Some(b) if b.remaining() >= min => Ok(()),
            _ => self.extend_buffer_chain(min),
        }
    }

    /// Rotates to a fresh block that can hold `min_length` more bytes.
    ///
    /// Uncommitted bytes of a partially written transaction migrate into
    /// the new block and the new block's USO is rebased backward so stream
    /// offsets already recorded for those bytes remain valid.
    pub fn extend_buffer_chain(&mut self, min_length: usize) -> StreamResult<()> {
        // Uncommitted tail only migrates if it lives wholly in the current
        // block; a committed boundary inside the current block caps it.
        let preserved = match &self.curr {
            Some(b) if self.committed_uso >= b.uso() => (self.uso - self.committed_uso) as usize,
            _ => 0,
        };

        let needed = preserved + min_length;
        let capacity = if needed <= self.config.default_capacity {
            self.config.default_capacity
        } else if needed <= self.config.large_capacity {
            self.config.large_capacity
        } else {
            tracing::warn!(
                required = needed,
                limit = self.config.large_capacity,
                "request exceeds the large buffer capacity"
            );
            return Err(StreamError::Overflow {
                required: needed,
                limit: self.config.large_capacity,
            });
        };
        let block_type = if capacity > self.config.default_capacity {
            BlockType::Large
        } else {
            BlockType::Normal
        };

        let new_uso = self.uso - preserved as u64;
        tracing::debug!(uso = new_uso, capacity, preserved, ?block_type, "extending buffer chain");
        let mut next = StreamBlock::new(capacity + M::HEADER_SIZE, new_uso, block_type);

        if let Some(mut old) = self.curr.take() {
            if preserved > 0 {
                let tail = old.payload_between(new_uso, self.uso)?.to_vec();
                let mut w = next.writer();
                w.write_bytes(&tail)?;
                next.consumed(preserved);
                old.truncate_to(new_uso)?;
            }
            if old.offset() > 0 {
                old.record_last_committed_sp_handle(self.committed_sp_handle);
                old.record_completed_unique_id(self.committed_unique_id.unwrap_or_default());
                self.pending.push_back(old);
            }
        }
        self.curr = Some(next);
        Ok(())
    }

    /// Appends via a writer closure over the current block's free region.
    ///
    /// The closure's final writer position is taken as the number of bytes
    /// appended; the chain's write USO advances by the same amount. Callers
    /// reserve capacity first with [`BufferChain::ensure_capacity`].
    pub fn with_writer<T>(
        &mut self,
        f: impl FnOnce(&mut Writer<'_>) -> StreamResult<T>,
    ) -> StreamResult<T> {
        self.ensure_capacity(1)?;
        let block = self
            .curr
            .as_mut()
            .unwrap_or_else(|| unreachable!("ensure_capacity allocates"));
        let mut w = block.writer();
        let out = f(&mut w)?;
        let n = w.position();
        block.consumed(n);
        self.uso += n as u64;
        Ok(out)
    }

    /// Registers a transaction boundary.
    ///
    /// `last_committed_sp` is the newest durably committed handle the caller
    /// knows of; `current_sp` and `unique_id` identify the transaction now
    /// being appended. Commit never regresses: a `current_sp` newer than the
    /// open transaction commits the open one first.
    ///
    /// # Errors
    ///
    /// Protocol violation if `current_sp` moves backward, or if the same
    /// handle reappears with a different unique id.
    pub fn commit(
        &mut self,
        last_committed_sp: SpHandle,
        current_sp: SpHandle,
        unique_id: UniqueId,
    ) -> StreamResult<CommitOutcome> {
        if current_sp < self.open_sp_handle {
            return Err(StreamError::protocol_violation(format!(
                "transaction handle moved backward: open {}, got {current_sp}",
                self.open_sp_handle
            )));
        }
        if current_sp == self.open_sp_handle {
            match self.open_unique_id {
                Some(open) if unique_id != open => {
                    return Err(StreamError::protocol_violation(format!(
                        "handle {current_sp} reused with unique id {unique_id}, expected {open}"
                    )));
                }
                None => self.open_unique_id = Some(unique_id),
                _ => {}
            }
        }

        let mut outcome = CommitOutcome::default();
        if current_sp > self.open_sp_handle {
            if self.uso > self.committed_uso {
                self.committed_uso = self.uso;
                outcome.previous_committed = true;
            }
            self.committed_sp_handle = self.open_sp_handle;
            self.committed_unique_id = self.open_unique_id;
            self.open_sp_handle = current_sp;
            self.open_unique_id = Some(unique_id);
        }
        if last_committed_sp >= self.open_sp_handle && self.uso > self.committed_uso {
            self.committed_uso = self.uso;
            self.committed_sp_handle = self.open_sp_handle;
            self.committed_unique_id = self.open_unique_id;
            outcome.open_committed = true;
        }

        if let Some(b) = self.curr.as_mut() {
            b.record_last_committed_sp_handle(self.committed_sp_handle);
            b.record_completed_unique_id(self.committed_unique_id.unwrap_or_default());
        }
        Ok(outcome)
    }

    /// Marks all bytes written so far, including the open transaction's, as
    /// committed.
    pub fn commit_open_transaction(&mut self) {
        self.committed_uso = self.uso;
        self.committed_sp_handle = self.open_sp_handle;
        self.committed_unique_id = self.open_unique_id;
        if let Some(b) = self.curr.as_mut() {
            b.record_last_committed_sp_handle(self.committed_sp_handle);
            b.record_completed_unique_id(self.committed_unique_id.unwrap_or_default());
        }
    }

    /// Discards everything written past `mark`, dropping or rewinding
    /// blocks as needed.
    ///
    /// # Errors
    ///
    /// Protocol violation if the mark lies in the future or inside already
    /// committed bytes.
    pub fn rollback_to(&mut self, mark: Uso) -> StreamResult<()> {
        if mark > self.uso {
            return Err(StreamError::protocol_violation(format!(
                "rollback mark {mark} past write offset {}",
                self.uso
            )));
        }
        if mark < self.committed_uso {
            return Err(StreamError::protocol_violation(format!(
                "rollback mark {mark} inside committed bytes (committed through {})",
                self.committed_uso
            )));
        }
        if mark == self.uso {
            return Ok(());
        }

        while self.curr.as_ref().is_some_and(|b| b.uso() > mark) {
            self.curr = self.pending.pop_back();
        }
        if let Some(b) = self.curr.as_mut() {
            b.truncate_to(mark)?;
        }
        self.uso = mark;
        if self.uso == self.committed_uso {
            self.open_sp_handle = self.committed_sp_handle;
            self.open_unique_id = self.committed_unique_id;
        }
        Ok(())
    }

    /// Checks the buffer-age clock, restarting it when a flush comes due.
    ///
    /// A negative `current_time_us` forces the flush and leaves the clock
    /// untouched.
    pub fn flush_due(&mut self, current_time_us: i64) -> bool {
        if current_time_us < 0 {
            return true;
        }
        let due = current_time_us - self.last_flush_us >= self.config.flush_interval_us();
        if due {
            self.last_flush_us = current_time_us;
        }
        due
    }

    /// Decides whether an age-bound flush is due and rotates the current
    /// block out if so.
    ///
    /// A negative `current_time_us` forces the flush regardless of age.
    /// Returns true when a flush happened. The caller drains rotated blocks
    /// with [`BufferChain::take_committed_pending`] afterward.
    pub fn periodic_flush(
        &mut self,
        current_time_us: i64,
        last_committed_sp: SpHandle,
    ) -> StreamResult<bool> {
        if !self.flush_due(current_time_us) {
            return Ok(false);
        }

        if last_committed_sp >= self.open_sp_handle {
            self.commit_open_transaction();
        }
        if self.curr.as_ref().is_some_and(|b| b.offset() > 0) {
            self.extend_buffer_chain(0)?;
        }
        Ok(true)
    }

    /// Drains pending blocks entirely covered by the commit offset.
    #[must_use]
    pub fn take_committed_pending(&mut self) -> Vec<StreamBlock<M>> {
        let mut out = Vec::new();
        while self
            .pending
            .front()
            .is_some_and(|b| b.end_uso() <= self.committed_uso)
        {
            out.push(self.pending.pop_front().unwrap_or_else(|| unreachable!()));
        }
        out
    }
}
