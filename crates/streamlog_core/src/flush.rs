//! Engine-owned flush scheduling across many streams.
//!
//! Streams do not link themselves together; the engine registers each one
//! with a [`FlushCoordinator`] and touches it after every commit. The
//! coordinator keeps streams ordered by last-commit time so a bounded
//! flush budget can always service the stalest streams first.

use std::collections::{BTreeSet, HashMap};

use crate::types::StreamId;

/// Ordered registry of streams keyed by their last-commit time.
#[derive(Debug, Default)]
pub struct FlushCoordinator {
    by_age: BTreeSet<(i64, StreamId)>,
    last_touch: HashMap<StreamId, i64>,
}

impl FlushCoordinator {
    /// Creates an empty coordinator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a stream, or re-times it if already registered.
    pub fn register(&mut self, stream: StreamId, now_us: i64) {
        self.touch(stream, now_us);
    }

    /// Records a commit on the stream, moving it to the young end.
    pub fn touch(&mut self, stream: StreamId, now_us: i64) {
        if let Some(prev) = self.last_touch.insert(stream, now_us) {
            self.by_age.remove(&(prev, stream));
        }
        self.by_age.insert((now_us, stream));
    }

    /// Removes a stream entirely.
    pub fn unregister(&mut self, stream: StreamId) {
        if let Some(prev) = self.last_touch.remove(&stream) {
            self.by_age.remove(&(prev, stream));
        }
    }

    /// Whether the stream is registered.
    #[must_use]
    pub fn contains(&self, stream: StreamId) -> bool {
        self.last_touch.contains_key(&stream)
    }

    /// Registered stream count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.last_touch.len()
    }

    /// True when no streams are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.last_touch.is_empty()
    }

    /// Streams ordered stalest first.
    pub fn oldest_first(&self) -> impl Iterator<Item = StreamId> + '_ {
        self.by_age.iter().map(|&(_, id)| id)
    }

    /// Streams whose last commit predates `cutoff_us`, stalest first.
    pub fn due_before(&self, cutoff_us: i64) -> impl Iterator<Item = StreamId> + '_ {
        self.by_age
            .iter()
            .take_while(move |&&(at, _)| at < cutoff_us)
            .map(|&(_, id)| id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_streams_stalest_first() {
        let mut c = FlushCoordinator::new();
        c.register(StreamId::new(1), 30);
        c.register(StreamId::new(2), 10);
        c.register(StreamId::new(3), 20);

        let order: Vec<StreamId> = c.oldest_first().collect();
        assert_eq!(
            order,
            vec![StreamId::new(2), StreamId::new(3), StreamId::new(1)]
        );
    }

    #[test]
    fn touch_moves_stream_to_the_young_end() {
        let mut c = FlushCoordinator::new();
        c.register(StreamId::new(1), 10);
        c.register(StreamId::new(2), 20);
        c.touch(StreamId::new(1), 30);

        let order: Vec<StreamId> = c.oldest_first().collect();
        assert_eq!(order, vec![StreamId::new(2), StreamId::new(1)]);
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn due_before_respects_the_cutoff() {
        let mut c = FlushCoordinator::new();
        c.register(StreamId::new(1), 10);
        c.register(StreamId::new(2), 20);
        c.register(StreamId::new(3), 30);

        let due: Vec<StreamId> = c.due_before(25).collect();
        assert_eq!(due, vec![StreamId::new(1), StreamId::new(2)]);
    }

    #[test]
    fn unregister_removes_both_indexes() {
        let mut c = FlushCoordinator::new();
        c.register(StreamId::new(1), 10);
        c.unregister(StreamId::new(1));
        assert!(c.is_empty());
        assert!(!c.contains(StreamId::new(1)));
        assert_eq!(c.oldest_first().count(), 0);
        // Unregistering twice is harmless.
        c.unregister(StreamId::new(1));
    }
}
