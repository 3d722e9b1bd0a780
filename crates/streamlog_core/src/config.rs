//! Stream configuration.

use std::time::Duration;

/// Configuration for a stream's buffer chain.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Payload capacity of a normal block, excluding header space.
    pub default_capacity: usize,

    /// Capacity of a large block, used when a single transaction does not
    /// fit a normal block. This is also the hard maximum: a transaction
    /// that does not fit a large block is rejected with an overflow error.
    pub large_capacity: usize,

    /// Maximum wall-clock age of buffered data before a periodic flush
    /// forces a block boundary.
    pub flush_interval: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            default_capacity: 2 * 1024 * 1024, // 2 MiB
            large_capacity: 8 * 1024 * 1024,   // 8 MiB
            flush_interval: Duration::from_millis(1000),
        }
    }
}

impl StreamConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the normal block capacity.
    #[must_use]
    pub const fn default_capacity(mut self, bytes: usize) -> Self {
        self.default_capacity = bytes;
        self
    }

    /// Sets the large block capacity.
    #[must_use]
    pub const fn large_capacity(mut self, bytes: usize) -> Self {
        self.large_capacity = bytes;
        self
    }

    /// Sets the buffer-age flush interval.
    #[must_use]
    pub const fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Flush interval in microseconds, the unit used by periodic ticks.
    #[must_use]
    pub fn flush_interval_us(&self) -> i64 {
        self.flush_interval.as_micros() as i64
    }
}
