//! Bounded sensor history.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default number of samples kept per sensor
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Largest history a buffer may be configured with
pub const MAX_HISTORY_CAPACITY: usize = 100_000;

/// One reading keyed by device time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistorySample {
    /// Packet timestamp in milliseconds
    pub timestamp_ms: u64,
    /// Reading
    pub value: f64,
}

/// FIFO buffer that evicts its oldest sample once full
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    samples: VecDeque<HistorySample>,
    capacity: usize,
}

impl HistoryBuffer {
    /// Create an empty buffer holding at most `capacity` samples.
    ///
    /// Storage beyond the default capacity grows on demand.
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY_CAPACITY)),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest when full
    pub fn push(&mut self, sample: HistorySample) {
        if self.capacity == 0 {
            return;
        }
        while self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Samples currently held
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no sample is held
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Most samples the buffer keeps
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Most recent sample
    pub fn latest(&self) -> Option<HistorySample> {
        self.samples.back().copied()
    }

    /// Samples oldest first
    pub fn to_vec(&self) -> Vec<HistorySample> {
        self.samples.iter().copied().collect()
    }

    /// Drop every sample, keeping the capacity
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(timestamp_ms: u64) -> HistorySample {
        HistorySample {
            timestamp_ms,
            value: timestamp_ms as f64 * 10.0,
        }
    }

    #[test]
    fn test_evicts_oldest_at_capacity() {
        let mut buffer = HistoryBuffer::new(3);
        for t in 1..=5 {
            buffer.push(sample(t));
            assert!(buffer.len() <= 3);
        }

        let stamps: Vec<u64> = buffer.to_vec().iter().map(|s| s.timestamp_ms).collect();
        assert_eq!(stamps, vec![3, 4, 5]);
        assert_eq!(buffer.latest(), Some(sample(5)));
    }

    #[test]
    fn test_default_capacity() {
        let mut buffer = HistoryBuffer::default();
        for t in 0..250 {
            buffer.push(sample(t));
        }
        assert_eq!(buffer.len(), DEFAULT_HISTORY_CAPACITY);
        assert_eq!(buffer.to_vec()[0].timestamp_ms, 150);
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut buffer = HistoryBuffer::new(0);
        buffer.push(sample(1));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_huge_capacity_allocates_lazily() {
        let mut buffer = HistoryBuffer::new(usize::MAX);
        assert!(buffer.samples.capacity() < 1024);

        buffer.push(sample(1));
        buffer.push(sample(2));
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.capacity(), usize::MAX);
    }
}
