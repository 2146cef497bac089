//! Bounded-ring latency tracker (C8). Same sort-on-query shape as
//! `fleet_core::breaker_math::PercentileTracker`, but sized independently —
//! the pool-wide tracker defaults to the last 100 samples rather than the
//! breaker's 500.

use std::collections::VecDeque;

pub const DEFAULT_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct LatencyTracker {
    capacity: usize,
    samples: VecDeque<u64>,
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl LatencyTracker {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            samples: VecDeque::with_capacity(capacity),
        }
    }

    pub fn add_sample(&mut self, duration_ms: u64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(duration_ms);
    }

    #[must_use]
    pub fn get_average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            None
        } else {
            Some(self.samples.iter().sum::<u64>() as f64 / self.samples.len() as f64)
        }
    }

    #[must_use]
    pub fn get_min(&self) -> Option<u64> {
        self.samples.iter().copied().min()
    }

    #[must_use]
    pub fn get_max(&self) -> Option<u64> {
        self.samples.iter().copied().max()
    }

    /// `p` is a percentile in `[0, 100]`.
    #[must_use]
    pub fn get_percentile(&self, p: u8) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        let count = sorted.len();
        let idx = (usize::from(p) * count).div_ceil(100).saturating_sub(1).min(count - 1);
        Some(sorted[idx])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
