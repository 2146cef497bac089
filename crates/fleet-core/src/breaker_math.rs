//! Pure sliding-window and percentile math shared by the circuit breaker
//! (the stateful wrapper lives in `fleet-breaker`; this crate only holds
//! the arithmetic so it can be unit tested without tokio).

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};

use crate::types::CallResult;

/// Percentile samples are kept in a ring bounded to the last 500
/// durations. A sorted copy is taken on each query rather than kept
/// sorted at all times — acceptable at this scale, but a production
/// deployment under heavy load should substitute a streaming quantile
/// estimator (P² or t-digest) behind the same `percentile` contract.
const PERCENTILE_RING_CAP: usize = 500;

/// Outcome of recounting a sliding window at an instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowMetrics {
    pub calls: u32,
    pub failures: u32,
    pub slow_calls: u32,
    pub failure_rate: f64,
    pub slow_call_rate: f64,
}

/// Time-bounded ring of call outcomes. Entries older than the window
/// duration are pruned on every query, matching the "recount on every
/// record and every second" rule.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    window_secs: u64,
    records: VecDeque<CallResult>,
}

impl SlidingWindow {
    pub fn new(window_secs: u64) -> Self {
        Self {
            window_secs,
            records: VecDeque::new(),
        }
    }

    pub fn record(&mut self, result: CallResult) {
        self.records.push_back(result);
    }

    /// Drop entries older than `now - window`.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::seconds(self.window_secs as i64);
        while let Some(front) = self.records.front() {
            if front.timestamp < cutoff {
                self.records.pop_front();
            } else {
                break;
            }
        }
    }

    /// Prune, then derive failure/slow-call rates over what remains.
    pub fn metrics(&mut self, now: DateTime<Utc>, slow_call_timeout_ms: u64) -> WindowMetrics {
        self.prune(now);
        let calls = self.records.len() as u32;
        let failures = self.records.iter().filter(|r| !r.success).count() as u32;
        let slow_calls = self
            .records
            .iter()
            .filter(|r| r.duration_ms > slow_call_timeout_ms)
            .count() as u32;
        let failure_rate = if calls == 0 {
            0.0
        } else {
            f64::from(failures) / f64::from(calls)
        };
        let slow_call_rate = if calls == 0 {
            0.0
        } else {
            f64::from(slow_calls) / f64::from(calls)
        };
        WindowMetrics {
            calls,
            failures,
            slow_calls,
            failure_rate,
            slow_call_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Bounded ring of observed call durations used to answer percentile
/// queries. `HandlePartialFailure`'s synthetic zero-duration records are
/// deliberately never fed into this tracker — see the crate's design
/// notes on excluding them from response-time statistics.
#[derive(Debug, Clone, Default)]
pub struct PercentileTracker {
    samples: VecDeque<u64>,
}

impl PercentileTracker {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(PERCENTILE_RING_CAP),
        }
    }

    pub fn record(&mut self, duration_ms: u64) {
        if self.samples.len() == PERCENTILE_RING_CAP {
            self.samples.pop_front();
        }
        self.samples.push_back(duration_ms);
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn min(&self) -> Option<u64> {
        self.samples.iter().copied().min()
    }

    pub fn max(&self) -> Option<u64> {
        self.samples.iter().copied().max()
    }

    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            None
        } else {
            Some(self.samples.iter().sum::<u64>() as f64 / self.samples.len() as f64)
        }
    }

    /// `p` is a percentile in `[0, 100]`. Returns `None` on an empty
    /// tracker.
    pub fn percentile(&self, p: u8) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        let count = sorted.len();
        let idx = (usize::from(p) * count).div_ceil(100).saturating_sub(1).min(count - 1);
        Some(sorted[idx])
    }
}

/// Under load, shrink a breaker rate threshold by `(1 - factor)`, never
/// below 0.1.
#[must_use]
pub fn dynamic_adjust(rate: f64, factor: f64) -> f64 {
    (rate * (1.0 - factor)).max(0.1)
}
