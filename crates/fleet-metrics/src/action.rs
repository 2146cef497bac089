//! Bounded event log of named actions (C8). Derives RPS, mean latency, and
//! error rate from a trailing 60 s window on each query, the way the
//! breaker's `SlidingWindow` recounts on every read.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Duration, Utc};

pub const CAPACITY: usize = 1_000;
const DERIVED_WINDOW_SECS: i64 = 60;

#[derive(Debug, Clone, Copy)]
struct ActionRecord {
    success: bool,
    duration_ms: u64,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct ActionSummary {
    pub count: u64,
    pub success: u64,
    pub failure: u64,
    pub mean_duration_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct ActionStats {
    pub by_action: BTreeMap<String, ActionSummary>,
    pub requests_per_second: f64,
    pub mean_latency_ms: f64,
    pub error_rate: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ActionRecorder {
    records: BTreeMap<String, VecDeque<ActionRecord>>,
    total_events: usize,
}

impl ActionRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, action: impl Into<String>, success: bool, duration_ms: u64, now: DateTime<Utc>) {
        let entry = self.records.entry(action.into()).or_default();
        entry.push_back(ActionRecord {
            success,
            duration_ms,
            timestamp: now,
        });
        self.total_events += 1;

        while self.total_events > CAPACITY {
            let Some(oldest_action) = self
                .records
                .iter()
                .filter(|(_, q)| !q.is_empty())
                .min_by_key(|(_, q)| q.front().map(|r| r.timestamp))
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            if let Some(queue) = self.records.get_mut(&oldest_action) {
                queue.pop_front();
                self.total_events -= 1;
            }
        }
    }

    /// Recompute stats from events within the last 60 s.
    #[must_use]
    pub fn stats(&self, now: DateTime<Utc>) -> ActionStats {
        let cutoff = now - Duration::seconds(DERIVED_WINDOW_SECS);
        let mut by_action = BTreeMap::new();
        let mut total_calls = 0u64;
        let mut total_failures = 0u64;
        let mut total_duration_ms = 0f64;

        for (action, records) in &self.records {
            let recent: Vec<&ActionRecord> = records.iter().filter(|r| r.timestamp >= cutoff).collect();
            if recent.is_empty() {
                continue;
            }
            let count = recent.len() as u64;
            let success = recent.iter().filter(|r| r.success).count() as u64;
            let failure = count - success;
            let mean_duration_ms = recent.iter().map(|r| r.duration_ms as f64).sum::<f64>() / count as f64;

            total_calls += count;
            total_failures += failure;
            total_duration_ms += recent.iter().map(|r| r.duration_ms as f64).sum::<f64>();

            by_action.insert(
                action.clone(),
                ActionSummary {
                    count,
                    success,
                    failure,
                    mean_duration_ms,
                },
            );
        }

        let requests_per_second = if total_calls == 0 {
            0.0
        } else {
            total_calls as f64 / DERIVED_WINDOW_SECS as f64
        };
        let mean_latency_ms = if total_calls == 0 { 0.0 } else { total_duration_ms / total_calls as f64 };
        let error_rate = if total_calls == 0 { 0.0 } else { total_failures as f64 / total_calls as f64 };

        ActionStats {
            by_action,
            requests_per_second,
            mean_latency_ms,
            error_rate,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.total_events
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total_events == 0
    }
}
