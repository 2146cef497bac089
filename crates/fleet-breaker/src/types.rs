//! Snapshot types returned by the breaker — never the live locked state.

use chrono::{DateTime, Utc};
use fleet_core::CircuitState;

/// Point-in-time readout of a breaker's counters and latency percentiles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakerMetrics {
    pub state: CircuitState,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub slow_calls: u64,
    pub rejected_calls: u64,
    pub failure_rate: f64,
    pub slow_call_rate: f64,
    pub last_state_change: DateTime<Utc>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub min_ms: Option<u64>,
    pub mean_ms: Option<f64>,
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub p99_ms: Option<u64>,
    pub max_ms: Option<u64>,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub total: u64,
    pub success: u64,
    pub failure: u64,
    pub slow: u64,
    pub rejected: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
}
