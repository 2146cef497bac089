//! C8: pool-wide counters, latency percentiles, and an action event log.

pub mod action;
pub mod latency;
pub mod pool;

pub use action::{ActionRecorder, ActionStats, ActionSummary};
pub use latency::LatencyTracker;
pub use pool::{PoolMetrics, PoolMetricsSnapshot};
