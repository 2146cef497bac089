//! Configuration and outcome types for the recovery manager (C10).

use std::time::Duration;

/// Numeric defaults bit-exact against the documented defaults: backoff
/// base 1 s, multiplier 2.0, max 30 s; restart-window 1 h.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecoveryConfig {
    pub max_restarts: u32,
    pub restart_window: Duration,
    pub stop_timeout: Duration,
    pub summary_interval: Duration,
    pub liveness_interval: Duration,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            restart_window: Duration::from_secs(3_600),
            stop_timeout: Duration::from_secs(10),
            summary_interval: Duration::from_secs(300),
            liveness_interval: Duration::from_secs(30),
            backoff_base_ms: 1_000,
            backoff_max_ms: 30_000,
        }
    }
}

/// What the manager actually did in response to one observed error.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryOutcome {
    Restarted { attempt: u32, delay_ms: u64 },
    Retried,
    CircuitBroken,
    Failed { reason: String },
    Ignored,
}
