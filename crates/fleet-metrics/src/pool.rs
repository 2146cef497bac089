//! Stateful aggregate counters for C8, async-guarded for use from the pool
//! and scaler.

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::action::{ActionRecorder, ActionStats};
use crate::latency::LatencyTracker;

#[derive(Debug, Default)]
struct Inner {
    total: u64,
    success: u64,
    failure: u64,
    slow: u64,
    rejected: u64,
    last_state_change: Option<DateTime<Utc>>,
    last_success: Option<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
    latency: LatencyTracker,
    actions: ActionRecorder,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PoolMetricsSnapshot {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub slow_calls: u64,
    pub rejected_calls: u64,
    pub failure_rate: f64,
    pub slow_call_rate: f64,
    pub last_state_change: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub mean_latency_ms: Option<f64>,
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub p99_ms: Option<u64>,
    pub actions: ActionStats,
}

pub struct PoolMetrics {
    slow_call_timeout_ms: u64,
    inner: Mutex<Inner>,
}

impl PoolMetrics {
    #[must_use]
    pub fn new(slow_call_timeout_ms: u64) -> Self {
        Self {
            slow_call_timeout_ms,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub async fn record_call(&self, now: DateTime<Utc>, success: bool, duration_ms: u64) {
        let mut inner = self.inner.lock().await;
        inner.total += 1;
        if success {
            inner.success += 1;
            inner.last_success = Some(now);
        } else {
            inner.failure += 1;
            inner.last_failure = Some(now);
        }
        if duration_ms > self.slow_call_timeout_ms {
            inner.slow += 1;
        }
        inner.latency.add_sample(duration_ms);
    }

    pub async fn record_rejection(&self) {
        self.inner.lock().await.rejected += 1;
    }

    pub async fn record_state_change(&self, now: DateTime<Utc>) {
        self.inner.lock().await.last_state_change = Some(now);
    }

    pub async fn record_action(&self, now: DateTime<Utc>, action: impl Into<String>, success: bool, duration_ms: u64) {
        self.inner.lock().await.actions.record(action, success, duration_ms, now);
    }

    pub async fn snapshot(&self, now: DateTime<Utc>) -> PoolMetricsSnapshot {
        let inner = self.inner.lock().await;
        let failure_rate = if inner.total == 0 { 0.0 } else { inner.failure as f64 / inner.total as f64 };
        let slow_call_rate = if inner.total == 0 { 0.0 } else { inner.slow as f64 / inner.total as f64 };
        PoolMetricsSnapshot {
            total_calls: inner.total,
            successful_calls: inner.success,
            failed_calls: inner.failure,
            slow_calls: inner.slow,
            rejected_calls: inner.rejected,
            failure_rate,
            slow_call_rate,
            last_state_change: inner.last_state_change,
            last_success: inner.last_success,
            last_failure: inner.last_failure,
            mean_latency_ms: inner.latency.get_average(),
            p50_ms: inner.latency.get_percentile(50),
            p95_ms: inner.latency.get_percentile(95),
            p99_ms: inner.latency.get_percentile(99),
            actions: inner.actions.stats(now),
        }
    }

    pub async fn reset(&self) {
        *self.inner.lock().await = Inner::default();
    }
}
