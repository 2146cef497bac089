//! C5: the stateful circuit breaker. Wraps the pure window/percentile math
//! in `fleet_core::breaker_math` and the generic `StateMachine` with the
//! locks, admission bookkeeping, and dynamic threshold adjustment that make
//! it usable from concurrent callers.
//!
//! Lock order, outermost first: `state` (inside the `StateMachine`) →
//! `thresholds` → `metrics` → `history` (window, percentiles, half-open
//! probe results). No method acquires them out of this order.

use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use fleet_core::{
    dynamic_adjust, CallResult, CircuitState, FleetError, PercentileTracker, SlidingWindow,
    StateMachine, Thresholds,
};
use tokio::sync::{Mutex, RwLock};

use crate::types::{BreakerMetrics, Counters};

/// Whether an admitted call happened while the breaker was in `HalfOpen`.
/// Carried from `admit` to `record_outcome` so the half-open resolution
/// logic never has to re-read `state.current()` after an await, which
/// would race against a concurrent resolution.
enum Admission {
    Normal,
    Probe,
}

pub struct CircuitBreaker {
    state: StateMachine<CircuitState>,
    thresholds: RwLock<Thresholds>,
    counters: Mutex<Counters>,
    window: Mutex<SlidingWindow>,
    percentiles: Mutex<PercentileTracker>,
    half_open_results: Mutex<Vec<(bool, u64)>>,
    /// Probes currently admitted and not yet completed, in `HalfOpen`. Caps
    /// concurrency per the half-open admission invariant; decremented as
    /// each probe finishes, independent of `half_open_results`, which
    /// tracks completions toward the resolution decision.
    half_open_inflight: AtomicU32,
    rejected_calls: AtomicU64,
    last_state_change: Mutex<DateTime<Utc>>,
}

impl CircuitBreaker {
    pub fn new(thresholds: Thresholds, now: DateTime<Utc>) -> Self {
        let window_secs = thresholds.window_secs;
        let edges = vec![
            (CircuitState::Closed, CircuitState::Open),
            (CircuitState::Open, CircuitState::HalfOpen),
            (CircuitState::HalfOpen, CircuitState::Closed),
            (CircuitState::HalfOpen, CircuitState::Open),
        ];
        Self {
            state: StateMachine::new(CircuitState::Closed, edges),
            thresholds: RwLock::new(thresholds),
            counters: Mutex::new(Counters::default()),
            window: Mutex::new(SlidingWindow::new(window_secs)),
            percentiles: Mutex::new(PercentileTracker::new()),
            half_open_results: Mutex::new(Vec::new()),
            half_open_inflight: AtomicU32::new(0),
            rejected_calls: AtomicU64::new(0),
            last_state_change: Mutex::new(now),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state.current()
    }

    pub fn add_listener(&self, listener: fleet_core::state_machine::Listener<CircuitState>) {
        self.state.add_listener(listener);
    }

    /// Run `operation` through the breaker. Rejects without running it when
    /// the breaker is `Open`, `ForcedOpen`, or the `HalfOpen` probe quota is
    /// exhausted.
    pub async fn execute<F, Fut, T>(&self, now: DateTime<Utc>, operation: F) -> Result<T, FleetError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FleetError>>,
    {
        self.maybe_auto_half_open(now).await;

        let admission = match self.admit().await {
            Some(a) => a,
            None => {
                self.rejected_calls.fetch_add(1, Ordering::SeqCst);
                self.counters.lock().await.rejected += 1;
                return Err(self.rejection_error());
            }
        };

        let start = Instant::now();
        let outcome = operation().await;
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.record_outcome(now, outcome.is_ok(), duration_ms, admission).await;
        outcome
    }

    /// Inject `success_count` and `failure_count` synthetic zero-duration
    /// outcomes — used when a caller already knows the result of a batch of
    /// work (e.g. a partially successful fan-out) without replaying it
    /// through `execute`. These never reach the percentile tracker.
    pub async fn handle_partial_failure(
        &self,
        now: DateTime<Utc>,
        success_count: u32,
        failure_count: u32,
    ) {
        {
            let mut window = self.window.lock().await;
            for _ in 0..success_count {
                window.record(CallResult {
                    success: true,
                    duration_ms: 0,
                    timestamp: now,
                });
            }
            for _ in 0..failure_count {
                window.record(CallResult {
                    success: false,
                    duration_ms: 0,
                    timestamp: now,
                });
            }
        }
        {
            let mut counters = self.counters.lock().await;
            counters.total += u64::from(success_count) + u64::from(failure_count);
            counters.success += u64::from(success_count);
            counters.failure += u64::from(failure_count);
            if failure_count > 0 {
                counters.last_failure = Some(now);
            }
            if success_count > 0 {
                counters.last_success = Some(now);
            }
        }
        self.reevaluate_closed(now).await;
    }

    /// Force an immediate `Open -> HalfOpen` probe window, bypassing the
    /// `open_timeout_secs` wait.
    pub async fn execute_recovery(&self, now: DateTime<Utc>) -> Result<(), FleetError> {
        if self.state.current() != CircuitState::Open {
            return Err(FleetError::InvalidState {
                expected: "Open".into(),
                actual: format!("{:?}", self.state.current()),
            });
        }
        self.enter_half_open(now).await;
        Ok(())
    }

    /// Administrative override: jump straight to `to`, bypassing the normal
    /// edge set. Used for `ForcedOpen` / `ForcedClosed` and for tests.
    pub async fn force_state(&self, to: CircuitState, now: DateTime<Utc>) {
        self.state.reset(to);
        *self.last_state_change.lock().await = now;
        if to == CircuitState::HalfOpen {
            self.half_open_inflight.store(0, Ordering::SeqCst);
            self.half_open_results.lock().await.clear();
        }
    }

    /// Return to `Closed` with all counters and history cleared.
    pub async fn reset(&self, now: DateTime<Utc>) {
        self.state.reset(CircuitState::Closed);
        *self.last_state_change.lock().await = now;
        *self.counters.lock().await = Counters::default();
        *self.window.lock().await = SlidingWindow::new(self.thresholds.read().await.window_secs);
        *self.percentiles.lock().await = PercentileTracker::new();
        self.half_open_results.lock().await.clear();
        self.half_open_inflight.store(0, Ordering::SeqCst);
        self.rejected_calls.store(0, Ordering::SeqCst);
    }

    pub async fn set_thresholds(&self, new: Thresholds) -> Result<(), String> {
        new.validate()?;
        *self.thresholds.write().await = new;
        Ok(())
    }

    pub async fn thresholds_snapshot(&self) -> Thresholds {
        *self.thresholds.read().await
    }

    /// Shrink the failure/slow-call thresholds when `load` crosses
    /// `load_threshold` and dynamic adjustment is enabled for this breaker.
    /// Intended to be called on a periodic tick alongside a scaler metric
    /// sample, not from the hot call path.
    pub async fn tick_dynamic_adjustment(&self, load: f64) {
        let mut thresholds = self.thresholds.write().await;
        if thresholds.dynamic_adjustment && load >= thresholds.load_threshold {
            thresholds.failure_rate = dynamic_adjust(thresholds.failure_rate, thresholds.dynamic_factor);
            thresholds.slow_call_rate =
                dynamic_adjust(thresholds.slow_call_rate, thresholds.dynamic_factor);
        }
    }

    pub async fn metrics(&self, now: DateTime<Utc>) -> BreakerMetrics {
        let window_metrics = {
            let mut window = self.window.lock().await;
            let slow_timeout = self.thresholds.read().await.slow_call_timeout_ms;
            window.metrics(now, slow_timeout)
        };
        let counters = self.counters.lock().await;
        let percentiles = self.percentiles.lock().await;
        BreakerMetrics {
            state: self.state.current(),
            total_calls: counters.total,
            successful_calls: counters.success,
            failed_calls: counters.failure,
            slow_calls: counters.slow,
            rejected_calls: self.rejected_calls.load(Ordering::SeqCst),
            failure_rate: window_metrics.failure_rate,
            slow_call_rate: window_metrics.slow_call_rate,
            last_state_change: *self.last_state_change.lock().await,
            last_success: counters.last_success,
            last_failure: counters.last_failure,
            min_ms: percentiles.min(),
            mean_ms: percentiles.mean(),
            p50_ms: percentiles.percentile(50),
            p95_ms: percentiles.percentile(95),
            p99_ms: percentiles.percentile(99),
            max_ms: percentiles.max(),
        }
    }

    fn rejection_error(&self) -> FleetError {
        if self.state.current() == CircuitState::ForcedOpen {
            FleetError::ForcedOpen
        } else {
            FleetError::CircuitOpen
        }
    }

    async fn maybe_auto_half_open(&self, now: DateTime<Utc>) {
        if self.state.current() != CircuitState::Open {
            return;
        }
        let last_change = *self.last_state_change.lock().await;
        let open_timeout = self.thresholds.read().await.open_timeout_secs;
        if (now - last_change).num_seconds() >= i64::try_from(open_timeout).unwrap_or(i64::MAX) {
            self.enter_half_open(now).await;
        }
    }

    async fn enter_half_open(&self, now: DateTime<Utc>) {
        if self.state.transition_to(CircuitState::HalfOpen).is_ok() {
            *self.last_state_change.lock().await = now;
            self.half_open_inflight.store(0, Ordering::SeqCst);
            self.half_open_results.lock().await.clear();
        }
    }

    /// Returns `None` if the call is rejected, `Some(Admission)` otherwise.
    async fn admit(&self) -> Option<Admission> {
        match self.state.current() {
            CircuitState::ForcedOpen | CircuitState::Open => None,
            CircuitState::Closed | CircuitState::ForcedClosed => Some(Admission::Normal),
            CircuitState::HalfOpen => {
                let cap = self.thresholds.read().await.half_open_max_calls;
                let mut current = self.half_open_inflight.load(Ordering::SeqCst);
                loop {
                    if current >= cap {
                        return None;
                    }
                    match self.half_open_inflight.compare_exchange(
                        current,
                        current + 1,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    ) {
                        Ok(_) => return Some(Admission::Probe),
                        Err(actual) => current = actual,
                    }
                }
            }
        }
    }

    async fn record_outcome(
        &self,
        now: DateTime<Utc>,
        success: bool,
        duration_ms: u64,
        admission: Admission,
    ) {
        let slow_timeout = self.thresholds.read().await.slow_call_timeout_ms;
        {
            let mut window = self.window.lock().await;
            window.record(CallResult {
                success,
                duration_ms,
                timestamp: now,
            });
        }
        {
            let mut percentiles = self.percentiles.lock().await;
            percentiles.record(duration_ms);
        }
        {
            let mut counters = self.counters.lock().await;
            counters.total += 1;
            if success {
                counters.success += 1;
                counters.last_success = Some(now);
            } else {
                counters.failure += 1;
                counters.last_failure = Some(now);
            }
            if duration_ms > slow_timeout {
                counters.slow += 1;
            }
        }

        match admission {
            Admission::Normal => self.reevaluate_closed(now).await,
            Admission::Probe => self.resolve_half_open_probe(now, success, duration_ms).await,
        }
    }

    /// Trip `Closed -> Open` once the window has enough calls and breaches
    /// either rate threshold.
    async fn reevaluate_closed(&self, now: DateTime<Utc>) {
        if self.state.current() != CircuitState::Closed {
            return;
        }
        let thresholds = *self.thresholds.read().await;
        let metrics = self.window.lock().await.metrics(now, thresholds.slow_call_timeout_ms);
        if metrics.calls >= thresholds.min_calls
            && (metrics.failure_rate >= thresholds.failure_rate
                || metrics.slow_call_rate >= thresholds.slow_call_rate)
            && self.state.transition_to(CircuitState::Open).is_ok()
        {
            *self.last_state_change.lock().await = now;
        }
    }

    async fn resolve_half_open_probe(&self, now: DateTime<Utc>, success: bool, duration_ms: u64) {
        // This probe has finished; free its concurrency slot regardless of
        // whether it is the one that completes the resolution window.
        self.half_open_inflight.fetch_sub(1, Ordering::SeqCst);

        let cap = self.thresholds.read().await.half_open_max_calls;
        let ready = {
            let mut results = self.half_open_results.lock().await;
            results.push((success, duration_ms));
            results.len() as u32 >= cap
        };
        if !ready {
            return;
        }

        let thresholds = *self.thresholds.read().await;
        let mut results = self.half_open_results.lock().await;
        let count = results.len() as f64;
        let failures = results.iter().filter(|(ok, _)| !ok).count() as f64;
        let slow = results
            .iter()
            .filter(|(_, d)| *d > thresholds.slow_call_timeout_ms)
            .count() as f64;
        results.clear();
        drop(results);

        let failure_rate = failures / count;
        let slow_call_rate = slow / count;
        let target = if failure_rate < thresholds.failure_rate && slow_call_rate < thresholds.slow_call_rate
        {
            CircuitState::Closed
        } else {
            CircuitState::Open
        };
        if self.state.transition_to(target).is_ok() {
            *self.last_state_change.lock().await = now;
        }
    }
}
