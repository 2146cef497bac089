//! C5: stateful circuit breaker built on `fleet_core`'s pure window,
//! percentile, and state-machine primitives.

pub mod breaker;
pub mod types;

pub use breaker::CircuitBreaker;
pub use types::BreakerMetrics;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use fleet_core::{CircuitState, FleetError, Thresholds};

    fn thresholds() -> Thresholds {
        Thresholds {
            failure_rate: 0.5,
            slow_call_rate: 0.9,
            min_calls: 10,
            window_secs: 60,
            half_open_max_calls: 3,
            slow_call_timeout_ms: 5_000,
            open_timeout_secs: 30,
            dynamic_adjustment: false,
            load_threshold: 0.8,
            dynamic_factor: 0.2,
        }
    }

    async fn ok(cb: &CircuitBreaker, now: chrono::DateTime<Utc>) -> Result<(), FleetError> {
        cb.execute(now, || async { Ok(()) }).await
    }

    async fn fail(cb: &CircuitBreaker, now: chrono::DateTime<Utc>) -> Result<(), FleetError> {
        cb.execute(now, || async { Err(FleetError::Timeout) }).await
    }

    #[tokio::test]
    async fn starts_closed() {
        let cb = CircuitBreaker::new(thresholds(), Utc::now());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    /// Scenario S1: 6 failures out of 10 calls (60% failure rate) against a
    /// 50% threshold and `min_calls = 10` trips the breaker open.
    #[tokio::test]
    async fn scenario_s1_breaker_trips_on_failure_rate() {
        let now = Utc::now();
        let cb = CircuitBreaker::new(thresholds(), now);
        for _ in 0..6 {
            let _ = fail(&cb, now).await;
        }
        for _ in 0..4 {
            ok(&cb, now).await.unwrap();
        }
        assert_eq!(cb.state(), CircuitState::Open);
        let metrics = cb.metrics(now).await;
        assert!((metrics.failure_rate - 0.6).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn below_min_calls_does_not_trip() {
        let now = Utc::now();
        let cb = CircuitBreaker::new(thresholds(), now);
        for _ in 0..5 {
            let _ = fail(&cb, now).await;
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn open_rejects_calls_without_running_them() {
        let now = Utc::now();
        let cb = CircuitBreaker::new(thresholds(), now);
        for _ in 0..10 {
            let _ = fail(&cb, now).await;
        }
        assert_eq!(cb.state(), CircuitState::Open);
        let err = ok(&cb, now).await.unwrap_err();
        assert_eq!(err, FleetError::CircuitOpen);
        assert_eq!(cb.metrics(now).await.rejected_calls, 1);
    }

    #[tokio::test]
    async fn open_auto_transitions_to_half_open_after_timeout() {
        let now = Utc::now();
        let cb = CircuitBreaker::new(thresholds(), now);
        for _ in 0..10 {
            let _ = fail(&cb, now).await;
        }
        assert_eq!(cb.state(), CircuitState::Open);
        let later = now + Duration::seconds(31);
        // The probe call itself drives the auto-transition check.
        let _ = ok(&cb, later).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    /// Scenario S2: after the open timeout, probe calls in `HalfOpen` that
    /// all succeed close the breaker again.
    #[tokio::test]
    async fn scenario_s2_half_open_recovers_on_success() {
        let now = Utc::now();
        let cb = CircuitBreaker::new(thresholds(), now);
        for _ in 0..10 {
            let _ = fail(&cb, now).await;
        }
        cb.execute_recovery(now).await.unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        for _ in 0..3 {
            ok(&cb, now).await.unwrap();
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_reopens_on_probe_failure() {
        let now = Utc::now();
        let cb = CircuitBreaker::new(thresholds(), now);
        for _ in 0..10 {
            let _ = fail(&cb, now).await;
        }
        cb.execute_recovery(now).await.unwrap();
        for _ in 0..2 {
            let _ = fail(&cb, now).await;
        }
        let _ = ok(&cb, now).await;
        assert_eq!(cb.state(), CircuitState::Open);
    }

    /// Testable property: half-open admission never exceeds
    /// `half_open_max_calls`, even with a burst of concurrent callers.
    #[tokio::test]
    async fn half_open_admission_is_capped() {
        let now = Utc::now();
        let cb = std::sync::Arc::new(CircuitBreaker::new(thresholds(), now));
        for _ in 0..10 {
            let _ = fail(&cb, now).await;
        }
        cb.execute_recovery(now).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let cb = cb.clone();
            handles.push(tokio::spawn(async move {
                cb.execute(now, || async {
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                    Ok::<_, FleetError>(())
                })
                .await
            }));
        }
        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                admitted += 1;
            }
        }
        assert!(admitted <= 3);
    }

    #[tokio::test]
    async fn forced_open_always_rejects() {
        let now = Utc::now();
        let cb = CircuitBreaker::new(thresholds(), now);
        cb.force_state(CircuitState::ForcedOpen, now).await;
        let err = ok(&cb, now).await.unwrap_err();
        assert_eq!(err, FleetError::ForcedOpen);
    }

    #[tokio::test]
    async fn forced_closed_always_admits() {
        let now = Utc::now();
        let cb = CircuitBreaker::new(thresholds(), now);
        cb.force_state(CircuitState::ForcedClosed, now).await;
        for _ in 0..20 {
            let _ = fail(&cb, now).await;
        }
        assert_eq!(cb.state(), CircuitState::ForcedClosed);
    }

    #[tokio::test]
    async fn reset_clears_counters_and_state() {
        let now = Utc::now();
        let cb = CircuitBreaker::new(thresholds(), now);
        for _ in 0..10 {
            let _ = fail(&cb, now).await;
        }
        assert_eq!(cb.state(), CircuitState::Open);
        cb.reset(now).await;
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics(now).await.total_calls, 0);
    }

    #[tokio::test]
    async fn partial_failure_can_trip_without_execute() {
        let now = Utc::now();
        let cb = CircuitBreaker::new(thresholds(), now);
        cb.handle_partial_failure(now, 4, 6).await;
        assert_eq!(cb.state(), CircuitState::Open);
        // Synthetic records never reach the percentile tracker.
        assert_eq!(cb.metrics(now).await.p50_ms, None);
    }

    #[tokio::test]
    async fn dynamic_adjustment_shrinks_thresholds_under_load() {
        let now = Utc::now();
        let mut t = thresholds();
        t.dynamic_adjustment = true;
        let cb = CircuitBreaker::new(t, now);
        cb.tick_dynamic_adjustment(0.95).await;
        let snapshot = cb.thresholds_snapshot().await;
        assert!(snapshot.failure_rate < t.failure_rate);
    }

    #[tokio::test]
    async fn dynamic_adjustment_noop_below_load_threshold() {
        let now = Utc::now();
        let mut t = thresholds();
        t.dynamic_adjustment = true;
        let cb = CircuitBreaker::new(t, now);
        cb.tick_dynamic_adjustment(0.1).await;
        let snapshot = cb.thresholds_snapshot().await;
        assert!((snapshot.failure_rate - t.failure_rate).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn state_change_listener_fires_on_trip() {
        let now = Utc::now();
        let cb = CircuitBreaker::new(thresholds(), now);
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        cb.add_listener(std::sync::Arc::new(move |from, to| {
            seen2.lock().unwrap().push((from, to));
        }));
        for _ in 0..10 {
            let _ = fail(&cb, now).await;
        }
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[(CircuitState::Closed, CircuitState::Open)]
        );
    }
}
