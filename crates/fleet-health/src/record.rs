//! Pure per-session health-record bookkeeping (C7): status derivation and
//! score formula over `fleet_core::HealthRecord`.

use std::time::Duration;

use fleet_core::{HealthRecord, HealthStatus};

const LAST_RESULTS_CAP: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct HealthConfig {
    pub interval: Duration,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub response_timeout_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            failure_threshold: 3,
            success_threshold: 5,
            response_timeout_ms: 2_000,
        }
    }
}

/// Success rate over the rolling last-10 probe window (empty window reads
/// as 0, never handed out as a pooled session's health anyway).
#[must_use]
pub fn success_rate(record: &HealthRecord) -> f64 {
    if record.last_results.is_empty() {
        0.0
    } else {
        record.last_results.iter().filter(|ok| **ok).count() as f64 / record.last_results.len() as f64
    }
}

#[must_use]
pub fn derive_status(record: &HealthRecord, config: &HealthConfig) -> HealthStatus {
    if record.consecutive_failure >= config.failure_threshold {
        return HealthStatus::Failed;
    }
    if record.consecutive_failure > 0 {
        return HealthStatus::Warning;
    }
    let rate = success_rate(record);
    if rate >= 0.95 {
        HealthStatus::Healthy
    } else if rate >= 0.80 {
        HealthStatus::Warning
    } else {
        HealthStatus::Critical
    }
}

#[must_use]
pub fn derive_score(record: &HealthRecord, config: &HealthConfig) -> f64 {
    let mut score = success_rate(record) - 0.1 * f64::from(record.consecutive_failure);
    if record.consecutive_success > config.success_threshold {
        score += 0.1;
    }
    if record.avg_response_time_ms > config.response_timeout_ms as f64 {
        score -= 0.2;
    }
    score.clamp(0.0, 1.0)
}

/// Fold one probe-set outcome into `record`, updating its rolling window,
/// counters, derived status, and score in place.
pub fn record_probe_outcome(record: &mut HealthRecord, success: bool, response_time_ms: u64, config: &HealthConfig) {
    record.total_checks += 1;
    if success {
        record.successful_checks += 1;
        record.consecutive_success += 1;
        record.consecutive_failure = 0;
    } else {
        record.failed_checks += 1;
        record.consecutive_failure += 1;
        record.consecutive_success = 0;
    }

    if record.last_results.len() == LAST_RESULTS_CAP {
        record.last_results.pop_front();
    }
    record.last_results.push_back(success);

    let n = record.total_checks as f64;
    record.avg_response_time_ms += (response_time_ms as f64 - record.avg_response_time_ms) / n;

    record.status = derive_status(record, config);
    record.score = derive_score(record, config);
}

/// Aggregate per-session statuses into one overall reading.
#[must_use]
pub fn overall_health(statuses: &[HealthStatus]) -> HealthStatus {
    if statuses.is_empty() {
        return HealthStatus::Unknown;
    }
    if statuses.iter().all(|s| *s == HealthStatus::Healthy) {
        return HealthStatus::Healthy;
    }
    if statuses.iter().all(|s| *s == HealthStatus::Failed) {
        return HealthStatus::Failed;
    }
    let unhealthy = statuses
        .iter()
        .filter(|s| !matches!(s, HealthStatus::Healthy))
        .count();
    if unhealthy * 2 > statuses.len() {
        HealthStatus::Critical
    } else {
        HealthStatus::Warning
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> HealthConfig {
        HealthConfig::default()
    }

    #[test]
    fn consecutive_failure_below_threshold_is_warning() {
        let mut record = HealthRecord::default();
        record_probe_outcome(&mut record, false, 10, &config());
        assert_eq!(record.status, fleet_core::HealthStatus::Warning);
    }

    #[test]
    fn consecutive_failure_at_threshold_is_failed() {
        let mut record = HealthRecord::default();
        let cfg = config();
        for _ in 0..cfg.failure_threshold {
            record_probe_outcome(&mut record, false, 10, &cfg);
        }
        assert_eq!(record.status, fleet_core::HealthStatus::Failed);
    }

    #[test]
    fn all_success_is_healthy() {
        let mut record = HealthRecord::default();
        let cfg = config();
        for _ in 0..10 {
            record_probe_outcome(&mut record, true, 10, &cfg);
        }
        assert_eq!(record.status, fleet_core::HealthStatus::Healthy);
        assert!(record.score > 0.9);
    }

    #[test]
    fn mixed_success_rate_between_80_and_95_is_warning() {
        let mut record = HealthRecord::default();
        let cfg = config();
        // 8/10 successes keeps consecutive_failure at 0 via trailing
        // success so status falls through to the rate bands.
        for ok in [true, true, true, true, false, true, true, true, true, true] {
            record_probe_outcome(&mut record, ok, 10, &cfg);
        }
        assert!((success_rate(&record) - 0.9).abs() < f64::EPSILON);
        assert_eq!(record.status, fleet_core::HealthStatus::Warning);
    }

    #[test]
    fn slow_response_penalizes_score() {
        let mut record = HealthRecord::default();
        let cfg = config();
        record_probe_outcome(&mut record, true, 5_000, &cfg);
        assert!(record.score < 1.0);
    }

    #[test]
    fn last_results_bounded_to_ten() {
        let mut record = HealthRecord::default();
        let cfg = config();
        for _ in 0..15 {
            record_probe_outcome(&mut record, true, 10, &cfg);
        }
        assert_eq!(record.last_results.len(), 10);
    }

    #[test]
    fn overall_health_all_healthy() {
        use fleet_core::HealthStatus::Healthy;
        assert_eq!(overall_health(&[Healthy, Healthy]), Healthy);
    }

    #[test]
    fn overall_health_majority_unhealthy_is_critical() {
        use fleet_core::HealthStatus::{Critical, Failed, Healthy, Warning};
        assert_eq!(overall_health(&[Failed, Warning, Healthy]), Critical);
    }

    #[test]
    fn overall_health_minority_unhealthy_is_warning() {
        use fleet_core::HealthStatus::{Healthy, Warning};
        assert_eq!(overall_health(&[Healthy, Healthy, Warning]), Warning);
    }

    #[test]
    fn overall_health_empty_is_unknown() {
        assert_eq!(overall_health(&[]), fleet_core::HealthStatus::Unknown);
    }
}
