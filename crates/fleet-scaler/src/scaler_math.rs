//! Pure scale-up/scale-down decision math, kept free of tokio and any
//! clock/RNG access so it can be driven exhaustively by unit tests. The
//! stateful wrapper (`scaler::AutoScaler`) owns the sample window and
//! cooldown bookkeeping and calls into here for the actual decision.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use fleet_core::ScalingMetric;

use crate::types::{ScaleAction, ScalerConfig, ScalingDecision, MIN_SAMPLES_TO_EVALUATE};

fn mean(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let count = values.clone().count();
    if count == 0 {
        0.0
    } else {
        values.sum::<f64>() / count as f64
    }
}

/// `(last - first) / steps` over the final 3 samples in the window.
/// Positive means utilization is trending up; negative, down.
fn utilization_slope(samples: &[ScalingMetric]) -> f64 {
    if samples.len() < 3 {
        return 0.0;
    }
    let last3 = &samples[samples.len() - 3..];
    (last3[2].utilization - last3[0].utilization) / 2.0
}

fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

fn scale_up_confidence(avg_util: f64, avg_cpu: f64, slope: f64) -> f64 {
    let util_score = clamp01(avg_util);
    let cpu_score = clamp01((avg_cpu - 0.7) / 0.3);
    let slope_bonus = if slope > 0.1 { 0.3 } else { 0.0 };
    clamp01(0.7 * util_score + 0.3 * cpu_score + slope_bonus)
}

fn scale_down_confidence(avg_util: f64, avg_cpu: f64, slope: f64) -> f64 {
    let util_score = clamp01(1.0 - avg_util);
    let cpu_score = clamp01((0.3 - avg_cpu) / 0.3);
    let slope_bonus = if slope < -0.1 { 0.3 } else { 0.0 };
    clamp01(0.7 * util_score + 0.3 * cpu_score + slope_bonus)
}

fn scale_up_target(current: u32, avg_util: f64, config: &ScalerConfig) -> u32 {
    let factor_eff = if avg_util > 0.9 { (config.factor * 1.5).min(3.0) } else { config.factor };
    let target = (f64::from(current) * factor_eff).ceil() as u32;
    target.min(config.max_sessions)
}

fn scale_down_target(current: u32, avg_util: f64, config: &ScalerConfig) -> u32 {
    let factor_eff = if avg_util < 0.1 { (config.factor * 1.5).max(0.3) } else { config.factor };
    let target = (f64::from(current) / factor_eff).floor() as u32;
    target.max(config.min_sessions)
}

fn cooldown_elapsed(last: Option<DateTime<Utc>>, cooldown: std::time::Duration, now: DateTime<Utc>) -> bool {
    match last {
        None => true,
        Some(t) => now - t >= ChronoDuration::from_std(cooldown).unwrap_or(ChronoDuration::MAX),
    }
}

/// Evaluate one window of samples against the current pool size. Pure:
/// takes `now` and the last scale timestamps as arguments instead of
/// reading a clock or internal cooldown state.
#[allow(clippy::too_many_arguments)]
#[must_use]
pub fn decide(
    samples: &[ScalingMetric],
    current_size: u32,
    config: &ScalerConfig,
    last_scale_up: Option<DateTime<Utc>>,
    last_scale_down: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> ScalingDecision {
    if samples.len() < MIN_SAMPLES_TO_EVALUATE {
        return ScalingDecision::none(current_size, "fewer than 3 samples in window", now);
    }

    let avg_util = mean(samples.iter().map(|s| s.utilization));
    let avg_cpu = mean(samples.iter().map(|s| s.cpu));
    let avg_response = mean(samples.iter().map(|s| s.response_time_ms));
    let last3 = &samples[samples.len() - MIN_SAMPLES_TO_EVALUATE.min(samples.len())..];
    let recent_error_rate = mean(last3.iter().map(|s| s.error_rate));
    let slope = utilization_slope(samples);

    let scale_up_triggered =
        avg_util > config.scale_up_threshold || avg_cpu > 0.8 || avg_response > 5_000.0 || recent_error_rate > 0.05;

    if scale_up_triggered && cooldown_elapsed(last_scale_up, config.scale_up_cooldown, now) {
        let confidence = scale_up_confidence(avg_util, avg_cpu, slope);
        if confidence > 0.0 {
            return ScalingDecision {
                action: ScaleAction::ScaleUp,
                current_size,
                target_size: scale_up_target(current_size, avg_util, config),
                reason: "utilization, cpu, response time or error rate above threshold".to_string(),
                confidence,
                timestamp: now,
            };
        }
        return ScalingDecision::none(current_size, "scale-up confidence non-positive", now);
    }

    let scale_down_triggered = avg_util < config.scale_down_threshold || (avg_cpu < 0.2 && avg_util < 0.5);
    let size_allows_down = current_size > config.min_sessions;

    if scale_down_triggered && size_allows_down && cooldown_elapsed(last_scale_down, config.scale_down_cooldown, now) {
        let confidence = scale_down_confidence(avg_util, avg_cpu, slope);
        if confidence > 0.0 {
            return ScalingDecision {
                action: ScaleAction::ScaleDown,
                current_size,
                target_size: scale_down_target(current_size, avg_util, config),
                reason: "utilization and cpu below threshold".to_string(),
                confidence,
                timestamp: now,
            };
        }
        return ScalingDecision::none(current_size, "scale-down confidence non-positive", now);
    }

    ScalingDecision::none(current_size, "no predicate triggered or cooldown active", now)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(utilization: f64, now: DateTime<Utc>) -> ScalingMetric {
        ScalingMetric {
            timestamp: now,
            utilization,
            cpu: 0.0,
            memory: 0.0,
            queue_length: 0,
            response_time_ms: 0.0,
            error_rate: 0.0,
            throughput: 0.0,
        }
    }

    #[test]
    fn scenario_s3_scale_up_decision() {
        let now = Utc::now();
        let config = ScalerConfig {
            min_sessions: 2,
            max_sessions: 10,
            scale_up_threshold: 0.8,
            factor: 1.5,
            scale_up_cooldown: std::time::Duration::from_secs(60),
            ..ScalerConfig::default()
        };
        let samples: Vec<ScalingMetric> =
            [0.85, 0.9, 0.95, 0.92, 0.9].iter().map(|u| metric(*u, now)).collect();

        let decision = decide(&samples, 4, &config, None, None, now);
        assert_eq!(decision.action, ScaleAction::ScaleUp);
        assert_eq!(decision.target_size, 9);
        assert!(decision.confidence >= 0.6, "confidence was {}", decision.confidence);

        let later = now + ChronoDuration::seconds(10);
        let decision2 = decide(&samples, 9, &config, Some(now), None, later);
        assert_eq!(decision2.action, ScaleAction::ScaleNone);
    }

    #[test]
    fn too_few_samples_never_scales() {
        let now = Utc::now();
        let config = ScalerConfig::default();
        let samples = vec![metric(0.99, now), metric(0.99, now)];
        let decision = decide(&samples, 4, &config, None, None, now);
        assert_eq!(decision.action, ScaleAction::ScaleNone);
    }

    #[test]
    fn scale_down_respects_min_sessions() {
        let now = Utc::now();
        let config = ScalerConfig {
            min_sessions: 4,
            scale_down_threshold: 0.3,
            ..ScalerConfig::default()
        };
        let samples: Vec<ScalingMetric> = (0..5).map(|_| metric(0.05, now)).collect();
        let decision = decide(&samples, 4, &config, None, None, now);
        assert_eq!(decision.action, ScaleAction::ScaleNone);
    }

    #[test]
    fn scale_down_targets_floor_capped_at_min() {
        let now = Utc::now();
        let config = ScalerConfig {
            min_sessions: 1,
            scale_down_threshold: 0.3,
            factor: 1.5,
            ..ScalerConfig::default()
        };
        let samples: Vec<ScalingMetric> = (0..5).map(|_| metric(0.05, now)).collect();
        let decision = decide(&samples, 6, &config, None, None, now);
        assert_eq!(decision.action, ScaleAction::ScaleDown);
        // avg_util 0.05 < 0.1 -> factor boosted to max(1.5*1.5, 0.3) = 2.25
        assert_eq!(decision.target_size, 2);
    }

    #[test]
    fn cooldown_blocks_repeat_scale_up() {
        let now = Utc::now();
        let config = ScalerConfig {
            scale_up_threshold: 0.5,
            scale_up_cooldown: std::time::Duration::from_secs(60),
            ..ScalerConfig::default()
        };
        let samples: Vec<ScalingMetric> = (0..5).map(|_| metric(0.95, now)).collect();
        let decision = decide(&samples, 4, &config, Some(now - ChronoDuration::seconds(30)), None, now);
        assert_eq!(decision.action, ScaleAction::ScaleNone);
    }

    #[test]
    fn cooldown_elapsed_allows_scale_up_again() {
        let now = Utc::now();
        let config = ScalerConfig {
            scale_up_threshold: 0.5,
            scale_up_cooldown: std::time::Duration::from_secs(60),
            ..ScalerConfig::default()
        };
        let samples: Vec<ScalingMetric> = (0..5).map(|_| metric(0.95, now)).collect();
        let decision = decide(&samples, 4, &config, Some(now - ChronoDuration::seconds(61)), None, now);
        assert_eq!(decision.action, ScaleAction::ScaleUp);
    }

    #[test]
    fn cpu_alone_triggers_scale_up() {
        let now = Utc::now();
        let config = ScalerConfig::default();
        let samples: Vec<ScalingMetric> = (0..5)
            .map(|_| ScalingMetric { cpu: 0.85, ..metric(0.1, now) })
            .collect();
        let decision = decide(&samples, 4, &config, None, None, now);
        assert_eq!(decision.action, ScaleAction::ScaleUp);
    }

    #[test]
    fn low_cpu_and_low_utilization_triggers_scale_down() {
        let now = Utc::now();
        let config = ScalerConfig { min_sessions: 1, ..ScalerConfig::default() };
        let samples: Vec<ScalingMetric> = (0..5)
            .map(|_| ScalingMetric { cpu: 0.1, ..metric(0.4, now) })
            .collect();
        let decision = decide(&samples, 4, &config, None, None, now);
        assert_eq!(decision.action, ScaleAction::ScaleDown);
    }

    #[test]
    fn error_rate_alone_triggers_scale_up() {
        let now = Utc::now();
        let config = ScalerConfig::default();
        let mut samples: Vec<ScalingMetric> = (0..5)
            .map(|_| ScalingMetric {
                timestamp: now,
                utilization: 0.1,
                cpu: 0.1,
                memory: 0.0,
                queue_length: 0,
                response_time_ms: 0.0,
                error_rate: 0.2,
                throughput: 0.0,
            })
            .collect();
        samples[0].error_rate = 0.0; // outside the last-3 window, should be ignored
        let decision = decide(&samples, 4, &config, None, None, now);
        assert_eq!(decision.action, ScaleAction::ScaleUp);
    }
}
