//! Configuration and decision types for the auto-scaler (C9).

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Numeric defaults are bit-exact against the documented defaults: tick
/// 30 s, window 20 samples, scale-up 0.8, scale-down 0.3, factor 1.5,
/// cooldown-up 1 min, cooldown-down 2 min.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalerConfig {
    pub tick_interval: Duration,
    pub window_size: usize,
    pub min_sessions: u32,
    pub max_sessions: u32,
    pub scale_up_threshold: f64,
    pub scale_down_threshold: f64,
    pub factor: f64,
    pub scale_up_cooldown: Duration,
    pub scale_down_cooldown: Duration,
}

impl Default for ScalerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(30),
            window_size: 20,
            min_sessions: 1,
            max_sessions: 10,
            scale_up_threshold: 0.8,
            scale_down_threshold: 0.3,
            factor: 1.5,
            scale_up_cooldown: Duration::from_secs(60),
            scale_down_cooldown: Duration::from_secs(120),
        }
    }
}

/// Minimum number of samples required before `evaluate` will consider
/// scaling at all.
pub const MIN_SAMPLES_TO_EVALUATE: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleAction {
    ScaleUp,
    ScaleDown,
    ScaleNone,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScalingDecision {
    pub action: ScaleAction,
    pub current_size: u32,
    pub target_size: u32,
    pub reason: String,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

impl ScalingDecision {
    pub fn none(current_size: u32, reason: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            action: ScaleAction::ScaleNone,
            current_size,
            target_size: current_size,
            reason: reason.into(),
            confidence: 0.0,
            timestamp: now,
        }
    }
}
