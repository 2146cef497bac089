//! C2: backoff delay calculator.
//!
//! The strategy computation is pure given its random draws, so every
//! entropy-consuming step takes an injected `rand::Rng` rather than
//! reaching for a thread-local generator — callers in `fleet-recovery`
//! pass `rand::thread_rng()`, tests pass a fixed-sequence mock.

use std::collections::VecDeque;

use rand::Rng;

use crate::classifier::ErrorKind;

const HISTORY_CAP: usize = 100;
const EXPONENTIAL_MULTIPLIER_CAP: f64 = 1024.0;

/// Which delay curve to use as `attempt` grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    Fixed,
    Linear,
    Exponential,
    Adaptive,
    DecorrelatedJitter,
}

/// Randomization applied on top of the strategy's raw delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitterMode {
    None,
    Full,
    Equal,
    Decorrelated,
    Exponential,
}

/// Stateful backoff calculator. State is limited to the bounded history of
/// previously-computed delays that `Adaptive` reads as its moving average —
/// everything else is a pure function of its arguments.
#[derive(Debug, Clone)]
pub struct BackoffCalculator {
    pub strategy: BackoffStrategy,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_mode: JitterMode,
    pub jitter_factor: f64,
    history: VecDeque<f64>,
}

impl BackoffCalculator {
    pub fn new(strategy: BackoffStrategy, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            strategy,
            base_delay_ms,
            max_delay_ms,
            jitter_mode: JitterMode::None,
            jitter_factor: 0.2,
            history: VecDeque::with_capacity(HISTORY_CAP),
        }
    }

    #[must_use]
    pub fn with_jitter(mut self, mode: JitterMode, factor: f64) -> Self {
        self.jitter_mode = mode;
        self.jitter_factor = factor;
        self
    }

    /// Compute the delay for `attempt` (1-based), optionally weighted by
    /// error kind and current load, then clamp to `[0, max_delay_ms]`.
    pub fn compute_delay<R: Rng + ?Sized>(
        &mut self,
        attempt: u32,
        error_kind: Option<ErrorKind>,
        load: Option<f64>,
        rng: &mut R,
    ) -> u64 {
        let mut delay = self.strategy_delay(attempt, rng);
        if let Some(kind) = error_kind {
            delay *= kind.backoff_weight();
        }
        if let Some(load) = load {
            delay *= load_multiplier(load);
        }
        self.record(delay);

        let jitter_unit = rng.gen_range(0.0..1.0);
        delay = apply_jitter(delay, self.jitter_mode, self.jitter_factor, jitter_unit);
        delay.clamp(0.0, self.max_delay_ms as f64).round() as u64
    }

    /// Clear the adaptive moving-average history. Called by a recovery
    /// manager after a restart succeeds, so the next failure's backoff
    /// starts cold rather than inheriting the crashed run's history.
    pub fn reset(&mut self) {
        self.history.clear();
    }

    fn record(&mut self, delay: f64) {
        if self.history.len() == HISTORY_CAP {
            self.history.pop_front();
        }
        self.history.push_back(delay);
    }

    fn strategy_delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> f64 {
        match self.strategy {
            BackoffStrategy::Fixed => self.base_delay_ms as f64,
            BackoffStrategy::Linear => self.base_delay_ms as f64 * f64::from(attempt),
            BackoffStrategy::Exponential => exponential_delay(self.base_delay_ms, attempt),
            BackoffStrategy::Adaptive => {
                if self.history.is_empty() {
                    exponential_delay(self.base_delay_ms, attempt)
                } else {
                    let avg: f64 =
                        self.history.iter().sum::<f64>() / self.history.len() as f64;
                    let factor = 1.0 + 0.2 * f64::from(attempt);
                    let scale = if avg > self.base_delay_ms as f64 { 1.3 } else { 0.8 };
                    self.base_delay_ms as f64 * factor * scale
                }
            }
            BackoffStrategy::DecorrelatedJitter => {
                let prev = exponential_delay(self.base_delay_ms, attempt.saturating_sub(1));
                let lo = self.base_delay_ms as f64;
                let hi = 3.0 * prev;
                if hi <= lo {
                    lo
                } else {
                    rng.gen_range(lo..hi)
                }
            }
        }
    }
}

/// `base × 2^(attempt-1)`, with the multiplier capped at 1024 to prevent
/// overflow on large attempt counts.
fn exponential_delay(base_delay_ms: u64, attempt: u32) -> f64 {
    let exponent = attempt.saturating_sub(1);
    let multiplier = 2f64.powi(exponent as i32).min(EXPONENTIAL_MULTIPLIER_CAP);
    base_delay_ms as f64 * multiplier
}

fn load_multiplier(load: f64) -> f64 {
    if load < 0.3 {
        0.8
    } else if load < 0.6 {
        1.0
    } else if load < 0.8 {
        1.5
    } else {
        2.0
    }
}

/// `unit` is a uniform draw in `[0, 1)`.
fn apply_jitter(delay: f64, mode: JitterMode, factor: f64, unit: f64) -> f64 {
    match mode {
        JitterMode::None => delay,
        JitterMode::Full => delay + unit * delay * factor,
        JitterMode::Equal => delay / 2.0 + unit * (delay * factor / 2.0),
        JitterMode::Decorrelated => delay + (unit * 2.0 - 1.0) * 0.5 * delay * factor,
        JitterMode::Exponential => delay + unit * delay * (2f64.powf(factor) - 1.0),
    }
}
