//! Stateful wrapper around `scaler_math::decide`: owns the bounded
//! sample window, the cooldown timestamps and the periodic tick loop.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleet_core::ScalingMetric;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::scaler_math::decide;
use crate::types::{ScaleAction, ScalerConfig, ScalingDecision};

const EVENT_BUS_CAPACITY: usize = 256;

/// Source of pool-health samples and current fleet size. Implemented by
/// whatever owns the session pool; kept as a seam so the scaler can be
/// driven by fakes in tests.
#[async_trait]
pub trait PoolObserver: Send + Sync {
    async fn sample(&self, now: DateTime<Utc>) -> ScalingMetric;
    async fn current_size(&self) -> u32;
}

/// Sink that carries out a scale decision. Implemented by whatever owns
/// `SessionPool::resize`.
#[async_trait]
pub trait PoolResizer: Send + Sync {
    async fn resize(&self, target: u32, now: DateTime<Utc>);
}

struct State {
    window: VecDeque<ScalingMetric>,
    last_scale_up: Option<DateTime<Utc>>,
    last_scale_down: Option<DateTime<Utc>>,
}

pub struct AutoScaler {
    config: ScalerConfig,
    state: Mutex<State>,
    decisions: broadcast::Sender<ScalingDecision>,
}

impl AutoScaler {
    #[must_use]
    pub fn new(config: ScalerConfig) -> Self {
        let (decisions, _rx) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            config,
            state: Mutex::new(State {
                window: VecDeque::with_capacity(config.window_size),
                last_scale_up: None,
                last_scale_down: None,
            }),
            decisions,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScalingDecision> {
        self.decisions.subscribe()
    }

    pub async fn record_sample(&self, sample: ScalingMetric) {
        let mut state = self.state.lock().await;
        if state.window.len() == self.config.window_size {
            state.window.pop_front();
        }
        state.window.push_back(sample);
    }

    /// Evaluate the current window against `current_size`. On a scale
    /// action, records the cooldown timestamp for next time.
    pub async fn evaluate(&self, current_size: u32, now: DateTime<Utc>) -> ScalingDecision {
        let mut state = self.state.lock().await;
        let samples: Vec<ScalingMetric> = state.window.iter().copied().collect();
        let decision = decide(&samples, current_size, &self.config, state.last_scale_up, state.last_scale_down, now);
        match decision.action {
            ScaleAction::ScaleUp => state.last_scale_up = Some(now),
            ScaleAction::ScaleDown => state.last_scale_down = Some(now),
            ScaleAction::ScaleNone => {}
        }
        drop(state);
        let _ = self.decisions.send(decision.clone());
        decision
    }

    pub fn config(&self) -> &ScalerConfig {
        &self.config
    }

    /// Background tick loop: sample, evaluate, and hand any scale
    /// decision to the resizer. Runs until `cancel` fires.
    pub async fn run(self: std::sync::Arc<Self>, observer: std::sync::Arc<dyn PoolObserver>, resizer: std::sync::Arc<dyn PoolResizer>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("auto-scaler tick loop cancelled");
                    return;
                }
                _ = ticker.tick() => {
                    let now = Utc::now();
                    let sample = observer.sample(now).await;
                    self.record_sample(sample).await;
                    let size = observer.current_size().await;
                    let decision = self.evaluate(size, now).await;
                    match decision.action {
                        ScaleAction::ScaleNone => {}
                        _ => {
                            info!(target = decision.target_size, confidence = decision.confidence, "scaling decision");
                            resizer.resize(decision.target_size, now).await;
                        }
                    }
                }
            }
        }
    }
}
