//! C10: top-level error-observation dispatch. Classifies an observed
//! error, consults the circuit breaker, and either retries, restarts,
//! trips the breaker, or surfaces the error to the caller.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use fleet_breaker::CircuitBreaker;
use fleet_core::{classify, BackoffCalculator, CircuitState, ErrorKind, FleetError, RecoveryAction};
use fleet_process::{ProcessConfig, ProcessSupervisor};
use rand::Rng;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::types::{RecoveryConfig, RecoveryOutcome};

pub struct RecoveryManager {
    config: RecoveryConfig,
    supervisor: Arc<ProcessSupervisor>,
    breaker: Arc<CircuitBreaker>,
    process_config: Mutex<ProcessConfig>,
    backoff: Mutex<BackoffCalculator>,
    total_errors: AtomicU64,
    restart_count: AtomicU32,
    restart_timestamps: Mutex<VecDeque<DateTime<Utc>>>,
    last_restart: Mutex<Option<DateTime<Utc>>>,
}

impl RecoveryManager {
    #[must_use]
    pub fn new(
        config: RecoveryConfig,
        supervisor: Arc<ProcessSupervisor>,
        breaker: Arc<CircuitBreaker>,
        process_config: ProcessConfig,
        backoff: BackoffCalculator,
    ) -> Self {
        Self {
            config,
            supervisor,
            breaker,
            process_config: Mutex::new(process_config),
            backoff: Mutex::new(backoff),
            total_errors: AtomicU64::new(0),
            restart_count: AtomicU32::new(0),
            restart_timestamps: Mutex::new(VecDeque::new()),
            last_restart: Mutex::new(None),
        }
    }

    pub fn total_errors(&self) -> u64 {
        self.total_errors.load(Ordering::SeqCst)
    }

    pub fn restart_count(&self) -> u32 {
        self.restart_count.load(Ordering::SeqCst)
    }

    /// Reconfigure the process arguments a future restart should use
    /// (e.g. after a token refresh changes an env var).
    pub async fn set_process_config(&self, config: ProcessConfig) {
        *self.process_config.lock().await = config;
    }

    /// Classify `message`, consult the breaker, and dispatch. `rng`
    /// drives the restart backoff draw; `cancel` makes the backoff wait
    /// interruptible.
    pub async fn handle_error<R: Rng + ?Sized>(
        &self,
        message: &str,
        now: DateTime<Utc>,
        load: Option<f64>,
        rng: &mut R,
        cancel: &CancellationToken,
    ) -> RecoveryOutcome {
        self.total_errors.fetch_add(1, Ordering::SeqCst);
        let (kind, mut action) = classify(message);

        if matches!(self.breaker.state(), CircuitState::Open | CircuitState::ForcedOpen)
            && !matches!(action, RecoveryAction::Fail | RecoveryAction::Ignore)
        {
            action = RecoveryAction::Fail;
        }

        match action {
            RecoveryAction::Ignore => RecoveryOutcome::Ignored,
            RecoveryAction::Fail => RecoveryOutcome::Failed { reason: message.to_string() },
            RecoveryAction::CircuitBreak => {
                self.breaker.handle_partial_failure(now, 0, 1).await;
                RecoveryOutcome::CircuitBroken
            }
            RecoveryAction::Retry => match self.breaker.execute(now, retry_probe).await {
                Ok(()) => RecoveryOutcome::Retried,
                Err(_) => {
                    self.breaker.handle_partial_failure(now, 0, 1).await;
                    RecoveryOutcome::CircuitBroken
                }
            },
            RecoveryAction::Restart => self.attempt_restart(kind, now, load, rng, cancel).await,
        }
    }

    async fn attempt_restart<R: Rng + ?Sized>(
        &self,
        kind: ErrorKind,
        now: DateTime<Utc>,
        load: Option<f64>,
        rng: &mut R,
        cancel: &CancellationToken,
    ) -> RecoveryOutcome {
        let restart_count = self.restart_count.load(Ordering::SeqCst);
        if restart_count >= self.config.max_restarts {
            return RecoveryOutcome::Failed { reason: FleetError::RestartLimitReached.to_string() };
        }

        {
            let mut timestamps = self.restart_timestamps.lock().await;
            let cutoff = now - ChronoDuration::from_std(self.config.restart_window).unwrap_or(ChronoDuration::MAX);
            while timestamps.front().is_some_and(|t| *t < cutoff) {
                timestamps.pop_front();
            }
            if timestamps.len() as u32 >= 2 * self.config.max_restarts {
                return RecoveryOutcome::Failed { reason: FleetError::RestartLimitReached.to_string() };
            }
        }

        let delay_ms = self.backoff.lock().await.compute_delay(restart_count + 1, Some(kind), load, rng);

        if let Some(last) = *self.last_restart.lock().await {
            let elapsed_ms = (now - last).num_milliseconds().max(0) as u64;
            if elapsed_ms < delay_ms {
                return RecoveryOutcome::Failed {
                    reason: FleetError::BackoffNotElapsed { remaining_ms: delay_ms - elapsed_ms }.to_string(),
                };
            }
        }

        if let Err(err) = self.supervisor.stop(self.config.stop_timeout).await {
            warn!(%err, "graceful stop failed during restart, escalating to kill");
            let _ = self.supervisor.kill().await;
        }

        tokio::select! {
            () = cancel.cancelled() => return RecoveryOutcome::Failed { reason: FleetError::Cancelled.to_string() },
            () = tokio::time::sleep(std::time::Duration::from_millis(delay_ms)) => {}
        }

        let config = self.process_config.lock().await.clone();
        match self.supervisor.start(config).await {
            Ok(()) => {
                self.restart_count.fetch_add(1, Ordering::SeqCst);
                self.restart_timestamps.lock().await.push_back(now);
                *self.last_restart.lock().await = Some(now);
                self.backoff.lock().await.reset();
                self.breaker.handle_partial_failure(now, 1, 0).await;
                RecoveryOutcome::Restarted { attempt: restart_count + 1, delay_ms }
            }
            Err(err) => RecoveryOutcome::Failed { reason: err.to_string() },
        }
    }

    /// Every `summary_interval`, log cumulative error/restart counts.
    pub async fn run_summary_ticker(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.summary_interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    info!(
                        total_errors = self.total_errors(),
                        restart_count = self.restart_count(),
                        "recovery manager summary"
                    );
                }
            }
        }
    }

    /// Every `liveness_interval`, probe the supervised child and feed a
    /// failed probe back into `handle_error` as a process error.
    pub async fn run_liveness_ticker(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.liveness_interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    if let Err(err) = self.supervisor.health_check().await {
                        let mut rng = rand::thread_rng();
                        let _ = self.handle_error(&err.to_string(), Utc::now(), None, &mut rng, &cancel).await;
                    }
                }
            }
        }
    }
}

async fn retry_probe() -> Result<(), FleetError> {
    Ok(())
}
