//! Composition root: wires the ten components behind the daemon's single
//! public surface (the UDS JSON-RPC server and the CLI). Nothing here
//! implements new supervisor logic — it is glue, built the way
//! `agtmux-runtime::poll_loop` wires its own components together.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleet_breaker::CircuitBreaker;
use fleet_core::{BackoffCalculator, BackoffStrategy, FleetError, HealthStatus, ResourceCaps, ScalingMetric, Session, SessionConfig, SessionId};
use fleet_health::{HealthChecker, HealthConfig, SessionRegistry};
use fleet_metrics::PoolMetrics;
use fleet_pool::{PoolConfig, SessionPool, SpawnerFactory, TokioSpawnerFactory};
use fleet_process::{ProcessConfig, ProcessSupervisor};
use fleet_recovery::{RecoveryManager, RecoveryOutcome};
use fleet_scaler::{AutoScaler, PoolObserver, PoolResizer, ScalingDecision};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::FleetConfig;
use crate::events::{EventBus, StateChangeEvent};
use crate::store::SessionStore;
use crate::token::TokenProvider;

/// Bridges the pool to the scaler's sampling/resize boundary.
struct PoolAdapter {
    pool: Arc<SessionPool>,
    metrics: Arc<PoolMetrics>,
    default_session_config: SessionConfig,
    default_process_config: ProcessConfig,
}

#[async_trait]
impl PoolObserver for PoolAdapter {
    async fn sample(&self, now: DateTime<Utc>) -> ScalingMetric {
        let stats = self.pool.stats().await;
        let snapshot = self.metrics.snapshot(now).await;
        let supervisors = self.pool.session_supervisors().await;
        let (cpu, memory) = aggregate_resource_usage(&supervisors);
        ScalingMetric {
            timestamp: now,
            utilization: stats.utilization(),
            cpu,
            memory,
            // AcquireSession never queues: it fails fast with
            // PoolExhausted instead of waiting for capacity, so there is
            // no blocking queue to measure here.
            queue_length: 0,
            response_time_ms: snapshot.mean_latency_ms.unwrap_or(0.0),
            error_rate: snapshot.failure_rate,
            throughput: snapshot.total_calls as f64,
        }
    }

    async fn current_size(&self) -> u32 {
        self.pool.stats().await.total
    }
}

/// Mean CPU fraction (0..1) and mean resident memory (MB) across every
/// pooled session's live resource sample. A session with no sample yet
/// (no pid, or already exited) is excluded rather than counted as zero.
fn aggregate_resource_usage(supervisors: &[(SessionId, Arc<ProcessSupervisor>, ResourceCaps)]) -> (f64, f64) {
    let samples: Vec<_> = supervisors.iter().filter_map(|(_, sup, _)| sup.resource_usage()).collect();
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let count = samples.len() as f64;
    let cpu = samples.iter().map(|s| f64::from(s.cpu_percent) / 100.0).sum::<f64>() / count;
    let memory_mb = samples.iter().map(|s| s.memory_bytes as f64 / (1024.0 * 1024.0)).sum::<f64>() / count;
    (cpu.clamp(0.0, 1.0), memory_mb)
}

#[async_trait]
impl PoolResizer for PoolAdapter {
    async fn resize(&self, target: u32, now: DateTime<Utc>) {
        let process_config = self.default_process_config.clone();
        if let Err(err) = self
            .pool
            .resize(target, now, &self.default_session_config, move || process_config.clone())
            .await
        {
            tracing::warn!(%err, target, "scaler-driven resize failed");
        }
    }
}

/// Bridges the pool to the health checker's per-tick session list.
struct PoolRegistry(Arc<SessionPool>);

#[async_trait]
impl SessionRegistry for PoolRegistry {
    async fn sessions(&self) -> Vec<(SessionId, Arc<ProcessSupervisor>, ResourceCaps)> {
        self.0.session_supervisors().await
    }
}

pub struct FleetApp {
    config: FleetConfig,
    pub pool: Arc<SessionPool>,
    pub breaker: Arc<CircuitBreaker>,
    pub health: Arc<HealthChecker>,
    pub scaler: Arc<AutoScaler>,
    pub metrics: Arc<PoolMetrics>,
    pub events: Arc<EventBus>,
    pub store: Arc<dyn SessionStore>,
    pub token_provider: Arc<dyn TokenProvider>,
    recovery_managers: Mutex<BTreeMap<SessionId, Arc<RecoveryManager>>>,
    pool_adapter: Arc<PoolAdapter>,
    pool_registry: Arc<PoolRegistry>,
}

impl FleetApp {
    #[must_use]
    pub fn new(
        config: FleetConfig,
        store: Arc<dyn SessionStore>,
        token_provider: Arc<dyn TokenProvider>,
        now: DateTime<Utc>,
    ) -> Arc<Self> {
        let spawner_factory: Arc<dyn SpawnerFactory> = Arc::new(TokioSpawnerFactory);
        let pool_config: PoolConfig = config.pool.into();
        let pool = Arc::new(SessionPool::new(pool_config, spawner_factory));
        let breaker = Arc::new(CircuitBreaker::new(config.breaker.into(), now));
        let health = Arc::new(HealthChecker::new(HealthConfig::default()));
        let scaler = Arc::new(AutoScaler::new(config.scaler.into()));
        let metrics = Arc::new(PoolMetrics::new(config.breaker.slow_call_timeout_ms));
        let events = Arc::new(EventBus::new());

        let events_for_listener = events.clone();
        breaker.add_listener(Arc::new(move |from, to| {
            events_for_listener.publish_state_change(StateChangeEvent {
                component: "breaker".to_string(),
                from,
                to,
                timestamp: Utc::now(),
                reason: None,
            });
        }));

        let default_session_config = SessionConfig::new(
            config.working_dir.clone().unwrap_or_else(|| ".".to_string()),
            String::new(),
        );
        let default_process_config = build_process_config(&config, token_provider.as_ref());

        let pool_adapter = Arc::new(PoolAdapter {
            pool: pool.clone(),
            metrics: metrics.clone(),
            default_session_config,
            default_process_config,
        });
        let pool_registry = Arc::new(PoolRegistry(pool.clone()));

        Arc::new(Self {
            config,
            pool,
            breaker,
            health,
            scaler,
            metrics,
            events,
            store,
            token_provider,
            recovery_managers: Mutex::new(BTreeMap::new()),
            pool_adapter,
            pool_registry,
        })
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    fn build_process_config(&self) -> ProcessConfig {
        build_process_config(&self.config, self.token_provider.as_ref())
    }

    pub async fn acquire_session(&self, requested: SessionConfig, now: DateTime<Utc>) -> Result<SessionId, FleetError> {
        let process_config = self.build_process_config();
        let pool = self.pool.clone();
        let started = std::time::Instant::now();
        let outcome = self
            .breaker
            .execute(now, move || async move { pool.acquire_session(now, &requested, process_config).await })
            .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(id) => {
                self.metrics.record_call(now, true, elapsed_ms).await;
                if let Some(session) = self.find_session(&id).await {
                    let _ = self.store.upsert(&session);
                }
                Ok(id)
            }
            Err(FleetError::CircuitOpen) => {
                self.metrics.record_rejection().await;
                Err(FleetError::CircuitOpen)
            }
            Err(err) => {
                self.metrics.record_call(now, false, elapsed_ms).await;
                Err(err)
            }
        }
    }

    pub async fn release_session(&self, id: &SessionId, now: DateTime<Utc>) -> Result<(), FleetError> {
        self.pool.release_session(id, now).await?;
        if let Some(session) = self.find_session(id).await {
            let _ = self.store.upsert(&session);
        }
        Ok(())
    }

    async fn find_session(&self, id: &SessionId) -> Option<Session> {
        self.pool.list().await.into_iter().find(|s| &s.id == id)
    }

    pub async fn list_sessions(&self) -> Vec<Session> {
        self.pool.list().await
    }

    pub async fn overall_health(&self) -> HealthStatus {
        self.health.overall().await
    }

    /// Classify and dispatch an observed error for one pooled session,
    /// lazily building that session's dedicated recovery manager on
    /// first use (one `RecoveryManager` per supervisor, per C10).
    pub async fn handle_session_error(
        &self,
        session_id: &SessionId,
        message: &str,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<RecoveryOutcome, FleetError> {
        let supervisor = self
            .pool
            .session_supervisors()
            .await
            .into_iter()
            .find(|(id, _, _)| id == session_id)
            .map(|(_, supervisor, _)| supervisor)
            .ok_or_else(|| FleetError::UnknownSession(session_id.clone()))?;

        let manager = {
            let mut managers = self.recovery_managers.lock().await;
            managers
                .entry(session_id.clone())
                .or_insert_with(move || {
                    let backoff = BackoffCalculator::new(
                        BackoffStrategy::Exponential,
                        self.config.recovery.backoff_base_ms,
                        self.config.recovery.backoff_max_ms,
                    );
                    Arc::new(RecoveryManager::new(
                        self.config.recovery.into(),
                        supervisor,
                        self.breaker.clone(),
                        self.build_process_config(),
                        backoff,
                    ))
                })
                .clone()
        };

        let mut rng = rand::thread_rng();
        Ok(manager.handle_error(message, now, None, &mut rng, cancel).await)
    }

    /// Spawn every background loop (scaler tick, health probes, pool
    /// reaper, event forwarders); all are cancelled together via `cancel`.
    pub fn spawn_background_tasks(self: &Arc<Self>, cancel: CancellationToken) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();

        {
            let scaler = self.scaler.clone();
            let observer = self.pool_adapter.clone();
            let resizer = self.pool_adapter.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move { scaler.run(observer, resizer, cancel).await }));
        }

        {
            let health = self.health.clone();
            let registry = self.pool_registry.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move { health.run(registry, cancel).await }));
        }

        {
            let events = self.events.clone();
            let upstream = self.scaler.subscribe();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move { events.forward_scaling_decisions(upstream, cancel).await }));
        }

        {
            let events = self.events.clone();
            let upstream = self.health.subscribe();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move { events.forward_health_issues(upstream, cancel).await }));
        }

        {
            let events = self.events.clone();
            let upstream = self.pool.subscribe();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move { events.forward_session_events(upstream, cancel).await }));
        }

        {
            let app = self.clone();
            let interval = self.config.pool.cleanup_interval_secs;
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move { app.run_reap_loop(interval, cancel).await }));
        }

        {
            let app = self.clone();
            let interval = self.config.recovery.summary_interval_secs;
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move { app.run_summary_ticker(interval, cancel).await }));
        }

        handles
    }

    /// Log aggregate pool/breaker/metrics stats on a fixed interval, for
    /// operators tailing the daemon log instead of polling `status`.
    async fn run_summary_ticker(self: Arc<Self>, interval_secs: u64, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let now = Utc::now();
                    let pool_stats = self.pool.stats().await;
                    let breaker_metrics = self.breaker.metrics(now).await;
                    let snapshot = self.metrics.snapshot(now).await;
                    tracing::info!(
                        total = pool_stats.total,
                        active = pool_stats.active,
                        idle = pool_stats.idle,
                        breaker_state = ?breaker_metrics.state,
                        failure_rate = snapshot.failure_rate,
                        total_calls = snapshot.total_calls,
                        "pool summary",
                    );
                }
            }
        }
    }

    async fn run_reap_loop(self: Arc<Self>, interval_secs: u64, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let reaped = self.pool.reap(Utc::now()).await;
                    for id in &reaped {
                        let _ = self.store.remove(id);
                    }
                    if !reaped.is_empty() {
                        tracing::info!(count = reaped.len(), "reaped idle/expired sessions");
                    }
                }
            }
        }
    }

    /// Cumulative broadcast decision events seen on the scaling bus, the
    /// subset consumed by `status`.
    pub fn subscribe_scaling_decisions(&self) -> tokio::sync::broadcast::Receiver<ScalingDecision> {
        self.events.scaling_decision.subscribe()
    }
}

fn build_process_config(config: &FleetConfig, token_provider: &dyn TokenProvider) -> ProcessConfig {
    let mut process_config = ProcessConfig::new(config.command.clone());
    process_config.args = config.args.clone();
    process_config.working_dir.clone_from(&config.working_dir);
    process_config.stop_timeout = std::time::Duration::from_secs(config.recovery.stop_timeout_secs);
    for key in &config.env_passthrough {
        if let Ok(value) = std::env::var(key) {
            process_config.env.insert(key.clone(), value);
        }
    }
    if let Ok(token) = token_provider.get_token() {
        process_config.env.insert("FLEET_TOKEN".to_string(), token);
    }
    process_config
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::token::EnvTokenProvider;

    fn sleepy_config() -> FleetConfig {
        let mut config = FleetConfig::default();
        config.command = "sleep".to_string();
        config.args = vec!["30".to_string()];
        config
    }

    #[tokio::test]
    async fn acquire_then_release_round_trips_through_store() {
        let app = FleetApp::new(sleepy_config(), Arc::new(InMemoryStore::default()), Arc::new(EnvTokenProvider::default()), Utc::now());
        let requested = SessionConfig::new("/work", "be helpful");
        let id = app.acquire_session(requested, Utc::now()).await.unwrap();
        assert_eq!(app.list_sessions().await.len(), 1);
        app.release_session(&id, Utc::now()).await.unwrap();
        let stored = app.store.list().unwrap();
        assert_eq!(stored.len(), 1);
        app.pool.remove_session(&id).await.unwrap();
    }

    #[tokio::test]
    async fn handle_session_error_reuses_same_manager() {
        let app = FleetApp::new(sleepy_config(), Arc::new(InMemoryStore::default()), Arc::new(EnvTokenProvider::default()), Utc::now());
        let requested = SessionConfig::new("/work", "be helpful");
        let id = app.acquire_session(requested, Utc::now()).await.unwrap();
        let cancel = CancellationToken::new();
        let outcome = app.handle_session_error(&id, "permission denied", Utc::now(), &cancel).await.unwrap();
        assert!(matches!(outcome, RecoveryOutcome::Failed { .. }));
        assert_eq!(app.recovery_managers.lock().await.len(), 1);
        app.pool.remove_session(&id).await.unwrap();
    }
}
