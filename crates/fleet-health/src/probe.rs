//! Individual health probes (C7), `{Ping, ProcessAlive, Memory, Response,
//! Load}` per the probe set. Each of the five reads real state off the
//! supervisor (the signal-0 probe, `/proc`-backed resource usage, or the
//! supervisor's own timed health check) rather than standing in as an
//! always-pass placeholder.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleet_core::ResourceCaps;
use fleet_process::ProcessSupervisor;

#[async_trait]
pub trait HealthProbe: Send + Sync {
    fn name(&self) -> &'static str;
    async fn check(&self) -> bool;
}

/// A cheap liveness check — the supervisor believes the child is running,
/// without the signal-0 round trip `process_alive` pays for.
pub struct PingProbe {
    supervisor: Arc<ProcessSupervisor>,
}

impl PingProbe {
    #[must_use]
    pub fn new(supervisor: Arc<ProcessSupervisor>) -> Self {
        Self { supervisor }
    }
}

#[async_trait]
impl HealthProbe for PingProbe {
    fn name(&self) -> &'static str {
        "ping"
    }

    async fn check(&self) -> bool {
        self.supervisor.is_running()
    }
}

pub struct ProcessAliveProbe {
    supervisor: Arc<ProcessSupervisor>,
}

impl ProcessAliveProbe {
    #[must_use]
    pub fn new(supervisor: Arc<ProcessSupervisor>) -> Self {
        Self { supervisor }
    }
}

#[async_trait]
impl HealthProbe for ProcessAliveProbe {
    fn name(&self) -> &'static str {
        "process_alive"
    }

    async fn check(&self) -> bool {
        self.supervisor.health_check().await.is_ok()
    }
}

/// Fails once RSS exceeds `ResourceCaps::max_memory_mb`. With no cap
/// configured, a missing resource sample (pid gone) is the only failure
/// mode — there is nothing to compare against otherwise.
pub struct MemoryProbe {
    supervisor: Arc<ProcessSupervisor>,
    max_memory_mb: Option<u64>,
}

impl MemoryProbe {
    #[must_use]
    pub fn new(supervisor: Arc<ProcessSupervisor>, caps: &ResourceCaps) -> Self {
        Self {
            supervisor,
            max_memory_mb: caps.max_memory_mb,
        }
    }
}

#[async_trait]
impl HealthProbe for MemoryProbe {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn check(&self) -> bool {
        if !self.supervisor.is_running() {
            return true;
        }
        let Some(usage) = self.supervisor.resource_usage() else {
            return false;
        };
        match self.max_memory_mb {
            Some(cap_mb) => usage.memory_bytes <= cap_mb * 1024 * 1024,
            None => true,
        }
    }
}

/// Fails when the supervisor's own signal-0 health check doesn't return
/// within `timeout`.
pub struct ResponseProbe {
    supervisor: Arc<ProcessSupervisor>,
    timeout: Duration,
}

impl ResponseProbe {
    #[must_use]
    pub fn new(supervisor: Arc<ProcessSupervisor>, timeout: Duration) -> Self {
        Self { supervisor, timeout }
    }
}

#[async_trait]
impl HealthProbe for ResponseProbe {
    fn name(&self) -> &'static str {
        "response"
    }

    async fn check(&self) -> bool {
        if !self.supervisor.is_running() {
            return true;
        }
        tokio::time::timeout(self.timeout, self.supervisor.health_check())
            .await
            .is_ok_and(|result| result.is_ok())
    }
}

/// Fails once CPU usage exceeds `ResourceCaps::max_cpu_percent`, falling
/// back to the breaker's own `load_threshold` default (80%) when the
/// session sets no explicit cap.
pub struct LoadProbe {
    supervisor: Arc<ProcessSupervisor>,
    max_cpu_percent: f32,
}

const DEFAULT_MAX_CPU_PERCENT: f32 = 80.0;

impl LoadProbe {
    #[must_use]
    pub fn new(supervisor: Arc<ProcessSupervisor>, caps: &ResourceCaps) -> Self {
        Self {
            supervisor,
            max_cpu_percent: caps.max_cpu_percent.map_or(DEFAULT_MAX_CPU_PERCENT, |p| p as f32),
        }
    }
}

#[async_trait]
impl HealthProbe for LoadProbe {
    fn name(&self) -> &'static str {
        "load"
    }

    async fn check(&self) -> bool {
        if !self.supervisor.is_running() {
            return true;
        }
        match self.supervisor.resource_usage() {
            Some(usage) => usage.cpu_percent <= self.max_cpu_percent,
            None => false,
        }
    }
}

/// A probe backed by a plain sync predicate, used only by tests that want
/// to force a probe outcome without standing up a real supervisor.
pub struct ClosureProbe {
    name: &'static str,
    check_fn: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl ClosureProbe {
    pub fn new(name: &'static str, check_fn: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self {
            name,
            check_fn: Arc::new(check_fn),
        }
    }

    #[must_use]
    pub fn always_healthy(name: &'static str) -> Self {
        Self::new(name, || true)
    }
}

#[async_trait]
impl HealthProbe for ClosureProbe {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn check(&self) -> bool {
        (self.check_fn)()
    }
}

/// The spec's default probe set: `{Ping, ProcessAlive, Memory, Response,
/// Load}`, each reading live state off `supervisor`. `caps` supplies the
/// memory/cpu ceilings the owning session was configured with.
#[must_use]
pub fn default_probes(supervisor: Arc<ProcessSupervisor>, caps: &ResourceCaps) -> Vec<Box<dyn HealthProbe>> {
    vec![
        Box::new(PingProbe::new(supervisor.clone())),
        Box::new(ProcessAliveProbe::new(supervisor.clone())),
        Box::new(MemoryProbe::new(supervisor.clone(), caps)),
        Box::new(ResponseProbe::new(supervisor.clone(), Duration::from_millis(500))),
        Box::new(LoadProbe::new(supervisor, caps)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_process::TokioSpawner;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn closure_probe_reports_its_predicate() {
        let probe = ClosureProbe::new("memory", || false);
        assert_eq!(probe.name(), "memory");
        assert!(!probe.check().await);
    }

    #[tokio::test]
    async fn closure_probe_reads_live_state() {
        let flag = Arc::new(AtomicBool::new(true));
        let flag2 = flag.clone();
        let probe = ClosureProbe::new("load", move || flag2.load(Ordering::SeqCst));
        assert!(probe.check().await);
        flag.store(false, Ordering::SeqCst);
        assert!(!probe.check().await);
    }

    #[tokio::test]
    async fn memory_probe_passes_under_cap() {
        let sup = Arc::new(ProcessSupervisor::new(Box::new(TokioSpawner)));
        let mut cfg = fleet_process::ProcessConfig::new("sleep");
        cfg.args = vec!["5".to_string()];
        sup.start(cfg).await.unwrap();
        let caps = ResourceCaps { max_memory_mb: Some(10_000), max_cpu_percent: None };
        let probe = MemoryProbe::new(sup.clone(), &caps);
        assert!(probe.check().await);
        sup.kill().await.unwrap();
    }

    #[tokio::test]
    async fn memory_probe_fails_over_cap() {
        let sup = Arc::new(ProcessSupervisor::new(Box::new(TokioSpawner)));
        let mut cfg = fleet_process::ProcessConfig::new("sleep");
        cfg.args = vec!["5".to_string()];
        sup.start(cfg).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let caps = ResourceCaps { max_memory_mb: Some(0), max_cpu_percent: None };
        let probe = MemoryProbe::new(sup.clone(), &caps);
        assert!(!probe.check().await);
        sup.kill().await.unwrap();
    }

    #[tokio::test]
    async fn memory_probe_passes_when_not_running() {
        let sup = Arc::new(ProcessSupervisor::new(Box::new(TokioSpawner)));
        let caps = ResourceCaps { max_memory_mb: Some(0), max_cpu_percent: None };
        let probe = MemoryProbe::new(sup, &caps);
        assert!(probe.check().await);
    }

    #[tokio::test]
    async fn response_probe_passes_while_running() {
        let sup = Arc::new(ProcessSupervisor::new(Box::new(TokioSpawner)));
        let mut cfg = fleet_process::ProcessConfig::new("sleep");
        cfg.args = vec!["5".to_string()];
        sup.start(cfg).await.unwrap();
        let probe = ResponseProbe::new(sup.clone(), Duration::from_secs(1));
        assert!(probe.check().await);
        sup.kill().await.unwrap();
    }

    #[tokio::test]
    async fn ping_probe_fails_once_stopped() {
        let sup = Arc::new(ProcessSupervisor::new(Box::new(TokioSpawner)));
        let probe = PingProbe::new(sup);
        assert!(!probe.check().await);
    }
}
