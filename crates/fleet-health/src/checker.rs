//! C7: orchestrates the probe set across sessions, maintains each
//! session's rolling `HealthRecord`, aggregates overall health, and emits
//! `HealthIssue` events for downstream alerting.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use fleet_core::{HealthRecord, HealthStatus, ResourceCaps, SessionId};
use fleet_process::ProcessSupervisor;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;

use crate::probe::{default_probes, HealthProbe};
use crate::record::{derive_status, overall_health, record_probe_outcome, HealthConfig};

const EVENT_BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthIssueKind {
    HighLatency,
    MemoryLeak,
    ProcessDead,
    HighErrorRate,
    ResourceExhaustion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthIssue {
    pub kind: HealthIssueKind,
    pub severity: Severity,
    pub session_id: Option<SessionId>,
    pub description: String,
    pub timestamp: chrono::DateTime<Utc>,
    pub count: u32,
}

/// Supplies the set of sessions (and their owning supervisors) to probe on
/// each tick. The pool is the production implementation of this boundary.
#[async_trait]
pub trait SessionRegistry: Send + Sync {
    async fn sessions(&self) -> Vec<(SessionId, Arc<ProcessSupervisor>, ResourceCaps)>;
}

pub struct HealthChecker {
    config: HealthConfig,
    records: Mutex<BTreeMap<SessionId, HealthRecord>>,
    issues: broadcast::Sender<HealthIssue>,
}

impl HealthChecker {
    #[must_use]
    pub fn new(config: HealthConfig) -> Self {
        let (issues, _rx) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            config,
            records: Mutex::new(BTreeMap::new()),
            issues,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HealthIssue> {
        self.issues.subscribe()
    }

    pub async fn record_for(&self, session_id: &SessionId) -> Option<HealthRecord> {
        self.records.lock().await.get(session_id).cloned()
    }

    pub async fn overall(&self) -> HealthStatus {
        let records = self.records.lock().await;
        let statuses: Vec<HealthStatus> = records.values().map(|r| r.status).collect();
        overall_health(&statuses)
    }

    /// Run the probe set for one session and fold the outcome into its
    /// record, emitting any `HealthIssue`s the new status warrants.
    pub async fn check_session(&self, session_id: SessionId, probes: &[Box<dyn HealthProbe>]) {
        let start = Instant::now();
        let mut failed_probe = None;
        let mut all_ok = true;
        for probe in probes {
            if !probe.check().await {
                all_ok = false;
                if failed_probe.is_none() {
                    failed_probe = Some(probe.name());
                }
            }
        }
        let response_time_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        let mut records = self.records.lock().await;
        let record = records.entry(session_id.clone()).or_default();
        let previous_status = record.status;
        record_probe_outcome(record, all_ok, response_time_ms, &self.config);
        let new_status = derive_status(record, &self.config);
        let record_snapshot = record.clone();
        drop(records);

        self.emit_issues(&session_id, failed_probe, previous_status, new_status, &record_snapshot);
    }

    fn emit_issues(
        &self,
        session_id: &SessionId,
        failed_probe: Option<&'static str>,
        previous_status: HealthStatus,
        new_status: HealthStatus,
        record: &HealthRecord,
    ) {
        let now = Utc::now();
        if failed_probe == Some("process_alive") {
            self.publish(HealthIssue {
                kind: HealthIssueKind::ProcessDead,
                severity: Severity::Critical,
                session_id: Some(session_id.clone()),
                description: "process_alive probe failed".into(),
                timestamp: now,
                count: record.consecutive_failure,
            });
            return;
        }
        if failed_probe == Some("memory") {
            self.publish(HealthIssue {
                kind: HealthIssueKind::MemoryLeak,
                severity: Severity::High,
                session_id: Some(session_id.clone()),
                description: "memory probe exceeded configured cap".into(),
                timestamp: now,
                count: record.consecutive_failure,
            });
            return;
        }
        if failed_probe == Some("load") {
            self.publish(HealthIssue {
                kind: HealthIssueKind::ResourceExhaustion,
                severity: Severity::High,
                session_id: Some(session_id.clone()),
                description: "load probe exceeded configured cpu cap".into(),
                timestamp: now,
                count: record.consecutive_failure,
            });
            return;
        }
        if new_status == HealthStatus::Failed && previous_status != HealthStatus::Failed {
            self.publish(HealthIssue {
                kind: HealthIssueKind::HighErrorRate,
                severity: Severity::High,
                session_id: Some(session_id.clone()),
                description: "consecutive failures exceeded threshold".into(),
                timestamp: now,
                count: record.consecutive_failure,
            });
        } else if record.avg_response_time_ms > self.config.response_timeout_ms as f64 {
            self.publish(HealthIssue {
                kind: HealthIssueKind::HighLatency,
                severity: Severity::Medium,
                session_id: Some(session_id.clone()),
                description: "average probe response time above timeout".into(),
                timestamp: now,
                count: 1,
            });
        }
    }

    fn publish(&self, issue: HealthIssue) {
        // A full event bus just means nobody is listening; drop and move on.
        let _ = self.issues.send(issue);
    }

    /// Background loop: every `config.interval`, probe every session the
    /// registry currently reports, until `cancel` fires.
    pub async fn run(self: Arc<Self>, registry: Arc<dyn SessionRegistry>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    for (session_id, supervisor, caps) in registry.sessions().await {
                        let probes = default_probes(supervisor, &caps);
                        self.check_session(session_id, &probes).await;
                    }
                }
            }
        }
    }
}
