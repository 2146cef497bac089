//! Core data model: sessions, configs, breaker/pool/health records.
//!
//! Pure types only — no IO, no process handles. Component crates own the
//! live process handle and wrap these types with locks as needed.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a supervised session.
pub type SessionId = String;

// ─── Session config ───────────────────────────────────────────────

/// Resource caps applied to a spawned child. `None` means "no cap".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCaps {
    pub max_memory_mb: Option<u64>,
    pub max_cpu_percent: Option<u32>,
}

/// The configuration a session was built for. Immutable after creation.
///
/// Equality key for pool reuse — see [`compatible`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub working_dir: String,
    pub system_prompt: String,
    pub allowed_tools: BTreeSet<String>,
    pub env: BTreeMap<String, String>,
    pub turn_limit: Option<u32>,
    pub resource_caps: ResourceCaps,
}

impl SessionConfig {
    pub fn new(working_dir: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            working_dir: working_dir.into(),
            system_prompt: system_prompt.into(),
            allowed_tools: BTreeSet::new(),
            env: BTreeMap::new(),
            turn_limit: None,
            resource_caps: ResourceCaps::default(),
        }
    }
}

/// Two configs are compatible when working directory, system prompt, and
/// allowed-tool set are equal, and every key the requester sets in `env`
/// matches the session's value. The session may carry extra env keys.
///
/// `session` is the pooled session's config; `requested` is what the
/// caller asked for.
#[must_use]
pub fn compatible(session: &SessionConfig, requested: &SessionConfig) -> bool {
    if session.working_dir != requested.working_dir {
        return false;
    }
    if session.system_prompt != requested.system_prompt {
        return false;
    }
    if session.allowed_tools != requested.allowed_tools {
        return false;
    }
    requested
        .env
        .iter()
        .all(|(k, v)| session.env.get(k) == Some(v))
}

// ─── Session state ────────────────────────────────────────────────

/// Lifecycle state of a pooled session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Creating,
    Ready,
    Active,
    Idle,
    Suspended,
    Closing,
    Closed,
    Error,
}

impl SessionState {
    /// Allowed `(from, to)` edges for the session state machine.
    pub const EDGES: &'static [(SessionState, SessionState)] = &[
        (SessionState::Creating, SessionState::Ready),
        (SessionState::Ready, SessionState::Active),
        (SessionState::Active, SessionState::Idle),
        (SessionState::Idle, SessionState::Active),
        (SessionState::Creating, SessionState::Suspended),
        (SessionState::Ready, SessionState::Suspended),
        (SessionState::Active, SessionState::Suspended),
        (SessionState::Idle, SessionState::Suspended),
        (SessionState::Suspended, SessionState::Ready),
        (SessionState::Active, SessionState::Closing),
        (SessionState::Idle, SessionState::Closing),
        (SessionState::Ready, SessionState::Closing),
        (SessionState::Suspended, SessionState::Closing),
        (SessionState::Closing, SessionState::Closed),
        (SessionState::Creating, SessionState::Error),
        (SessionState::Ready, SessionState::Error),
        (SessionState::Active, SessionState::Error),
        (SessionState::Idle, SessionState::Error),
        (SessionState::Suspended, SessionState::Error),
        (SessionState::Closing, SessionState::Error),
        (SessionState::Error, SessionState::Closed),
    ];

    /// A session in a terminal state is never handed out by the pool.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Error)
    }
}

/// A single supervised session record (no owned process handle — that
/// lives in the pool alongside this record).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub config: SessionConfig,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub use_count: u64,
    pub pid: Option<u32>,
}

impl Session {
    pub fn new(id: SessionId, config: SessionConfig, now: DateTime<Utc>) -> Self {
        Self {
            id,
            config,
            state: SessionState::Creating,
            created_at: now,
            last_used: now,
            use_count: 0,
            pid: None,
        }
    }
}

// ─── Circuit breaker ──────────────────────────────────────────────

/// Tri-state-plus-forced breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    HalfOpen,
    Open,
    ForcedOpen,
    ForcedClosed,
}

/// One recorded call outcome in the breaker's sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CallResult {
    pub success: bool,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Mutable, validated breaker thresholds. Read as an atomic snapshot —
/// see [`Thresholds::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub failure_rate: f64,
    pub slow_call_rate: f64,
    pub min_calls: u32,
    pub window_secs: u64,
    pub half_open_max_calls: u32,
    pub slow_call_timeout_ms: u64,
    pub open_timeout_secs: u64,
    pub dynamic_adjustment: bool,
    pub load_threshold: f64,
    pub dynamic_factor: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            failure_rate: 0.5,
            slow_call_rate: 0.3,
            min_calls: 10,
            window_secs: 60,
            half_open_max_calls: 5,
            slow_call_timeout_ms: 5_000,
            open_timeout_secs: 30,
            dynamic_adjustment: false,
            load_threshold: 0.8,
            dynamic_factor: 0.2,
        }
    }
}

impl Thresholds {
    /// Validate invariants: rates in `[0,1]`, `min_calls > 0`.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.failure_rate) {
            return Err("failure_rate must be in [0,1]".into());
        }
        if !(0.0..=1.0).contains(&self.slow_call_rate) {
            return Err("slow_call_rate must be in [0,1]".into());
        }
        if self.min_calls == 0 {
            return Err("min_calls must be > 0".into());
        }
        if self.window_secs == 0 {
            return Err("window_secs must be > 0".into());
        }
        if self.half_open_max_calls == 0 {
            return Err("half_open_max_calls must be > 0".into());
        }
        Ok(())
    }
}

// ─── Pool stats ───────────────────────────────────────────────────

/// Point-in-time pool occupancy snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoolStats {
    pub total: u32,
    pub active: u32,
    pub idle: u32,
    pub max_capacity: u32,
}

impl PoolStats {
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max_capacity == 0 {
            0.0
        } else {
            f64::from(self.active) / f64::from(self.max_capacity)
        }
    }
}

// ─── Scaling metric ───────────────────────────────────────────────

/// One auto-scaler sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalingMetric {
    pub timestamp: DateTime<Utc>,
    pub utilization: f64,
    pub cpu: f64,
    pub memory: f64,
    pub queue_length: u32,
    pub response_time_ms: f64,
    pub error_rate: f64,
    pub throughput: f64,
}

// ─── Health ───────────────────────────────────────────────────────

/// Derived health status for a single session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Warning,
    Critical,
    Failed,
}

/// Rolling per-session health record. `last_results` is bounded to the
/// most recent 10 probe outcomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub total_checks: u64,
    pub successful_checks: u64,
    pub failed_checks: u64,
    pub consecutive_success: u32,
    pub consecutive_failure: u32,
    pub avg_response_time_ms: f64,
    pub last_results: VecDeque<bool>,
    pub status: HealthStatus,
    pub score: f64,
}

impl Default for HealthRecord {
    fn default() -> Self {
        Self {
            total_checks: 0,
            successful_checks: 0,
            failed_checks: 0,
            consecutive_success: 0,
            consecutive_failure: 0,
            avg_response_time_ms: 0.0,
            last_results: VecDeque::with_capacity(10),
            status: HealthStatus::Unknown,
            score: 0.0,
        }
    }
}
