//! Daemon configuration: a TOML file read via `--config`, overridable by
//! a fixed set of `FLEETD_*` environment variables, covering every
//! numeric default in the breaker/pool/scaler/recovery tables (§6).

use std::path::Path;
use std::time::Duration;

use fleet_core::Thresholds;
use fleet_pool::PoolConfig;
use fleet_recovery::RecoveryConfig;
use fleet_scaler::ScalerConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FleetConfig {
    /// Command to spawn for each session.
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    /// Env var names forwarded from the daemon's own environment into
    /// every spawned child, in addition to the token (§1.5).
    #[serde(default)]
    pub env_passthrough: Vec<String>,
    #[serde(default)]
    pub breaker: BreakerSettings,
    #[serde(default)]
    pub pool: PoolSettings,
    #[serde(default)]
    pub scaler: ScalerSettings,
    #[serde(default)]
    pub recovery: RecoverySettings,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            command: "true".to_string(),
            args: Vec::new(),
            working_dir: None,
            env_passthrough: Vec::new(),
            breaker: BreakerSettings::default(),
            pool: PoolSettings::default(),
            scaler: ScalerSettings::default(),
            recovery: RecoverySettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BreakerSettings {
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

impl Default for BreakerSettings {
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

impl From<BreakerSettings> for Thresholds {
    fn from(s: BreakerSettings) -> Self {
        Self {
            failure_rate: s.failure_rate,
            slow_call_rate: s.slow_call_rate,
            min_calls: s.min_calls,
            window_secs: s.window_secs,
            half_open_max_calls: s.half_open_max_calls,
            slow_call_timeout_ms: s.slow_call_timeout_ms,
            open_timeout_secs: s.open_timeout_secs,
            dynamic_adjustment: s.dynamic_adjustment,
            load_threshold: s.load_threshold,
            dynamic_factor: s.dynamic_factor,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PoolSettings {
    pub max_sessions: u32,
    pub max_idle_secs: u64,
    pub max_lifetime_secs: u64,
    pub cleanup_interval_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_sessions: 10,
            max_idle_secs: 30 * 60,
            max_lifetime_secs: 4 * 60 * 60,
            cleanup_interval_secs: 5 * 60,
        }
    }
}

impl From<PoolSettings> for PoolConfig {
    fn from(s: PoolSettings) -> Self {
        Self {
            max_sessions: s.max_sessions,
            max_idle_time: Duration::from_secs(s.max_idle_secs),
            max_lifetime: Duration::from_secs(s.max_lifetime_secs),
            cleanup_interval: Duration::from_secs(s.cleanup_interval_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ScalerSettings {
    pub tick_secs: u64,
    pub window_size: usize,
    pub min_sessions: u32,
    pub max_sessions: u32,
    pub scale_up_threshold: f64,
    pub scale_down_threshold: f64,
    pub factor: f64,
    pub scale_up_cooldown_secs: u64,
    pub scale_down_cooldown_secs: u64,
}

impl Default for ScalerSettings {
    fn default() -> Self {
        Self {
            tick_secs: 30,
            window_size: 20,
            min_sessions: 1,
            max_sessions: 10,
            scale_up_threshold: 0.8,
            scale_down_threshold: 0.3,
            factor: 1.5,
            scale_up_cooldown_secs: 60,
            scale_down_cooldown_secs: 120,
        }
    }
}

impl From<ScalerSettings> for ScalerConfig {
    fn from(s: ScalerSettings) -> Self {
        Self {
            tick_interval: Duration::from_secs(s.tick_secs),
            window_size: s.window_size,
            min_sessions: s.min_sessions,
            max_sessions: s.max_sessions,
            scale_up_threshold: s.scale_up_threshold,
            scale_down_threshold: s.scale_down_threshold,
            factor: s.factor,
            scale_up_cooldown: Duration::from_secs(s.scale_up_cooldown_secs),
            scale_down_cooldown: Duration::from_secs(s.scale_down_cooldown_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RecoverySettings {
    pub max_restarts: u32,
    pub restart_window_secs: u64,
    pub stop_timeout_secs: u64,
    pub summary_interval_secs: u64,
    pub liveness_interval_secs: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            restart_window_secs: 60 * 60,
            stop_timeout_secs: 10,
            summary_interval_secs: 5 * 60,
            liveness_interval_secs: 30,
            backoff_base_ms: 1_000,
            backoff_max_ms: 30_000,
        }
    }
}

impl From<RecoverySettings> for RecoveryConfig {
    fn from(s: RecoverySettings) -> Self {
        Self {
            max_restarts: s.max_restarts,
            restart_window: Duration::from_secs(s.restart_window_secs),
            stop_timeout: Duration::from_secs(s.stop_timeout_secs),
            summary_interval: Duration::from_secs(s.summary_interval_secs),
            liveness_interval: Duration::from_secs(s.liveness_interval_secs),
            backoff_base_ms: s.backoff_base_ms,
            backoff_max_ms: s.backoff_max_ms,
        }
    }
}

impl FleetConfig {
    /// Load from a TOML file, falling back to bit-exact defaults for any
    /// field the file omits.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)?;
        Ok(config)
    }

    /// Apply `FLEETD_*` overrides on top of a loaded (or default) config.
    /// Only a handful of high-value fields are override-able; the rest
    /// are expected to live in the TOML file.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("FLEETD_COMMAND") {
            self.command = v;
        }
        if let Ok(v) = std::env::var("FLEETD_MAX_SESSIONS") {
            if let Ok(n) = v.parse() {
                self.pool.max_sessions = n;
                self.scaler.max_sessions = n;
            }
        }
        if let Ok(v) = std::env::var("FLEETD_MAX_RESTARTS") {
            if let Ok(n) = v.parse() {
                self.recovery.max_restarts = n;
            }
        }
        if let Ok(v) = std::env::var("FLEETD_BREAKER_FAILURE_RATE") {
            if let Ok(n) = v.parse() {
                self.breaker.failure_rate = n;
            }
        }
        self
    }
}
