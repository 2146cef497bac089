//! Pool-level configuration and the `SessionEvent` bus payload (C6).

use std::time::Duration;

use chrono::{DateTime, Utc};
use fleet_core::SessionId;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_sessions: u32,
    pub max_idle_time: Duration,
    pub max_lifetime: Duration,
    pub cleanup_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_sessions: 10,
            max_idle_time: Duration::from_secs(30 * 60),
            max_lifetime: Duration::from_secs(4 * 60 * 60),
            cleanup_interval: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEventKind {
    Created,
    Started,
    Suspended,
    Resumed,
    Closed,
    Error,
    StateChanged,
    ConfigUpdated,
    MetadataUpdated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub session_id: SessionId,
    pub kind: SessionEventKind,
    pub timestamp: DateTime<Utc>,
    pub data: Option<String>,
    pub error: Option<String>,
}
