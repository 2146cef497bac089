//! Process supervisor data types.

use std::collections::BTreeMap;
use std::time::Duration;

/// What to spawn. Mirrors the `ProcessConfig` external-interface contract:
/// command, args, working directory, environment, and the timeout used
/// for graceful shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessConfig {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: Option<String>,
    pub env: BTreeMap<String, String>,
    pub stop_timeout: Duration,
}

impl ProcessConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
            stop_timeout: Duration::from_secs(10),
        }
    }
}

/// Lifecycle state of one supervised child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl ProcessState {
    /// Allowed `(from, to)` edges: the happy path plus `Error` reachable
    /// from any active state and exitable to `Stopped` or back to
    /// `Starting` (a restart attempt after failure).
    pub fn edges() -> Vec<(ProcessState, ProcessState)> {
        vec![
            (ProcessState::Stopped, ProcessState::Starting),
            (ProcessState::Starting, ProcessState::Running),
            (ProcessState::Running, ProcessState::Stopping),
            (ProcessState::Stopping, ProcessState::Stopped),
            (ProcessState::Starting, ProcessState::Error),
            (ProcessState::Running, ProcessState::Error),
            (ProcessState::Stopping, ProcessState::Error),
            (ProcessState::Error, ProcessState::Stopped),
            (ProcessState::Error, ProcessState::Starting),
        ]
    }
}
