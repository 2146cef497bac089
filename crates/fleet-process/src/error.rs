//! Process-supervisor-local error type, convertible into `fleet_core::FleetError`.

use fleet_core::FleetError;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("spawn failed: {0}")]
    SpawnFailed(String),
    #[error("already active in state {0:?}")]
    AlreadyActive(crate::types::ProcessState),
    #[error("stop failed: {0}")]
    StopFailed(String),
    #[error("kill failed: {0}")]
    KillFailed(String),
    #[error("unexpected exit: pid={pid:?} code={code:?}")]
    UnexpectedExit { pid: Option<u32>, code: Option<i32> },
    #[error("health check failed: {0}")]
    HealthCheckFailed(String),
    #[error("no process is running")]
    NotRunning,
}

impl From<ProcessError> for FleetError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::SpawnFailed(msg) => FleetError::StartFailed(msg),
            ProcessError::AlreadyActive(state) => FleetError::InvalidState {
                expected: "Stopped or Error".into(),
                actual: format!("{state:?}"),
            },
            ProcessError::StopFailed(msg) => FleetError::StopFailed(msg),
            ProcessError::KillFailed(msg) => FleetError::KillFailed(msg),
            ProcessError::UnexpectedExit { pid, code } => FleetError::UnexpectedExit { pid, code },
            ProcessError::HealthCheckFailed(msg) => FleetError::HealthCheckFailed(msg),
            ProcessError::NotRunning => FleetError::HealthCheckFailed("not running".into()),
        }
    }
}
