//! Closed error taxonomy shared by every supervisor component.

use std::fmt;

/// A process id, when known. `0` never occurs as a valid pid, so it is used
/// as "not applicable" in contexts that don't have a `Session`'s pid handy.
pub type Pid = u32;

/// Every public API in the supervisor core fails with one of these variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FleetError {
    InvalidArgument(String),
    InvalidState { expected: String, actual: String },
    PoolExhausted,
    UnknownSession(String),
    NotInUse(String),
    CircuitOpen,
    StartFailed(String),
    StopFailed(String),
    KillFailed(String),
    UnexpectedExit { pid: Option<Pid>, code: Option<i32> },
    HealthCheckFailed(String),
    Timeout,
    Cancelled,
    InvalidTransition { from: String, to: String },
    RestartLimitReached,
    BackoffNotElapsed { remaining_ms: u64 },
    ForcedOpen,
}

impl fmt::Display for FleetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::InvalidState { expected, actual } => {
                write!(f, "invalid state: expected {expected}, got {actual}")
            }
            Self::PoolExhausted => write!(f, "pool exhausted"),
            Self::UnknownSession(id) => write!(f, "unknown session: {id}"),
            Self::NotInUse(id) => write!(f, "session not in use: {id}"),
            Self::CircuitOpen => write!(f, "circuit open"),
            Self::StartFailed(msg) => write!(f, "start failed: {msg}"),
            Self::StopFailed(msg) => write!(f, "stop failed: {msg}"),
            Self::KillFailed(msg) => write!(f, "kill failed: {msg}"),
            Self::UnexpectedExit { pid, code } => {
                write!(f, "unexpected exit: pid={pid:?} code={code:?}")
            }
            Self::HealthCheckFailed(msg) => write!(f, "health check failed: {msg}"),
            Self::Timeout => write!(f, "timeout"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::InvalidTransition { from, to } => {
                write!(f, "invalid transition: {from} -> {to}")
            }
            Self::RestartLimitReached => write!(f, "restart limit reached"),
            Self::BackoffNotElapsed { remaining_ms } => {
                write!(f, "backoff not elapsed: {remaining_ms}ms remaining")
            }
            Self::ForcedOpen => write!(f, "forced open"),
        }
    }
}

impl std::error::Error for FleetError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_variant_detail() {
        let err = FleetError::UnknownSession("s-1".into());
        assert!(err.to_string().contains("s-1"));
    }

    #[test]
    fn unexpected_exit_displays_pid_and_code() {
        let err = FleetError::UnexpectedExit {
            pid: Some(42),
            code: Some(1),
        };
        let msg = err.to_string();
        assert!(msg.contains("42"));
        assert!(msg.contains('1'));
    }
}
