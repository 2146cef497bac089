//! C3: maps an error message to `(ErrorKind, RecoveryAction)` by substring.

/// Broad category an observed error falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Process,
    Resource,
    Timeout,
    Auth,
    Network,
    Quota,
    Config,
    Dependency,
    Unknown,
}

impl ErrorKind {
    /// Backoff delay multiplier for this kind, per the error-kind weight
    /// table. `Transient` and `Permanent` take the "internal" and
    /// "validation" weights respectively: a permanent error is rarely
    /// worth retrying hard, an internal/transient one retries near the
    /// unweighted base.
    #[must_use]
    pub fn backoff_weight(self) -> f64 {
        match self {
            ErrorKind::Network => 1.0,
            ErrorKind::Process => 1.5,
            ErrorKind::Auth => 0.5,
            ErrorKind::Resource => 2.0,
            ErrorKind::Timeout => 1.2,
            ErrorKind::Permanent => 0.3,
            ErrorKind::Transient => 1.3,
            ErrorKind::Config => 0.8,
            ErrorKind::Dependency => 1.4,
            ErrorKind::Quota => 3.0,
            ErrorKind::Unknown => 1.0,
        }
    }
}

/// What the recovery manager should do about a classified error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecoveryAction {
    Ignore,
    Retry,
    Restart,
    CircuitBreak,
    Fail,
}

/// One substring trigger row. Matching is case-insensitive and the first
/// matching row wins, so order here is significant.
struct Rule {
    triggers: &'static [&'static str],
    kind: ErrorKind,
    action: RecoveryAction,
}

const RULES: &[Rule] = &[
    Rule {
        triggers: &["connection refused", "timeout", "eof"],
        kind: ErrorKind::Transient,
        action: RecoveryAction::Retry,
    },
    Rule {
        triggers: &["permission denied", "not found", "invalid arg"],
        kind: ErrorKind::Permanent,
        action: RecoveryAction::Fail,
    },
    Rule {
        triggers: &["process exited", "signal: killed"],
        kind: ErrorKind::Process,
        action: RecoveryAction::Restart,
    },
    Rule {
        triggers: &["out of memory", "too many open files"],
        kind: ErrorKind::Resource,
        action: RecoveryAction::CircuitBreak,
    },
    Rule {
        triggers: &["quota", "rate limit"],
        kind: ErrorKind::Quota,
        action: RecoveryAction::Retry,
    },
];

/// Classify an error by its message text. Unmatched messages classify as
/// `(Unknown, Ignore)`.
#[must_use]
pub fn classify(message: &str) -> (ErrorKind, RecoveryAction) {
    let lower = message.to_lowercase();
    for rule in RULES {
        if rule.triggers.iter().any(|t| lower.contains(t)) {
            return (rule.kind, rule.action);
        }
    }
    (ErrorKind::Unknown, RecoveryAction::Ignore)
}
