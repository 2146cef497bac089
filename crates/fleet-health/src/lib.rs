//! C7: multi-probe per-session health checking and overall fleet health.

pub mod checker;
pub mod probe;
pub mod record;

pub use checker::{HealthChecker, HealthIssue, HealthIssueKind, SessionRegistry, Severity};
pub use probe::{default_probes, ClosureProbe, HealthProbe, LoadProbe, MemoryProbe, PingProbe, ProcessAliveProbe, ResponseProbe};
pub use record::{derive_score, derive_status, overall_health, success_rate, HealthConfig};
