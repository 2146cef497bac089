//! Pure supervisor-core types and logic: data model, error taxonomy,
//! generic state machine, backoff calculator, error classifier, and the
//! breaker's sliding-window/percentile math.
//!
//! Nothing here touches tokio, a process, or the clock — every time-aware
//! function takes `now` as a parameter. Stateful, async wrappers around
//! these types live in the sibling `fleet-*` crates. The one exception is
//! `listener_dispatch`'s small fixed pool of OS threads, which detaches
//! `StateMachine` listener notifications off the caller without pulling
//! in an async runtime.

pub mod backoff;
pub mod breaker_math;
pub mod classifier;
pub mod error;
mod listener_dispatch;
pub mod state_machine;
pub mod types;

pub use backoff::{BackoffCalculator, BackoffStrategy, JitterMode};
pub use breaker_math::{dynamic_adjust, PercentileTracker, SlidingWindow, WindowMetrics};
pub use classifier::{classify, ErrorKind, RecoveryAction};
pub use error::FleetError;
pub use state_machine::{Listener, StateMachine};
pub use types::{
    compatible, CallResult, CircuitState, HealthRecord, HealthStatus, PoolStats, ResourceCaps,
    ScalingMetric, Session, SessionConfig, SessionId, SessionState, Thresholds,
};
