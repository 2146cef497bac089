//! C10: recovery manager — classifies observed errors, consults the
//! breaker, and drives restart/retry/circuit-break decisions with
//! restart-count and backoff gating.

pub mod manager;
pub mod types;

pub use manager::RecoveryManager;
pub use types::{RecoveryConfig, RecoveryOutcome};
