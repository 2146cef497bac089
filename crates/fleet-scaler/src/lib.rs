//! C9: auto-scaler — windowed utilization sampling, scale-up/scale-down
//! predicates with cooldown gating, and a confidence score attached to
//! every decision.

pub mod scaler;
pub mod scaler_math;
pub mod types;

pub use scaler::{AutoScaler, PoolObserver, PoolResizer};
pub use scaler_math::decide;
pub use types::{ScaleAction, ScalerConfig, ScalingDecision, MIN_SAMPLES_TO_EVALUATE};
