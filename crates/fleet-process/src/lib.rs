//! C4: process supervisor — owns one externally-spawned child end to end.

pub mod error;
pub mod spawner;
pub mod supervisor;
pub mod types;

pub use error::ProcessError;
pub use spawner::{ChildSpawner, TokioSpawner};
pub use supervisor::{ProcessSupervisor, ResourceUsage};
pub use types::{ProcessConfig, ProcessState};
