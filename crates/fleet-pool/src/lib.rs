//! C6: session pool — reserve/return discipline keyed by configuration
//! compatibility, capacity enforcement, and idle/lifetime reaping.

pub mod pool;
pub mod spawner_factory;
pub mod types;

pub use pool::SessionPool;
pub use spawner_factory::{SpawnerFactory, TokioSpawnerFactory};
pub use types::{PoolConfig, SessionEvent, SessionEventKind};
