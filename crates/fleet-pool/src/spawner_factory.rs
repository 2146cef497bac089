//! The pool spawns one `ProcessSupervisor` per session, each needing its
//! own `ChildSpawner`. This factory seam lets tests inject a fake spawner
//! for every session the pool creates, not just one.

use fleet_process::{ChildSpawner, TokioSpawner};

pub trait SpawnerFactory: Send + Sync {
    fn make(&self) -> Box<dyn ChildSpawner>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSpawnerFactory;

impl SpawnerFactory for TokioSpawnerFactory {
    fn make(&self) -> Box<dyn ChildSpawner> {
        Box::new(TokioSpawner)
    }
}
