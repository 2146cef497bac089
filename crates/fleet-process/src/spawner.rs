//! The one side-effecting seam in the supervisor: actually forking a
//! child. Kept behind a trait so tests can inject a fake without touching
//! a real binary, the way `TmuxCommandRunner` is mocked for tmux calls.

use std::process::Stdio;

use tokio::process::{Child, Command};

use crate::types::ProcessConfig;

pub trait ChildSpawner: Send + Sync {
    fn spawn(&self, config: &ProcessConfig) -> std::io::Result<Child>;
}

/// Spawns the real binary via `tokio::process::Command`, stdio piped so a
/// health probe can later write to stdin / read from stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSpawner;

impl ChildSpawner for TokioSpawner {
    fn spawn(&self, config: &ProcessConfig) -> std::io::Result<Child> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args);
        if let Some(dir) = &config.working_dir {
            cmd.current_dir(dir);
        }
        cmd.envs(&config.env);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::null());
        cmd.kill_on_drop(false);
        cmd.spawn()
    }
}

impl<T: ChildSpawner + ?Sized> ChildSpawner for &T {
    fn spawn(&self, config: &ProcessConfig) -> std::io::Result<Child> {
        (**self).spawn(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokio_spawner_spawns_real_command() {
        let spawner = TokioSpawner;
        let cfg = ProcessConfig::new("true");
        let rt = tokio::runtime::Builder::new_current_thread().enable_io().build().unwrap();
        let _guard = rt.enter();
        let child = spawner.spawn(&cfg);
        assert!(child.is_ok());
    }

    #[test]
    fn spawn_failure_surfaces_as_io_error() {
        let spawner = TokioSpawner;
        let cfg = ProcessConfig::new("definitely-not-a-real-binary-xyz");
        let rt = tokio::runtime::Builder::new_current_thread().enable_io().build().unwrap();
        let _guard = rt.enter();
        assert!(spawner.spawn(&cfg).is_err());
    }
}
