//! C4: owns one child process end to end — spawn, graceful stop escalating
//! to kill, crash detection, PID tracking.

use std::sync::Mutex as StdMutex;
use std::time::Duration;

use fleet_core::{FleetError, StateMachine};
use sysinfo::{Pid, System};
use tokio::process::Child;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use crate::error::ProcessError;
use crate::spawner::ChildSpawner;
use crate::types::{ProcessConfig, ProcessState};

/// How often the background monitor polls for an unexpected child exit.
const MONITOR_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A point-in-time resource sample for the supervised child, read from
/// `/proc` via `sysinfo`. `cpu_percent` is the usage observed since the
/// previous `resource_usage` call on this supervisor (0 on the first
/// call — `sysinfo` needs two samples to compute a delta).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceUsage {
    pub memory_bytes: u64,
    pub cpu_percent: f32,
}

pub struct ProcessSupervisor {
    state: StateMachine<ProcessState>,
    child: AsyncMutex<Option<Child>>,
    pid: StdMutex<Option<u32>>,
    spawner: Box<dyn ChildSpawner>,
    sysinfo: StdMutex<System>,
}

impl ProcessSupervisor {
    pub fn new(spawner: Box<dyn ChildSpawner>) -> Self {
        Self {
            state: StateMachine::new(ProcessState::Stopped, ProcessState::edges()),
            child: AsyncMutex::new(None),
            pid: StdMutex::new(None),
            spawner,
            sysinfo: StdMutex::new(System::new()),
        }
    }

    pub fn status(&self) -> ProcessState {
        self.state.current()
    }

    pub fn is_running(&self) -> bool {
        self.status() == ProcessState::Running
    }

    pub fn pid(&self) -> Option<u32> {
        *self.pid.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Register a listener on the underlying state machine (for the
    /// `StateChange` event stream).
    pub fn add_listener(&self, listener: fleet_core::state_machine::Listener<ProcessState>) {
        self.state.add_listener(listener);
    }

    /// Start the child. Allowed only from `Stopped` or `Error` — any other
    /// state fails with `InvalidState` (the source's `AlreadyActive`).
    pub async fn start(&self, config: ProcessConfig) -> Result<(), FleetError> {
        let current = self.state.current();
        if !matches!(current, ProcessState::Stopped | ProcessState::Error) {
            return Err(ProcessError::AlreadyActive(current).into());
        }
        self.state.transition_to(ProcessState::Starting)?;

        match self.spawner.spawn(&config) {
            Ok(child) => {
                *self.pid.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = child.id();
                *self.child.lock().await = Some(child);
                self.state.transition_to(ProcessState::Running)?;
                Ok(())
            }
            Err(err) => {
                self.state.transition_to(ProcessState::Error)?;
                Err(ProcessError::SpawnFailed(err.to_string()).into())
            }
        }
    }

    /// Graceful terminate, waiting up to `timeout` before escalating to
    /// `kill`.
    pub async fn stop(&self, timeout: Duration) -> Result<(), FleetError> {
        let current = self.state.current();
        if current == ProcessState::Stopped {
            return Ok(());
        }
        if current != ProcessState::Running {
            return Err(FleetError::InvalidState {
                expected: "Running".into(),
                actual: format!("{current:?}"),
            });
        }
        self.state.transition_to(ProcessState::Stopping)?;

        if let Some(pid) = self.pid() {
            send_graceful_signal(pid)?;
        }

        match tokio::time::timeout(timeout, self.wait_for_exit()).await {
            Ok(Ok(())) => {
                self.state.transition_to(ProcessState::Stopped)?;
                Ok(())
            }
            Ok(Err(err)) => {
                self.state.transition_to(ProcessState::Stopped)?;
                Err(err)
            }
            Err(_) => self.kill().await,
        }
    }

    /// Forcibly terminate. Idempotent when already `Stopped`.
    pub async fn kill(&self) -> Result<(), FleetError> {
        let current = self.state.current();
        if current == ProcessState::Stopped {
            return Ok(());
        }
        if current == ProcessState::Running {
            self.state.transition_to(ProcessState::Stopping)?;
        }

        let mut guard = self.child.lock().await;
        if let Some(child) = guard.as_mut() {
            if let Err(err) = child.start_kill() {
                return Err(ProcessError::KillFailed(err.to_string()).into());
            }
            let _ = child.wait().await;
        }
        *guard = None;
        drop(guard);

        self.state.transition_to(ProcessState::Stopped)?;
        Ok(())
    }

    /// Await the child's exit, surfacing a non-zero status as
    /// `UnexpectedExit`.
    pub async fn wait(&self) -> Result<(), FleetError> {
        self.wait_for_exit().await
    }

    async fn wait_for_exit(&self) -> Result<(), FleetError> {
        let pid = self.pid();
        let mut guard = self.child.lock().await;
        let Some(child) = guard.as_mut() else {
            return Ok(());
        };
        let status = child
            .wait()
            .await
            .map_err(|err| ProcessError::StopFailed(err.to_string()))?;
        if status.success() {
            Ok(())
        } else {
            Err(ProcessError::UnexpectedExit {
                pid,
                code: status.code(),
            }
            .into())
        }
    }

    /// Returns error unless the child is marked `Running` and answers a
    /// no-op signal-0 probe.
    pub async fn health_check(&self) -> Result<(), FleetError> {
        if self.state.current() != ProcessState::Running {
            return Err(ProcessError::HealthCheckFailed("not running".into()).into());
        }
        let pid = self
            .pid()
            .ok_or_else(|| ProcessError::HealthCheckFailed("no pid".into()))?;
        probe_signal_zero(pid)
    }

    /// Sample memory and CPU usage for the running child, or `None` when
    /// there's no pid (not started, or already exited).
    pub fn resource_usage(&self) -> Option<ResourceUsage> {
        let pid = self.pid()?;
        let sys_pid = Pid::from_u32(pid);
        let mut sys = self.sysinfo.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        sys.refresh_process(sys_pid);
        sys.process(sys_pid).map(|process| ResourceUsage {
            memory_bytes: process.memory(),
            cpu_percent: process.cpu_usage(),
        })
    }

    /// Poll for an exit the monitor didn't initiate (a crash). Runs until
    /// `cancel` fires or the child reaches `Stopped`.
    pub async fn run_monitor(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(MONITOR_POLL_INTERVAL);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if self.poll_for_crash().await {
                        break;
                    }
                }
            }
        }
    }

    /// Returns `true` once the child has settled into `Stopped`.
    async fn poll_for_crash(&self) -> bool {
        let current = self.state.current();
        if current == ProcessState::Stopped {
            return true;
        }
        let exited = {
            let mut guard = self.child.lock().await;
            match guard.as_mut() {
                Some(child) => child.try_wait().ok().flatten(),
                None => None,
            }
        };
        let Some(status) = exited else {
            return false;
        };
        *self.child.lock().await = None;
        match current {
            ProcessState::Stopping => {
                let _ = self.state.transition_to(ProcessState::Stopped);
                true
            }
            ProcessState::Running => {
                tracing::warn!(code = ?status.code(), "child exited unexpectedly");
                let _ = self.state.transition_to(ProcessState::Error);
                false
            }
            _ => false,
        }
    }
}

#[cfg(unix)]
fn send_graceful_signal(pid: u32) -> Result<(), FleetError> {
    let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if ret != 0 {
        return Err(ProcessError::StopFailed(std::io::Error::last_os_error().to_string()).into());
    }
    Ok(())
}

#[cfg(not(unix))]
fn send_graceful_signal(_pid: u32) -> Result<(), FleetError> {
    Ok(())
}

#[cfg(unix)]
fn probe_signal_zero(pid: u32) -> Result<(), FleetError> {
    let ret = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if ret != 0 {
        return Err(ProcessError::HealthCheckFailed("signal-0 probe failed".into()).into());
    }
    Ok(())
}

#[cfg(not(unix))]
fn probe_signal_zero(_pid: u32) -> Result<(), FleetError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spawner::TokioSpawner;

    fn sleepy_config(secs: u64) -> ProcessConfig {
        let mut cfg = ProcessConfig::new("sleep");
        cfg.args = vec![secs.to_string()];
        cfg
    }

    #[tokio::test]
    async fn start_transitions_to_running() {
        let sup = ProcessSupervisor::new(Box::new(TokioSpawner));
        sup.start(sleepy_config(5)).await.unwrap();
        assert_eq!(sup.status(), ProcessState::Running);
        assert!(sup.pid().is_some());
        sup.kill().await.unwrap();
    }

    #[tokio::test]
    async fn start_twice_fails_already_active() {
        let sup = ProcessSupervisor::new(Box::new(TokioSpawner));
        sup.start(sleepy_config(5)).await.unwrap();
        let err = sup.start(sleepy_config(5)).await.unwrap_err();
        assert!(matches!(err, FleetError::InvalidState { .. }));
        sup.kill().await.unwrap();
    }

    #[tokio::test]
    async fn start_failure_lands_in_error_state() {
        let sup = ProcessSupervisor::new(Box::new(TokioSpawner));
        let err = sup
            .start(ProcessConfig::new("definitely-not-a-real-binary-xyz"))
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::StartFailed(_)));
        assert_eq!(sup.status(), ProcessState::Error);
    }

    #[tokio::test]
    async fn restart_allowed_from_error() {
        let sup = ProcessSupervisor::new(Box::new(TokioSpawner));
        let _ = sup.start(ProcessConfig::new("definitely-not-a-real-binary-xyz")).await;
        assert_eq!(sup.status(), ProcessState::Error);
        sup.start(sleepy_config(5)).await.unwrap();
        assert_eq!(sup.status(), ProcessState::Running);
        sup.kill().await.unwrap();
    }

    #[tokio::test]
    async fn resource_usage_is_none_before_start() {
        let sup = ProcessSupervisor::new(Box::new(TokioSpawner));
        assert!(sup.resource_usage().is_none());
    }

    #[tokio::test]
    async fn resource_usage_reports_memory_while_running() {
        let sup = ProcessSupervisor::new(Box::new(TokioSpawner));
        sup.start(sleepy_config(5)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let usage = sup.resource_usage().expect("running child has a resource sample");
        assert!(usage.memory_bytes > 0);
        sup.kill().await.unwrap();
    }

    #[tokio::test]
    async fn kill_is_idempotent_on_stopped() {
        let sup = ProcessSupervisor::new(Box::new(TokioSpawner));
        sup.kill().await.unwrap();
        sup.kill().await.unwrap();
        assert_eq!(sup.status(), ProcessState::Stopped);
    }

    #[tokio::test]
    async fn kill_terminates_running_child() {
        let sup = ProcessSupervisor::new(Box::new(TokioSpawner));
        sup.start(sleepy_config(30)).await.unwrap();
        sup.kill().await.unwrap();
        assert_eq!(sup.status(), ProcessState::Stopped);
    }

    #[tokio::test]
    async fn health_check_fails_when_not_running() {
        let sup = ProcessSupervisor::new(Box::new(TokioSpawner));
        let err = sup.health_check().await.unwrap_err();
        assert!(matches!(err, FleetError::HealthCheckFailed(_)));
    }

    #[tokio::test]
    async fn health_check_passes_while_running() {
        let sup = ProcessSupervisor::new(Box::new(TokioSpawner));
        sup.start(sleepy_config(5)).await.unwrap();
        sup.health_check().await.unwrap();
        sup.kill().await.unwrap();
    }

    #[tokio::test]
    async fn wait_reports_clean_exit() {
        let sup = ProcessSupervisor::new(Box::new(TokioSpawner));
        sup.start(ProcessConfig::new("true")).await.unwrap();
        sup.wait().await.unwrap();
    }

    #[tokio::test]
    async fn wait_reports_unexpected_exit_code() {
        let sup = ProcessSupervisor::new(Box::new(TokioSpawner));
        sup.start(ProcessConfig::new("false")).await.unwrap();
        let err = sup.wait().await.unwrap_err();
        assert!(matches!(err, FleetError::UnexpectedExit { .. }));
    }

    #[tokio::test]
    async fn monitor_detects_crash_and_marks_error() {
        let sup = std::sync::Arc::new(ProcessSupervisor::new(Box::new(TokioSpawner)));
        sup.start(ProcessConfig::new("true")).await.unwrap();
        let cancel = CancellationToken::new();
        let monitor_cancel = cancel.clone();
        let sup2 = sup.clone();
        let handle = tokio::spawn(async move { sup2.run_monitor(monitor_cancel).await });
        tokio::time::sleep(Duration::from_millis(600)).await;
        cancel.cancel();
        let _ = handle.await;
        assert_eq!(sup.status(), ProcessState::Error);
    }
}
