//! Daemon process supervision.
//!
//! [`Supervisor::start`] ensures a healthy ComfyUI daemon is reachable:
//! it reuses one that already answers the health probe, otherwise it
//! launches the configured command and probes at a fixed interval until
//! the daemon is ready, exits, or the attempt budget runs out.
//!
//! A launched process is owned by the returned [`DaemonHandle`]. The child
//! is spawned with `kill_on_drop(true)`, so dropping the handle on any path
//! (including cancellation of the enclosing future) terminates it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use comfyrun_core::error::JobError;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::api::ComfyUIApi;
use crate::poll::{pause, PollConfig};

/// Program, arguments and working directory used to launch the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl DaemonCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// The standard ComfyUI launch line:
    /// `python main.py --listen <host> --port <port> [--output-directory <dir>] --disable-auto-launch`
    /// run from the install directory.
    pub fn comfyui(
        install_dir: &Path,
        python: &str,
        host: &str,
        port: u16,
        output_dir: Option<&Path>,
    ) -> Self {
        let mut command = Self::new(python)
            .current_dir(install_dir)
            .arg("main.py")
            .arg("--listen")
            .arg(host)
            .arg("--port")
            .arg(port.to_string());

        if let Some(dir) = output_dir {
            command = command
                .arg("--output-directory")
                .arg(dir.to_string_lossy().into_owned());
        }

        command.arg("--disable-auto-launch")
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            // The daemon's own logging must not interleave with the job
            // result on stdout.
            .stdout(Stdio::from(std::io::stderr()))
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

impl fmt::Display for DaemonCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Lifecycle of the supervised daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    NotStarted,
    Starting,
    Ready,
    Failed,
}

/// How a ready daemon was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonStatus {
    /// A daemon was already answering the health probe.
    AlreadyRunning,
    /// The supervisor launched the daemon and it became healthy.
    Launched { attempts: u32, elapsed: Duration },
}

impl fmt::Display for DaemonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRunning => f.write_str("already running"),
            Self::Launched { attempts, elapsed } => write!(
                f,
                "launched, healthy after {attempts} probes ({} ms)",
                elapsed.as_millis()
            ),
        }
    }
}

/// Errors from daemon startup.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Failed to spawn daemon: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Daemon exited before becoming healthy (exit code {code:?})")]
    Exited { code: Option<i32> },

    #[error("Daemon not healthy after {attempts} probes")]
    StartTimeout { attempts: u32, pid: Option<u32> },

    #[error("Daemon startup cancelled")]
    Cancelled { pid: Option<u32> },
}

impl From<SupervisorError> for JobError {
    fn from(err: SupervisorError) -> Self {
        match err {
            SupervisorError::Spawn(source) => JobError::DaemonSpawn { source },
            SupervisorError::Exited { code } => JobError::DaemonExited { code },
            SupervisorError::StartTimeout { attempts, .. } => {
                JobError::DaemonStartTimeout { attempts }
            }
            SupervisorError::Cancelled { .. } => JobError::Cancelled,
        }
    }
}

/// Scoped ownership of a ready daemon.
///
/// Holds the child process when this invocation launched it. Dropping the
/// handle kills the child; [`DaemonHandle::shutdown`] also reaps it.
#[derive(Debug)]
pub struct DaemonHandle {
    child: Option<Child>,
    status: DaemonStatus,
}

impl DaemonHandle {
    pub fn status(&self) -> DaemonStatus {
        self.status
    }

    /// Whether this handle owns a launched process.
    pub fn owns_process(&self) -> bool {
        self.child.is_some()
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Kill and reap an owned daemon. No-op for an external daemon.
    pub async fn shutdown(mut self) {
        if let Some(mut child) = self.child.take() {
            let pid = child.id();
            match child.kill().await {
                Ok(()) => tracing::info!(pid, "Daemon stopped"),
                Err(e) => tracing::warn!(pid, error = %e, "Failed to stop daemon"),
            }
        }
    }
}

/// Starts (or adopts) the daemon and tracks its lifecycle state.
pub struct Supervisor {
    api: ComfyUIApi,
    command: DaemonCommand,
    probe: PollConfig,
    state: SupervisorState,
}

impl Supervisor {
    pub fn new(api: ComfyUIApi, command: DaemonCommand, probe: PollConfig) -> Self {
        Self {
            api,
            command,
            probe,
            state: SupervisorState::NotStarted,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Ensure a healthy daemon, launching one if necessary.
    pub async fn start(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<DaemonHandle, SupervisorError> {
        if self.api.is_healthy().await {
            self.transition(SupervisorState::Ready);
            tracing::info!(api_url = self.api.api_url(), "Daemon already running");
            return Ok(DaemonHandle {
                child: None,
                status: DaemonStatus::AlreadyRunning,
            });
        }

        self.transition(SupervisorState::Starting);
        tracing::info!(command = %self.command, "Launching daemon");

        let started = Instant::now();
        let mut child = match self.command.to_command().spawn() {
            Ok(child) => child,
            Err(e) => {
                self.transition(SupervisorState::Failed);
                return Err(SupervisorError::Spawn(e));
            }
        };
        let pid = child.id();

        for attempt in 1..=self.probe.max_attempts {
            if !pause(self.probe.interval, cancel).await {
                self.transition(SupervisorState::Failed);
                terminate(&mut child).await;
                return Err(SupervisorError::Cancelled { pid });
            }

            match child.try_wait() {
                Ok(Some(exit)) => {
                    self.transition(SupervisorState::Failed);
                    tracing::error!(pid, code = exit.code(), "Daemon exited during startup");
                    return Err(SupervisorError::Exited { code: exit.code() });
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(pid, error = %e, "Failed to poll daemon process"),
            }

            if self.api.is_healthy().await {
                let status = DaemonStatus::Launched {
                    attempts: attempt,
                    elapsed: started.elapsed(),
                };
                self.transition(SupervisorState::Ready);
                tracing::info!(
                    pid,
                    attempt,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Daemon ready",
                );
                return Ok(DaemonHandle {
                    child: Some(child),
                    status,
                });
            }

            tracing::debug!(pid, attempt, "Daemon not ready yet");
        }

        self.transition(SupervisorState::Failed);
        terminate(&mut child).await;
        Err(SupervisorError::StartTimeout {
            attempts: self.probe.max_attempts,
            pid,
        })
    }

    fn transition(&mut self, next: SupervisorState) {
        tracing::debug!(from = ?self.state, to = ?next, "Supervisor state change");
        self.state = next;
    }
}

async fn terminate(child: &mut Child) {
    if let Err(e) = child.kill().await {
        tracing::warn!(pid = child.id(), error = %e, "Failed to kill daemon");
    }
}
