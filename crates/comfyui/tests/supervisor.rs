//! Integration tests for daemon startup against a stub daemon.

mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use comfyrun_comfyui::api::ComfyUIApi;
use comfyrun_comfyui::poll::PollConfig;
use comfyrun_comfyui::supervisor::{
    DaemonCommand, DaemonStatus, Supervisor, SupervisorError, SupervisorState,
};
use common::{unused_port, StubBehaviour, StubDaemon};
use tokio_util::sync::CancellationToken;

fn fast_probe(max_attempts: u32) -> PollConfig {
    PollConfig::new(Duration::from_millis(20), max_attempts)
}

fn unreachable_api() -> ComfyUIApi {
    ComfyUIApi::new(format!("http://127.0.0.1:{}", unused_port()))
}

// ---------------------------------------------------------------------------
// Test: a daemon that already answers is adopted without launching anything
// ---------------------------------------------------------------------------

#[tokio::test]
async fn running_daemon_is_adopted_without_spawning() {
    let stub = StubDaemon::start(StubBehaviour::default()).await;
    let mut supervisor = Supervisor::new(
        ComfyUIApi::new(&stub.url),
        DaemonCommand::new("/nonexistent/comfyui-python"),
        fast_probe(3),
    );

    let handle = supervisor.start(&CancellationToken::new()).await.unwrap();

    assert_eq!(handle.status(), DaemonStatus::AlreadyRunning);
    assert!(!handle.owns_process());
    assert_eq!(supervisor.state(), SupervisorState::Ready);
    assert_eq!(stub.probes(), 1);
    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: a launched daemon is probed until healthy and owned by the handle
// ---------------------------------------------------------------------------

#[cfg(unix)]
#[tokio::test]
async fn launched_daemon_is_ready_after_probes() {
    let stub = StubDaemon::start(StubBehaviour {
        unhealthy_probes: 3,
        ..Default::default()
    })
    .await;
    let mut supervisor = Supervisor::new(
        ComfyUIApi::new(&stub.url),
        DaemonCommand::new("sleep").arg("30"),
        fast_probe(50),
    );

    let handle = supervisor.start(&CancellationToken::new()).await.unwrap();

    // The entry probe plus two launch probes fail; the third launch probe succeeds.
    assert_matches!(handle.status(), DaemonStatus::Launched { attempts: 3, .. });
    assert!(handle.owns_process());
    assert!(handle.pid().is_some());
    assert_eq!(supervisor.state(), SupervisorState::Ready);
    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: an exhausted probe budget kills the child
// ---------------------------------------------------------------------------

#[cfg(unix)]
#[tokio::test]
async fn start_timeout_terminates_child() {
    let mut supervisor = Supervisor::new(
        unreachable_api(),
        DaemonCommand::new("sleep").arg("30"),
        fast_probe(5),
    );

    let err = supervisor.start(&CancellationToken::new()).await.unwrap_err();

    let pid = assert_matches!(err, SupervisorError::StartTimeout { attempts: 5, pid } => pid);
    assert_eq!(supervisor.state(), SupervisorState::Failed);
    assert_reaped(pid);
}

/// The launched child must be gone once `start` returns an error.
fn assert_reaped(pid: Option<u32>) {
    let pid = pid.expect("child pid recorded");
    #[cfg(target_os = "linux")]
    assert!(
        !std::path::Path::new(&format!("/proc/{pid}")).exists(),
        "daemon process {pid} should have been killed and reaped"
    );
    #[cfg(not(target_os = "linux"))]
    let _ = pid;
}

// ---------------------------------------------------------------------------
// Test: a child that exits during startup fails fast
// ---------------------------------------------------------------------------

#[cfg(unix)]
#[tokio::test]
async fn daemon_exiting_early_fails_fast() {
    let mut supervisor = Supervisor::new(
        unreachable_api(),
        DaemonCommand::new("true"),
        fast_probe(100),
    );

    let err = supervisor.start(&CancellationToken::new()).await.unwrap_err();

    assert_matches!(err, SupervisorError::Exited { code: Some(0) });
    assert_eq!(supervisor.state(), SupervisorState::Failed);
}

// ---------------------------------------------------------------------------
// Test: an unlaunchable command is a spawn error
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_program_is_spawn_error() {
    let mut supervisor = Supervisor::new(
        unreachable_api(),
        DaemonCommand::new("/nonexistent/comfyui-python").arg("main.py"),
        fast_probe(3),
    );

    let err = supervisor.start(&CancellationToken::new()).await.unwrap_err();

    assert_matches!(err, SupervisorError::Spawn(_));
    assert_eq!(supervisor.state(), SupervisorState::Failed);
}

// ---------------------------------------------------------------------------
// Test: cancellation during startup stops probing and kills the child
// ---------------------------------------------------------------------------

#[cfg(unix)]
#[tokio::test]
async fn cancellation_during_startup_terminates_child() {
    let mut supervisor = Supervisor::new(
        unreachable_api(),
        DaemonCommand::new("sleep").arg("30"),
        PollConfig::new(Duration::from_secs(10), 60),
    );
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = supervisor.start(&cancel).await.unwrap_err();

    let pid = assert_matches!(err, SupervisorError::Cancelled { pid } => pid);
    assert_eq!(supervisor.state(), SupervisorState::Failed);
    assert_reaped(pid);
}
