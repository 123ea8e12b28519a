//! Per-invocation job handler.
//!
//! Composes the pipeline `validate -> compile -> startup -> submit -> poll
//! -> fetch` for one [`JobInput`]. Compilation runs before the daemon is
//! started so malformed input fails without paying the startup cost. The
//! daemon handle is scoped to the invocation and released on every path.

use std::path::Path;
use std::time::Duration;

use comfyrun_comfyui::api::ComfyUIApi;
use comfyrun_comfyui::orchestrator::JobRunner;
use comfyrun_comfyui::supervisor::Supervisor;
use comfyrun_core::error::{JobError, JobFailure, JobTrace, Stage};
use comfyrun_core::job::{JobInput, JobResponse, JobSuccess, WorkflowSource};
use comfyrun_core::request::ExecutionRequest;
use comfyrun_core::volume::validate_volume;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::config::WorkerConfig;

/// Run one job under the configured invocation deadline.
///
/// The deadline timer stops as soon as this future completes or is
/// dropped, e.g. when the HTTP client disconnects mid-job.
pub async fn run_with_deadline(config: &WorkerConfig, input: JobInput) -> JobResponse {
    let cancel = CancellationToken::new();
    let _timer = arm_deadline(config.job_timeout, cancel.clone());
    handle_job(config, input, &cancel).await
}

/// Cancel `cancel` after `timeout` unless the returned guard is dropped
/// first.
fn arm_deadline(timeout: Duration, cancel: CancellationToken) -> DropGuard {
    let disarmed = CancellationToken::new();
    let guard = disarmed.clone().drop_guard();

    tokio::spawn(async move {
        tokio::select! {
            _ = disarmed.cancelled() => {}
            _ = tokio::time::sleep(timeout) => {
                tracing::warn!(timeout_secs = timeout.as_secs(), "Job deadline reached, cancelling");
                cancel.cancel();
            }
        }
    });

    guard
}

/// Run one job to completion and build its response.
pub async fn handle_job(
    config: &WorkerConfig,
    input: JobInput,
    cancel: &CancellationToken,
) -> JobResponse {
    let overrides = input.overrides.clone();
    let result = execute(config, input, cancel).await;
    JobResponse::from_result(result, &overrides)
}

async fn execute(
    config: &WorkerConfig,
    input: JobInput,
    cancel: &CancellationToken,
) -> Result<JobSuccess, JobFailure> {
    let mut trace = JobTrace::new();

    let summary = validate_volume(&config.volume_root, &config.models_dir)
        .map_err(|e| trace.fail(Stage::Validate, e.into()))?;
    trace.record(Stage::Validate, format!("model volume verified ({summary})"));

    let request = resolve_request(config, input)
        .map_err(|e| trace.fail(Stage::Compile, e))?;
    trace.record(Stage::Compile, format!("{} node(s) ready", request.len()));

    let api = ComfyUIApi::new(config.api_url());
    let mut supervisor = Supervisor::new(api.clone(), config.daemon_command(), config.startup_probe);
    let daemon = supervisor
        .start(cancel)
        .await
        .map_err(|e| trace.fail(Stage::Startup, e.into()))?;
    trace.record(Stage::Startup, format!("daemon {}", daemon.status()));

    let runner = JobRunner::new(api, config.history_poll, config.fetch_policy);
    let result = runner.run(&request, &mut trace, cancel).await;

    daemon.shutdown().await;
    result
}

/// Turn the job's workflow (or the default workflow) into an execution
/// request with overrides applied.
fn resolve_request(config: &WorkerConfig, input: JobInput) -> Result<ExecutionRequest, JobError> {
    let source = match input.workflow {
        Some(source) => source,
        None => load_default_workflow(&config.default_workflow_path)?,
    };
    source.into_request(&input.overrides)
}

fn load_default_workflow(path: &Path) -> Result<WorkflowSource, JobError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        JobError::InvalidInput(format!(
            "No workflow in job and default workflow {} unreadable: {e}",
            path.display()
        ))
    })?;
    tracing::debug!(path = %path.display(), "Loaded default workflow");
    WorkflowSource::from_json(&text)
}
