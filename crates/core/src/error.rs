//! Job error taxonomy.
//!
//! Every failed job yields a [`JobFailure`]: the [`Stage`] it failed in,
//! the typed [`JobError`], and a [`JobTrace`] of what happened before the
//! failure. Callers branch on [`JobError::category`] rather than parsing
//! messages.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Boxed error used where the underlying cause comes from another crate.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Pipeline stage in which a job failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validate,
    Compile,
    Startup,
    Submit,
    Poll,
    Fetch,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Compile => "compile",
            Self::Startup => "startup",
            Self::Submit => "submit",
            Self::Poll => "poll",
            Self::Fetch => "fetch",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse failure class callers can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The job description or workflow is malformed.
    BadInput,
    /// The model volume is not mounted or incomplete.
    ResourceUnavailable,
    /// The daemon could not be started or reached.
    DaemonUnavailable,
    /// The daemon accepted the job but never produced images.
    GenerationIncomplete,
    /// Images were produced but could not be downloaded.
    ArtifactUnavailable,
    /// The invocation deadline fired.
    Cancelled,
}

/// All terminal job errors. None of these are retried.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Required resource missing: {}", .path.display())]
    ResourceMissing { path: PathBuf },

    #[error("Invalid job input: {0}")]
    InvalidInput(String),

    #[error("Failed to launch generation daemon: {source}")]
    DaemonSpawn {
        #[source]
        source: std::io::Error,
    },

    #[error("Generation daemon exited during startup (exit code {code:?})")]
    DaemonExited { code: Option<i32> },

    #[error("Generation daemon not healthy after {attempts} attempts")]
    DaemonStartTimeout { attempts: u32 },

    #[error("Generation daemon unreachable: {source}")]
    DaemonUnavailable {
        #[source]
        source: BoxError,
    },

    #[error("Daemon rejected submission (HTTP {status}): {body}")]
    SubmissionRejected { status: u16, body: String },

    #[error("Generation {prompt_id} failed: {message}")]
    GenerationFailed { prompt_id: String, message: String },

    #[error("Generation {prompt_id} produced no images after {attempts} polls")]
    GenerationTimeout { prompt_id: String, attempts: u32 },

    #[error("Failed to fetch artifact {filename}: {reason}")]
    ArtifactFetchFailed { filename: String, reason: String },

    #[error("Job cancelled")]
    Cancelled,
}

impl JobError {
    /// Stable snake-case name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ResourceMissing { .. } => "resource_missing",
            Self::InvalidInput(_) => "invalid_input",
            Self::DaemonSpawn { .. } => "daemon_spawn",
            Self::DaemonExited { .. } => "daemon_exited",
            Self::DaemonStartTimeout { .. } => "daemon_start_timeout",
            Self::DaemonUnavailable { .. } => "daemon_unavailable",
            Self::SubmissionRejected { .. } => "submission_rejected",
            Self::GenerationFailed { .. } => "generation_failed",
            Self::GenerationTimeout { .. } => "generation_timeout",
            Self::ArtifactFetchFailed { .. } => "artifact_fetch_failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidInput(_) | Self::SubmissionRejected { .. } => ErrorCategory::BadInput,
            Self::ResourceMissing { .. } => ErrorCategory::ResourceUnavailable,
            Self::DaemonSpawn { .. }
            | Self::DaemonExited { .. }
            | Self::DaemonStartTimeout { .. }
            | Self::DaemonUnavailable { .. } => ErrorCategory::DaemonUnavailable,
            Self::GenerationFailed { .. } | Self::GenerationTimeout { .. } => {
                ErrorCategory::GenerationIncomplete
            }
            Self::ArtifactFetchFailed { .. } => ErrorCategory::ArtifactUnavailable,
            Self::Cancelled => ErrorCategory::Cancelled,
        }
    }
}

/// Breadcrumbs recorded as a job moves through its stages.
#[derive(Debug, Clone, Default)]
pub struct JobTrace {
    entries: Vec<(Stage, String)>,
}

impl JobTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a progress note for `stage`.
    pub fn record(&mut self, stage: Stage, note: impl Into<String>) {
        self.entries.push((stage, note.into()));
    }

    pub fn entries(&self) -> &[(Stage, String)] {
        &self.entries
    }

    /// Close the trace with a failure at `stage`.
    pub fn fail(&mut self, stage: Stage, error: JobError) -> JobFailure {
        tracing::error!(stage = %stage, kind = error.kind(), error = %error, "Job failed");
        JobFailure {
            stage,
            error,
            trace: std::mem::take(self),
        }
    }
}

/// A terminal job failure with its stage and diagnostic trace.
#[derive(Debug, thiserror::Error)]
#[error("{stage} failed: {error}")]
pub struct JobFailure {
    pub stage: Stage,
    #[source]
    pub error: JobError,
    pub trace: JobTrace,
}

impl JobFailure {
    /// Render the breadcrumbs followed by the error and its source chain.
    pub fn traceback(&self) -> String {
        let mut lines: Vec<String> = self
            .trace
            .entries()
            .iter()
            .map(|(stage, note)| format!("[{stage}] {note}"))
            .collect();

        lines.push(format!("[{}] error: {}", self.stage, self.error));
        let mut source = std::error::Error::source(&self.error);
        while let Some(cause) = source {
            lines.push(format!("  caused by: {cause}"));
            source = cause.source();
        }
        lines.join("\n")
    }
}
