//! Job lifecycle against a ready daemon: submit, poll, fetch, encode.
//!
//! [`JobRunner::run`] drives one execution request through
//! `Submitting -> Polling -> Fetching -> Done`. Every failure is closed
//! into a [`JobFailure`] carrying the stage it happened in and the trace
//! recorded so far.

use std::str::FromStr;
use std::time::Duration;

use base64::Engine as _;
use comfyrun_core::error::{JobError, JobFailure, JobTrace, Stage};
use comfyrun_core::job::JobSuccess;
use comfyrun_core::request::ExecutionRequest;
use tokio_util::sync::CancellationToken;

use crate::api::{ComfyUIApi, ComfyUIApiError};
use crate::history::ImageArtifact;
use crate::poll::{pause, PollConfig};

/// Upper bound on the best-effort cleanup after cancellation.
pub const DEFAULT_RELEASE_TIMEOUT: Duration = Duration::from_secs(5);

/// What to do when an individual image download fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FetchPolicy {
    /// Fail the job on the first download error.
    #[default]
    AbortOnFirstFailure,
    /// Skip failed downloads; fail only if nothing could be fetched.
    SkipFailed,
}

impl FromStr for FetchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" | "abort_on_first_failure" => Ok(Self::AbortOnFirstFailure),
            "skip" | "skip_failed" => Ok(Self::SkipFailed),
            other => Err(format!("unknown fetch policy '{other}'")),
        }
    }
}

/// A submitted job, identified by the daemon's prompt id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub prompt_id: String,
}

/// Runs compiled requests against one daemon.
pub struct JobRunner {
    api: ComfyUIApi,
    poll: PollConfig,
    fetch_policy: FetchPolicy,
    release_timeout: Duration,
}

impl JobRunner {
    pub fn new(api: ComfyUIApi, poll: PollConfig, fetch_policy: FetchPolicy) -> Self {
        Self {
            api,
            poll,
            fetch_policy,
            release_timeout: DEFAULT_RELEASE_TIMEOUT,
        }
    }

    /// Bound the dequeue/interrupt calls made after cancellation.
    pub fn with_release_timeout(mut self, timeout: Duration) -> Self {
        self.release_timeout = timeout;
        self
    }

    /// Submit, wait for outputs, download and encode them.
    pub async fn run(
        &self,
        request: &ExecutionRequest,
        trace: &mut JobTrace,
        cancel: &CancellationToken,
    ) -> Result<JobSuccess, JobFailure> {
        let handle = self
            .submit(request, cancel)
            .await
            .map_err(|e| trace.fail(Stage::Submit, e))?;
        trace.record(Stage::Submit, format!("queued as prompt {}", handle.prompt_id));

        let artifacts = self
            .wait_for_images(&handle, cancel)
            .await
            .map_err(|e| trace.fail(Stage::Poll, e))?;
        trace.record(Stage::Poll, format!("{} image(s) reported", artifacts.len()));

        let blobs = self
            .fetch_images(&artifacts, cancel)
            .await
            .map_err(|e| trace.fail(Stage::Fetch, e))?;
        trace.record(
            Stage::Fetch,
            format!("fetched {}/{} image(s)", blobs.len(), artifacts.len()),
        );

        tracing::info!(
            prompt_id = %handle.prompt_id,
            images = blobs.len(),
            "Job complete",
        );

        Ok(JobSuccess {
            prompt_id: handle.prompt_id,
            images: encode_images(&blobs),
        })
    }

    /// Queue `request` on the daemon under a fresh client id.
    pub async fn submit(
        &self,
        request: &ExecutionRequest,
        cancel: &CancellationToken,
    ) -> Result<JobHandle, JobError> {
        let client_id = uuid::Uuid::new_v4().to_string();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(JobError::Cancelled),
            result = self.api.submit_workflow(request, &client_id) => result,
        };

        match response {
            Ok(submitted) => {
                tracing::info!(
                    prompt_id = %submitted.prompt_id,
                    queue_position = submitted.number,
                    nodes = request.len(),
                    "Workflow submitted",
                );
                Ok(JobHandle {
                    prompt_id: submitted.prompt_id,
                })
            }
            Err(ComfyUIApiError::ApiError { status, body })
            | Err(ComfyUIApiError::UnexpectedResponse { status, body }) => {
                Err(JobError::SubmissionRejected { status, body })
            }
            Err(ComfyUIApiError::Request(e)) => Err(JobError::DaemonUnavailable {
                source: Box::new(e),
            }),
        }
    }

    /// Poll history until the prompt reports images, fails, or the poll
    /// budget is exhausted. Query errors are retried within the budget. A
    /// prompt that completes without images fails immediately.
    pub async fn wait_for_images(
        &self,
        handle: &JobHandle,
        cancel: &CancellationToken,
    ) -> Result<Vec<ImageArtifact>, JobError> {
        let prompt_id = handle.prompt_id.as_str();

        for attempt in 1..=self.poll.max_attempts {
            let query = tokio::select! {
                _ = cancel.cancelled() => None,
                result = self.api.history_entry(prompt_id) => Some(result),
            };

            match query {
                None => return Err(self.abandon(prompt_id).await),
                Some(Ok(Some(entry))) => {
                    if entry.is_error() {
                        let message = entry
                            .error_message()
                            .unwrap_or_else(|| "daemon reported an execution error".into());
                        return Err(JobError::GenerationFailed {
                            prompt_id: prompt_id.to_string(),
                            message,
                        });
                    }

                    let images = entry.images();
                    if !images.is_empty() {
                        tracing::info!(prompt_id, attempt, images = images.len(), "Outputs ready");
                        return Ok(images);
                    }
                    if entry.is_completed() {
                        return Err(JobError::GenerationFailed {
                            prompt_id: prompt_id.to_string(),
                            message: "execution completed without image outputs".into(),
                        });
                    }
                    tracing::debug!(prompt_id, attempt, "History entry has no images yet");
                }
                Some(Ok(None)) => tracing::debug!(prompt_id, attempt, "Prompt still pending"),
                Some(Err(e)) => {
                    tracing::warn!(prompt_id, attempt, error = %e, "History query failed");
                }
            }

            if attempt < self.poll.max_attempts && !pause(self.poll.interval, cancel).await {
                return Err(self.abandon(prompt_id).await);
            }
        }

        Err(JobError::GenerationTimeout {
            prompt_id: prompt_id.to_string(),
            attempts: self.poll.max_attempts,
        })
    }

    /// Download every artifact in order, honouring the fetch policy.
    pub async fn fetch_images(
        &self,
        images: &[ImageArtifact],
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<u8>>, JobError> {
        let mut blobs = Vec::with_capacity(images.len());
        let mut last_error = None;

        for image in images {
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(JobError::Cancelled),
                result = self.api.fetch_image(image) => result,
            };

            match result {
                Ok(bytes) => {
                    tracing::debug!(filename = %image.filename, bytes = bytes.len(), "Fetched image");
                    blobs.push(bytes);
                }
                Err(e) => {
                    let error = JobError::ArtifactFetchFailed {
                        filename: image.filename.clone(),
                        reason: e.to_string(),
                    };
                    match self.fetch_policy {
                        FetchPolicy::AbortOnFirstFailure => return Err(error),
                        FetchPolicy::SkipFailed => {
                            tracing::warn!(filename = %image.filename, error = %e, "Skipping image");
                            last_error = Some(error);
                        }
                    }
                }
            }
        }

        match last_error {
            Some(error) if blobs.is_empty() => Err(error),
            _ => Ok(blobs),
        }
    }

    /// Best-effort release of an abandoned prompt, bounded by the release
    /// timeout.
    async fn abandon(&self, prompt_id: &str) -> JobError {
        tracing::warn!(prompt_id, "Job cancelled while waiting for outputs");
        if tokio::time::timeout(self.release_timeout, self.release(prompt_id))
            .await
            .is_err()
        {
            tracing::warn!(
                prompt_id,
                timeout_ms = self.release_timeout.as_millis() as u64,
                "Daemon did not acknowledge cancellation in time",
            );
        }
        JobError::Cancelled
    }

    /// Interrupt the prompt if it is the one executing, otherwise delete it
    /// from the queue. `/interrupt` is not prompt-scoped, so it is never
    /// sent unless the queue confirms our prompt is running.
    async fn release(&self, prompt_id: &str) {
        let running = match self.api.queue().await {
            Ok(queue) => queue.is_running(prompt_id),
            Err(e) => {
                tracing::debug!(prompt_id, error = %e, "Failed to read queue");
                false
            }
        };

        if running {
            if let Err(e) = self.api.interrupt().await {
                tracing::debug!(prompt_id, error = %e, "Failed to interrupt execution");
            }
        } else if let Err(e) = self.api.cancel_execution(prompt_id).await {
            tracing::debug!(prompt_id, error = %e, "Failed to dequeue prompt");
        }
    }
}

/// Base64-encode (standard alphabet, padded) each blob, preserving order.
pub fn encode_images(blobs: &[Vec<u8>]) -> Vec<String> {
    blobs
        .iter()
        .map(|bytes| base64::engine::general_purpose::STANDARD.encode(bytes))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_uses_standard_padded_alphabet() {
        let encoded = encode_images(&[b"hello".to_vec(), vec![0xfb, 0xff]]);
        assert_eq!(encoded, vec!["aGVsbG8=", "+/8="]);
    }

    #[test]
    fn encode_empty_blob_is_empty_string() {
        assert_eq!(encode_images(&[Vec::new()]), vec![String::new()]);
    }

    #[test]
    fn fetch_policy_parses_short_and_long_names() {
        assert_eq!("abort".parse(), Ok(FetchPolicy::AbortOnFirstFailure));
        assert_eq!("SKIP".parse(), Ok(FetchPolicy::SkipFailed));
        assert_eq!("skip_failed".parse(), Ok(FetchPolicy::SkipFailed));
        assert!("retry".parse::<FetchPolicy>().is_err());
    }

    #[test]
    fn default_fetch_policy_aborts() {
        assert_eq!(FetchPolicy::default(), FetchPolicy::AbortOnFirstFailure);
    }
}
