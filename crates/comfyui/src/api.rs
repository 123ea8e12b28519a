//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps the daemon's HTTP API (health probe, prompt submission, history
//! retrieval, image download, cancellation) using [`reqwest`].

use std::time::Duration;

use comfyrun_core::request::ExecutionRequest;
use serde::Deserialize;

use crate::history::{parse_history, HistoryEntry, HistoryResponse, ImageArtifact};

/// Per-request timeout for health probes. A probe that hangs counts as
/// unhealthy.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Default per-request timeout for every other endpoint.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for a single ComfyUI daemon.
#[derive(Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
    request_timeout: Duration,
}

/// Response returned by the `/prompt` endpoint after queuing a workflow.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Daemon-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: i64,
}

/// Snapshot of the daemon's execution queue from `GET /queue`.
///
/// Each queue item is an array whose second element is the prompt id.
#[derive(Debug, Default, Deserialize)]
pub struct QueueStatus {
    #[serde(default)]
    pub queue_running: Vec<Vec<serde_json::Value>>,
    #[serde(default)]
    pub queue_pending: Vec<Vec<serde_json::Value>>,
}

impl QueueStatus {
    /// Whether `prompt_id` is the one currently executing.
    pub fn is_running(&self, prompt_id: &str) -> bool {
        self.queue_running
            .iter()
            .any(|item| item.get(1).and_then(serde_json::Value::as_str) == Some(prompt_id))
    }
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (connection refused, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// A 2xx response whose body did not have the expected shape.
    #[error("Unexpected ComfyUI response ({status}): {body}")]
    UnexpectedResponse { status: u16, body: String },
}

impl ComfyUIApi {
    /// Create a new API client for a ComfyUI daemon.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://127.0.0.1:8188`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Bound every non-probe request by `timeout`. A daemon that accepts a
    /// connection and never answers surfaces as a request error.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Fetch `GET /system_stats`.
    pub async fn system_stats(&self) -> Result<serde_json::Value, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/system_stats", self.api_url))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Health probe: `true` iff `/system_stats` answers with a JSON body.
    pub async fn is_healthy(&self) -> bool {
        match self.system_stats().await {
            Ok(_) => true,
            Err(e) => {
                tracing::trace!(error = %e, "Health probe failed");
                false
            }
        }
    }

    /// Submit an execution request.
    ///
    /// Sends `POST /prompt` with `{"prompt": request, "client_id": ...}`.
    /// A 2xx body without a `prompt_id` is reported as
    /// [`ComfyUIApiError::UnexpectedResponse`].
    pub async fn submit_workflow(
        &self,
        request: &ExecutionRequest,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": request,
            "client_id": client_id,
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .json(&body)
            .timeout(self.request_timeout)
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        serde_json::from_str::<SubmitResponse>(&text)
            .map_err(|_| ComfyUIApiError::UnexpectedResponse { status, body: text })
    }

    /// Cancel a queued execution.
    ///
    /// Sends a `POST /queue` request asking ComfyUI to delete the
    /// specified prompt from the queue.
    pub async fn cancel_execution(&self, prompt_id: &str) -> Result<(), ComfyUIApiError> {
        let body = serde_json::json!({
            "delete": [prompt_id],
        });

        let response = self
            .client
            .post(format!("{}/queue", self.api_url))
            .json(&body)
            .timeout(self.request_timeout)
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Fetch `GET /queue`: the running and pending prompts.
    pub async fn queue(&self) -> Result<QueueStatus, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/queue", self.api_url))
            .timeout(self.request_timeout)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Interrupt the currently running execution immediately.
    ///
    /// Sends a `POST /interrupt` request. This does not target a
    /// specific prompt; it interrupts whatever is executing right now.
    pub async fn interrupt(&self) -> Result<(), ComfyUIApiError> {
        let response = self
            .client
            .post(format!("{}/interrupt", self.api_url))
            .timeout(self.request_timeout)
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Retrieve execution history for a specific prompt.
    ///
    /// Sends `GET /history/{prompt_id}`. The response is empty until the
    /// prompt has finished.
    pub async fn get_history(&self, prompt_id: &str) -> Result<HistoryResponse, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, prompt_id))
            .timeout(self.request_timeout)
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        parse_history(&text).map_err(|_| ComfyUIApiError::UnexpectedResponse { status, body: text })
    }

    /// History entry for `prompt_id`, or `None` while it is still pending.
    pub async fn history_entry(
        &self,
        prompt_id: &str,
    ) -> Result<Option<HistoryEntry>, ComfyUIApiError> {
        let mut history = self.get_history(prompt_id).await?;
        Ok(history.shift_remove(prompt_id))
    }

    /// Download the raw bytes of an image via `GET /view`.
    pub async fn fetch_image(&self, image: &ImageArtifact) -> Result<Vec<u8>, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/view", self.api_url))
            .query(&[
                ("filename", image.filename.as_str()),
                ("subfolder", image.subfolder.as_str()),
                ("type", image.kind.as_str()),
            ])
            .timeout(self.request_timeout)
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ComfyUIApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), ComfyUIApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}
