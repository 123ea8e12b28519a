//! HTTP surface for `serve` mode.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use comfyrun_core::error::ErrorCategory;
use comfyrun_core::job::JobInput;
use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::config::WorkerConfig;
use crate::handler::run_with_deadline;

/// Shared state for the worker's routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<WorkerConfig>,
    /// Held for the duration of a job; one job per instance.
    job_slot: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config: Arc::new(config),
            job_slot: Arc::new(Mutex::new(())),
        }
    }
}

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Whether a job is currently running.
    pub busy: bool,
}

/// GET /health
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        busy: state.job_slot.try_lock().is_err(),
    })
}

/// POST /run -- run one job and return its outcome.
async fn run_job(
    State(state): State<AppState>,
    payload: Result<Json<JobInput>, JsonRejection>,
) -> Response {
    let Json(input) = match payload {
        Ok(input) => input,
        Err(rejection) => {
            return error_response(
                StatusCode::UNPROCESSABLE_ENTITY,
                "BAD_REQUEST",
                rejection.body_text(),
            )
        }
    };

    let Ok(_slot) = state.job_slot.try_lock() else {
        return error_response(
            StatusCode::CONFLICT,
            "BUSY",
            "A job is already running on this worker".to_string(),
        );
    };

    let response = run_with_deadline(&state.config, input).await;
    let status = match response.category() {
        None => StatusCode::OK,
        Some(category) => status_for(category),
    };
    (status, Json(response)).into_response()
}

/// HTTP status for a failed job.
pub fn status_for(category: ErrorCategory) -> StatusCode {
    match category {
        ErrorCategory::BadInput => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorCategory::ResourceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCategory::DaemonUnavailable
        | ErrorCategory::GenerationIncomplete
        | ErrorCategory::ArtifactUnavailable => StatusCode::BAD_GATEWAY,
        ErrorCategory::Cancelled => StatusCode::GATEWAY_TIMEOUT,
    }
}

fn error_response(status: StatusCode, code: &str, message: String) -> Response {
    let body = json!({
        "error": message,
        "code": code,
    });
    (status, Json(body)).into_response()
}

/// Build the worker router with tracing middleware.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/run", post(run_job))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}
