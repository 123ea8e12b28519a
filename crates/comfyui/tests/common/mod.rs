//! In-process stub of the ComfyUI HTTP API.
//!
//! Binds an axum router to `127.0.0.1:0` and answers the endpoints the
//! client uses, with behaviour configured per test through [`StubBehaviour`].

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

pub const PROMPT_ID: &str = "stub-prompt-1";

/// When the history endpoint starts reporting outputs.
#[derive(Debug, Clone)]
pub enum HistoryMode {
    /// Outputs on the first poll.
    Immediate,
    /// Empty history for the first `n` polls, outputs afterwards.
    AfterPolls(u32),
    /// Never reports the prompt.
    Never,
    /// Reports an execution error with this message.
    Error(String),
}

#[derive(Debug, Clone)]
pub struct StubBehaviour {
    /// Number of health probes answered with 503 before reporting healthy.
    pub unhealthy_probes: u32,
    pub healthy: bool,
    pub reject_submission: bool,
    pub omit_prompt_id: bool,
    pub history: HistoryMode,
    /// Filenames reported in the history outputs, in order.
    pub images: Vec<String>,
    /// Filenames `/view` answers with 404.
    pub missing_images: Vec<String>,
    /// `GET /queue` lists the prompt as executing rather than pending.
    pub running: bool,
    /// `/history` accepts the request and never answers.
    pub hang_history: bool,
    /// `/queue` and `/interrupt` accept the request and never answer.
    pub hang_release: bool,
}

impl Default for StubBehaviour {
    fn default() -> Self {
        Self {
            unhealthy_probes: 0,
            healthy: true,
            reject_submission: false,
            omit_prompt_id: false,
            history: HistoryMode::Immediate,
            images: vec!["ComfyUI_00001_.png".into()],
            missing_images: Vec::new(),
            running: false,
            hang_history: false,
            hang_release: false,
        }
    }
}

#[derive(Default)]
struct Counters {
    probes: AtomicU32,
    history_polls: AtomicU32,
    cancels: AtomicU32,
    interrupts: AtomicU32,
}

#[derive(Clone)]
struct StubState {
    behaviour: Arc<StubBehaviour>,
    counters: Arc<Counters>,
    submissions: Arc<Mutex<Vec<Value>>>,
}

pub struct StubDaemon {
    pub url: String,
    pub port: u16,
    state: StubState,
    task: tokio::task::JoinHandle<()>,
}

impl StubDaemon {
    pub async fn start(behaviour: StubBehaviour) -> Self {
        let state = StubState {
            behaviour: Arc::new(behaviour),
            counters: Arc::new(Counters::default()),
            submissions: Arc::new(Mutex::new(Vec::new())),
        };

        let app = Router::new()
            .route("/system_stats", get(system_stats))
            .route("/prompt", post(submit))
            .route("/history/{prompt_id}", get(history))
            .route("/view", get(view))
            .route("/queue", get(queue_status).post(queue))
            .route("/interrupt", post(interrupt))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://127.0.0.1:{port}"),
            port,
            state,
            task,
        }
    }

    /// Request bodies received on `POST /prompt`.
    pub fn submissions(&self) -> Vec<Value> {
        self.state.submissions.lock().unwrap().clone()
    }

    pub fn probes(&self) -> u32 {
        self.state.counters.probes.load(Ordering::SeqCst)
    }

    pub fn history_polls(&self) -> u32 {
        self.state.counters.history_polls.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> u32 {
        self.state.counters.cancels.load(Ordering::SeqCst)
    }

    pub fn interrupts(&self) -> u32 {
        self.state.counters.interrupts.load(Ordering::SeqCst)
    }
}

impl Drop for StubDaemon {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A port nothing is listening on.
pub fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// The bytes `/view` serves for `filename`.
pub fn image_bytes(filename: &str) -> Vec<u8> {
    format!("png:{filename}").into_bytes()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn system_stats(State(state): State<StubState>) -> Response {
    let seen = state.counters.probes.fetch_add(1, Ordering::SeqCst);
    if !state.behaviour.healthy || seen < state.behaviour.unhealthy_probes {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    Json(json!({ "system": { "os": "posix" }, "devices": [] })).into_response()
}

async fn submit(State(state): State<StubState>, Json(body): Json<Value>) -> Response {
    state.submissions.lock().unwrap().push(body);

    if state.behaviour.reject_submission {
        let error = json!({
            "error": { "type": "prompt_outputs_failed_validation", "message": "Prompt outputs failed validation" },
            "node_errors": {}
        });
        return (StatusCode::BAD_REQUEST, Json(error)).into_response();
    }
    if state.behaviour.omit_prompt_id {
        return Json(json!({ "number": 0 })).into_response();
    }
    Json(json!({ "prompt_id": PROMPT_ID, "number": 0, "node_errors": {} })).into_response()
}

async fn history(State(state): State<StubState>, Path(prompt_id): Path<String>) -> Response {
    let polls = state.counters.history_polls.fetch_add(1, Ordering::SeqCst) + 1;
    if state.behaviour.hang_history {
        std::future::pending::<()>().await;
    }

    let entry = match &state.behaviour.history {
        HistoryMode::Never => None,
        HistoryMode::AfterPolls(n) if polls <= *n => None,
        HistoryMode::Immediate | HistoryMode::AfterPolls(_) => {
            let images: Vec<Value> = state
                .behaviour
                .images
                .iter()
                .map(|name| json!({ "filename": name, "subfolder": "", "type": "output" }))
                .collect();
            Some(json!({
                "outputs": { "9": { "images": images } },
                "status": { "status_str": "success", "completed": true, "messages": [] }
            }))
        }
        HistoryMode::Error(message) => Some(json!({
            "outputs": {},
            "status": {
                "status_str": "error",
                "completed": false,
                "messages": [["execution_error", {
                    "prompt_id": prompt_id,
                    "node_type": "KSampler",
                    "exception_message": message
                }]]
            }
        })),
    };

    let mut body = serde_json::Map::new();
    if let Some(entry) = entry {
        body.insert(prompt_id, entry);
    }
    Json(Value::Object(body)).into_response()
}

async fn view(
    State(state): State<StubState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(filename) = params.get("filename") else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    if state.behaviour.missing_images.contains(filename) {
        return StatusCode::NOT_FOUND.into_response();
    }
    image_bytes(filename).into_response()
}

async fn queue_status(State(state): State<StubState>) -> Json<Value> {
    if state.behaviour.hang_release {
        std::future::pending::<()>().await;
    }
    let item = json!([0, PROMPT_ID, {}, {}, ["9"]]);
    if state.behaviour.running {
        Json(json!({ "queue_running": [item], "queue_pending": [] }))
    } else {
        Json(json!({ "queue_running": [], "queue_pending": [item] }))
    }
}

async fn queue(State(state): State<StubState>) -> StatusCode {
    state.counters.cancels.fetch_add(1, Ordering::SeqCst);
    if state.behaviour.hang_release {
        std::future::pending::<()>().await;
    }
    StatusCode::OK
}

async fn interrupt(State(state): State<StubState>) -> StatusCode {
    state.counters.interrupts.fetch_add(1, Ordering::SeqCst);
    if state.behaviour.hang_release {
        std::future::pending::<()>().await;
    }
    StatusCode::OK
}
