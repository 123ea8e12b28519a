#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path as UrlPath, State};
use axum::http::{Method, Request, Response, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use comfyrun_comfyui::poll::PollConfig;
use comfyrun_worker::config::WorkerConfig;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

pub const PROMPT_ID: &str = "worker-prompt-1";
pub const IMAGE_BYTES: &[u8] = b"\x89PNG stub";

/// Minimal healthy daemon: accepts every prompt and reports one image
/// immediately, or never when started with [`StubDaemon::pending`].
pub struct StubDaemon {
    pub port: u16,
    submissions: Arc<Mutex<Vec<Value>>>,
    task: tokio::task::JoinHandle<()>,
}

impl StubDaemon {
    pub async fn start() -> Self {
        Self::serve(false).await
    }

    /// A daemon whose prompts never finish.
    pub async fn pending() -> Self {
        Self::serve(true).await
    }

    async fn serve(pending: bool) -> Self {
        let submissions = Arc::new(Mutex::new(Vec::new()));

        let history_route = if pending {
            get(|| async { Json(json!({})) })
        } else {
            get(history)
        };

        let app = Router::new()
            .route("/system_stats", get(|| async { Json(json!({ "system": {} })) }))
            .route("/prompt", post(submit))
            .route("/history/{prompt_id}", history_route)
            .route("/view", get(|| async { IMAGE_BYTES.to_vec() }))
            .with_state(submissions.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            port,
            submissions,
            task,
        }
    }

    pub fn submissions(&self) -> Vec<Value> {
        self.submissions.lock().unwrap().clone()
    }
}

impl Drop for StubDaemon {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn submit(
    State(submissions): State<Arc<Mutex<Vec<Value>>>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    submissions.lock().unwrap().push(body);
    Json(json!({ "prompt_id": PROMPT_ID, "number": 0 }))
}

async fn history(UrlPath(prompt_id): UrlPath<String>) -> Json<Value> {
    let mut body = serde_json::Map::new();
    body.insert(
        prompt_id,
        json!({
            "outputs": { "9": { "images": [{ "filename": "out.png", "subfolder": "", "type": "output" }] } },
            "status": { "status_str": "success", "completed": true, "messages": [] }
        }),
    );
    Json(Value::Object(body))
}

/// A volume laid out as `<root>/models/{unet,vae,clip,loras}`.
pub fn model_volume() -> tempfile::TempDir {
    let root = tempfile::tempdir().unwrap();
    for sub in ["unet", "vae", "clip", "loras"] {
        std::fs::create_dir_all(root.path().join("models").join(sub)).unwrap();
    }
    root
}

/// Worker config pointing at `volume` and a daemon on `port`, with short
/// polling intervals. The launch command points nowhere, so a test that
/// needs a launch fails instead of starting a real daemon.
pub fn test_config(volume: &Path, port: u16) -> WorkerConfig {
    WorkerConfig {
        comfyui_host: "127.0.0.1".into(),
        comfyui_port: port,
        comfyui_python: "/nonexistent/python".into(),
        volume_root: volume.to_path_buf(),
        models_dir: volume.join("models"),
        default_workflow_path: volume.join("workflow.json"),
        startup_probe: PollConfig::new(Duration::from_millis(10), 3),
        history_poll: PollConfig::new(Duration::from_millis(10), 5),
        job_timeout: Duration::from_secs(30),
        ..WorkerConfig::default()
    }
}

/// A port nothing is listening on.
pub fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Editor graph with a prompt node and a save node.
pub fn sample_graph() -> Value {
    json!({
        "nodes": [
            { "id": 6, "type": "CLIPTextEncode", "widgets_values": ["placeholder"] },
            { "id": 9, "type": "SaveImage", "widgets_values": ["ComfyUI"] }
        ],
        "links": []
    })
}

pub async fn send(app: Router, method: Method, uri: &str, body: Option<Value>) -> Response<Body> {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn assert_status(response: &Response<Body>, expected: StatusCode) {
    assert_eq!(response.status(), expected, "unexpected status");
}
