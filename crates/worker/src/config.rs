use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use comfyrun_comfyui::orchestrator::FetchPolicy;
use comfyrun_comfyui::poll::PollConfig;
use comfyrun_comfyui::supervisor::DaemonCommand;

/// Worker configuration loaded from environment variables.
///
/// All fields have defaults matching the standard serverless image layout
/// (ComfyUI installed at `/comfyui`, models on a volume at
/// `/runpod-volume`). Built once at startup and passed explicitly to each
/// invocation.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Address the daemon listens on and is probed at.
    pub comfyui_host: String,
    pub comfyui_port: u16,
    /// ComfyUI install directory; the daemon is launched from here.
    pub comfyui_dir: PathBuf,
    /// Python interpreter used to launch `main.py`.
    pub comfyui_python: String,
    /// Passed as `--output-directory` when set.
    pub comfyui_output_dir: Option<PathBuf>,
    pub volume_root: PathBuf,
    pub models_dir: PathBuf,
    /// Workflow used when a job does not carry its own.
    pub default_workflow_path: PathBuf,
    pub startup_probe: PollConfig,
    pub history_poll: PollConfig,
    pub fetch_policy: FetchPolicy,
    /// Deadline for a whole invocation.
    pub job_timeout: Duration,
    /// Bind address for `serve` (default: `0.0.0.0`).
    pub host: String,
    /// Bind port for `serve` (default: `8000`).
    pub port: u16,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default                            |
    /// |-----------------------------|------------------------------------|
    /// | `COMFYUI_HOST`              | `127.0.0.1`                        |
    /// | `COMFYUI_PORT`              | `8188`                             |
    /// | `COMFYUI_DIR`               | `/comfyui`                         |
    /// | `COMFYUI_PYTHON`            | `python`                           |
    /// | `COMFYUI_OUTPUT_DIR`        | unset                              |
    /// | `VOLUME_ROOT`               | `/runpod-volume`                   |
    /// | `MODELS_DIR`                | `$VOLUME_ROOT/ComfyUI/models`      |
    /// | `DEFAULT_WORKFLOW_PATH`     | `/app/workflow.json`               |
    /// | `STARTUP_PROBE_INTERVAL_MS` | `1000`                             |
    /// | `STARTUP_MAX_ATTEMPTS`      | `60`                               |
    /// | `POLL_INTERVAL_MS`          | `2000`                             |
    /// | `MAX_POLL_ATTEMPTS`         | `150`                              |
    /// | `FETCH_POLICY`              | `abort` (or `skip`)                |
    /// | `JOB_TIMEOUT_SECS`          | `600`                              |
    /// | `HOST`                      | `0.0.0.0`                          |
    /// | `PORT`                      | `8000`                             |
    ///
    /// Malformed values fall back to the default with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let volume_root = var("VOLUME_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/runpod-volume"));
        let models_dir = var("MODELS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| volume_root.join("ComfyUI").join("models"));

        let startup_probe = PollConfig::new(
            Duration::from_millis(parse_or(&var, "STARTUP_PROBE_INTERVAL_MS", 1000)),
            parse_or(&var, "STARTUP_MAX_ATTEMPTS", 60),
        );
        let history_poll = PollConfig::new(
            Duration::from_millis(parse_or(&var, "POLL_INTERVAL_MS", 2000)),
            parse_or(&var, "MAX_POLL_ATTEMPTS", 150),
        );

        Self {
            comfyui_host: var("COMFYUI_HOST").unwrap_or_else(|| "127.0.0.1".into()),
            comfyui_port: parse_or(&var, "COMFYUI_PORT", 8188),
            comfyui_dir: var("COMFYUI_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/comfyui")),
            comfyui_python: var("COMFYUI_PYTHON").unwrap_or_else(|| "python".into()),
            comfyui_output_dir: var("COMFYUI_OUTPUT_DIR").map(PathBuf::from),
            volume_root,
            models_dir,
            default_workflow_path: var("DEFAULT_WORKFLOW_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/app/workflow.json")),
            startup_probe,
            history_poll,
            fetch_policy: parse_or(&var, "FETCH_POLICY", FetchPolicy::default()),
            job_timeout: Duration::from_secs(parse_or(&var, "JOB_TIMEOUT_SECS", 600)),
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&var, "PORT", 8000),
        }
    }

    /// Base URL of the daemon's HTTP API.
    pub fn api_url(&self) -> String {
        format!("http://{}:{}", self.comfyui_host, self.comfyui_port)
    }

    /// Command used to launch the daemon when none is running.
    pub fn daemon_command(&self) -> DaemonCommand {
        DaemonCommand::comfyui(
            &self.comfyui_dir,
            &self.comfyui_python,
            &self.comfyui_host,
            self.comfyui_port,
            self.comfyui_output_dir.as_deref(),
        )
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, value = %raw, error = %e, "Invalid config value, using default");
                default
            }
        },
    }
}
