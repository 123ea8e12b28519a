use std::io::Read;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use comfyrun_core::job::JobInput;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use comfyrun_worker::config::WorkerConfig;
use comfyrun_worker::handler::run_with_deadline;
use comfyrun_worker::server::{router, AppState};

#[derive(Parser)]
#[command(name = "comfyrun-worker", version, about = "Run ComfyUI image-generation jobs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single job and print its outcome as JSON.
    Run {
        /// Job input file; reads stdin when omitted.
        #[arg(long, short)]
        input: Option<PathBuf>,
    },
    /// Serve jobs over HTTP.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    // Logs go to stderr; stdout carries the job result in `run` mode.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "comfyrun_worker=info,comfyrun_comfyui=info,comfyrun_core=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = WorkerConfig::from_env();
    tracing::info!(
        api_url = %config.api_url(),
        models_dir = %config.models_dir.display(),
        "Loaded worker configuration",
    );

    match cli.command {
        Command::Run { input } => run_once(config, input).await,
        Command::Serve => serve(config).await.map(|()| ExitCode::SUCCESS),
    }
}

async fn run_once(config: WorkerConfig, input: Option<PathBuf>) -> anyhow::Result<ExitCode> {
    let text = match &input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read job input {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read job input from stdin")?;
            buf
        }
    };

    let job: JobInput = serde_json::from_str(&text).context("Job input is not valid JSON")?;
    let response = run_with_deadline(&config, job).await;

    println!("{}", serde_json::to_string(&response)?);
    Ok(if response.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn serve(config: WorkerConfig) -> anyhow::Result<()> {
    let addr = SocketAddr::new(
        config.host.parse().context("Invalid HOST address")?,
        config.port,
    );
    let app = router(AppState::new(config));

    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
