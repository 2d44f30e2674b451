//! `genrun` -- container entrypoint for a single ComfyUI generation job.
//!
//! Starts ComfyUI, injects the job parameters into the bundled
//! image-to-video workflow, queues it, and waits for the queue to drain.
//! Exits `0` on success and `1` on any failure.
//!
//! # Job parameters
//!
//! | Variable         | Default                           | Accepted                  |
//! |------------------|-----------------------------------|---------------------------|
//! | `PROMPT`         | `question mark floating in space` | any text                  |
//! | `SEED`           | `42`                              | non-negative integer      |
//! | `VIDEOSEED`      | `42`                              | non-negative integer      |
//! | `FRAMERATE`      | `8`                               | 1 to 15                   |
//! | `SIZE`           | `1024`                            | 512, 768, 1024, 2048      |
//! | `STEPS`          | `75`                              | 5 to 200                  |
//! | `VIDEOSTEPS`     | `20`                              | 5 to 70                   |
//! | `BATCHING`       | `1`                               | 1, 2, 4, 8                |
//! | `SAMPLER`        | `euler_ancestral`                 | KSampler sampler name     |
//! | `VIDEOSAMPLER`   | `euler_ancestral`                 | KSampler sampler name     |
//! | `SCHEDULER`      | `normal`                          | KSampler scheduler name   |
//! | `VIDEOSCHEDULER` | `normal`                          | KSampler scheduler name   |
//!
//! Runtime settings are documented on
//! [`EntrypointConfig::from_env`](genrun_entrypoint::config::EntrypointConfig::from_env).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use genrun_entrypoint::config::{self, EntrypointConfig};
use genrun_entrypoint::run;

/// Run one ComfyUI generation job configured through the environment.
#[derive(Parser)]
#[command(name = "genrun")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Verbose diagnostics (same as DEBUG_MODE=true)
    #[arg(long)]
    debug: bool,

    /// Workflow file in ComfyUI API format (overrides WORKFLOW_PATH)
    #[arg(long, value_name = "PATH")]
    workflow: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let debug_mode = cli.debug || config::debug_mode_from_env();
    let level = if debug_mode { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("genrun={level},genrun_entrypoint={level},genrun_comfyui={level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match EntrypointConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(path) = cli.workflow {
        config.workflow_path = path;
    }

    tracing::info!(
        api_url = %config.api_url,
        workflow = %config.workflow_path.display(),
        debug = debug_mode,
        "Starting genrun",
    );

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    match run::run(&config, |var| std::env::var(var).ok(), &cancel).await {
        Ok(summary) => {
            tracing::info!(
                prompt_id = summary.prompt_id.as_deref().unwrap_or("<unknown>"),
                elapsed_secs = summary.elapsed.as_secs(),
                "Job complete",
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("Fatal error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
///
/// A handler that cannot be installed simply never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), stopping job");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, stopping job");
        }
    }
}
