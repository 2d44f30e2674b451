//! One generation job, start to finish.
//!
//! [`run`] loads the workflow, launches ComfyUI, waits for it, resolves
//! and applies the job parameters, submits the prompt and waits for the
//! queue to drain. The server is stopped on every path once it has been
//! started.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use genrun_comfyui::api::{ComfyUIApi, ComfyUIApiError};
use genrun_comfyui::launcher::{ComfyUIServer, LaunchError};
use genrun_comfyui::poll::{self, PollError};
use genrun_core::params::{self, ParamErrors, ResolvedParams};
use genrun_core::workflow::{WorkflowDocument, WorkflowError};

use crate::config::EntrypointConfig;

/// Why a job did not complete.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error("Failed to create ComfyUI client: {0}")]
    Client(#[source] ComfyUIApiError),

    #[error("Failed to connect to the server within the timeout period: {0}")]
    NotReady(#[source] PollError),

    #[error("Invalid job parameters: {0}")]
    InvalidParams(#[from] ParamErrors),

    #[error("Failed to queue prompt: {0}")]
    Submit(#[source] ComfyUIApiError),

    #[error("Prompt is still running or there was an error: {0}")]
    Unfinished(#[source] PollError),

    #[error("Job cancelled by shutdown signal")]
    Cancelled,
}

impl RunError {
    fn not_ready(e: PollError) -> Self {
        match e {
            PollError::Cancelled => Self::Cancelled,
            e => Self::NotReady(e),
        }
    }

    fn unfinished(e: PollError) -> Self {
        match e {
            PollError::Cancelled => Self::Cancelled,
            e => Self::Unfinished(e),
        }
    }
}

/// Summary of a successful job.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Server-assigned prompt id, when the server reported one.
    pub prompt_id: Option<String>,
    pub params: ResolvedParams,
    pub elapsed: Duration,
}

/// Run one job end to end.
///
/// `lookup` supplies the job parameter variables (`PROMPT`, `SIZE`, ...);
/// pass `|var| std::env::var(var).ok()` in production. Cancelling
/// `cancel` aborts any wait in progress and still stops the server.
pub async fn run<F>(
    config: &EntrypointConfig,
    lookup: F,
    cancel: &CancellationToken,
) -> Result<RunSummary, RunError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut workflow = WorkflowDocument::load(&config.workflow_path)?;
    tracing::info!(
        path = %config.workflow_path.display(),
        nodes = workflow.len(),
        "Loaded workflow",
    );

    let api = ComfyUIApi::new(&config.api_url, config.request_timeout).map_err(RunError::Client)?;

    let mut server = ComfyUIServer::start(&config.server, config.stop_timeout)?;

    let result = drive(config, &api, &mut workflow, lookup, cancel).await;

    if let Err(e) = server.stop().await {
        tracing::error!(error = %e, "Failed to stop ComfyUI server");
    }

    result
}

/// Everything between server start and server stop.
async fn drive<F>(
    config: &EntrypointConfig,
    api: &ComfyUIApi,
    workflow: &mut WorkflowDocument,
    lookup: F,
    cancel: &CancellationToken,
) -> Result<RunSummary, RunError>
where
    F: Fn(&str) -> Option<String>,
{
    let started = Instant::now();

    poll::wait_until_ready(api, &config.readiness, cancel)
        .await
        .map_err(RunError::not_ready)?;
    tracing::info!(api_url = %api.api_url(), "ComfyUI server is ready");

    tokio::select! {
        _ = cancel.cancelled() => return Err(RunError::Cancelled),
        _ = tokio::time::sleep(config.settle_delay) => {}
    }

    let params = match params::resolve(lookup) {
        Ok(params) => params,
        Err(errors) => {
            for e in errors.iter() {
                tracing::error!(var = e.var, "{e}");
            }
            return Err(errors.into());
        }
    };
    tracing::debug!(?params, "Resolved job parameters");

    if params.seed != params.video_seed {
        tracing::warn!(
            seed = params.seed,
            video_seed = params.video_seed,
            "Image sampler seed is overwritten by VIDEOSEED; SEED has no effect",
        );
    }

    workflow.apply(&params)?;

    let response = api
        .submit_workflow(&*workflow)
        .await
        .map_err(RunError::Submit)?;
    tracing::info!(
        prompt_id = response.prompt_id.as_deref().unwrap_or("<unknown>"),
        number = response.number,
        "Prompt queued",
    );

    poll::wait_until_idle(api, &config.completion, cancel)
        .await
        .map_err(RunError::unfinished)?;

    let elapsed = started.elapsed();
    tracing::info!(elapsed_secs = elapsed.as_secs(), "Prompt finished successfully");

    Ok(RunSummary {
        prompt_id: response.prompt_id,
        params,
        elapsed,
    })
}
