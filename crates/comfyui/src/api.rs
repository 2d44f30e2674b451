//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps queue inspection (`GET /queue`) and workflow submission
//! (`POST /prompt`) using [`reqwest`].

use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

/// HTTP client for a single ComfyUI instance.
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

/// Snapshot returned by `GET /queue`.
///
/// Entries are kept as raw JSON; only their count matters here.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QueueStatus {
    pub queue_running: Vec<serde_json::Value>,
    pub queue_pending: Vec<serde_json::Value>,
}

impl QueueStatus {
    /// True when nothing is running and nothing is waiting.
    pub fn is_idle(&self) -> bool {
        self.queue_running.is_empty() && self.queue_pending.is_empty()
    }
}

/// Reply from `POST /prompt`.
///
/// Parsed leniently: a body that does not match leaves both fields empty.
#[derive(Debug, Default, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    #[serde(default)]
    pub prompt_id: Option<String>,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: Option<i64>,
}

#[derive(Serialize)]
struct PromptRequest<'a, W: ?Sized> {
    prompt: &'a W,
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (connection refused, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI answered with an unexpected status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

impl ComfyUIApi {
    /// Create a new API client for a ComfyUI instance.
    ///
    /// * `api_url`         - Base HTTP URL, e.g. `http://127.0.0.1:8188`.
    /// * `request_timeout` - Upper bound on each individual request.
    pub fn new(api_url: &str, request_timeout: Duration) -> Result<Self, ComfyUIApiError> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self::with_client(client, api_url))
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: &str) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    /// HTTP API base URL.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Probe `GET /queue` and succeed only on HTTP 200.
    ///
    /// The body is not inspected, so a server that is up but still
    /// warming its queue counts as ready.
    pub async fn check_ready(&self) -> Result<(), ComfyUIApiError> {
        let response = self.get_queue().await?;
        Self::ensure_ok(response).await?;
        Ok(())
    }

    /// Fetch the current queue snapshot.
    pub async fn queue_status(&self) -> Result<QueueStatus, ComfyUIApiError> {
        let response = self.get_queue().await?;
        let response = Self::ensure_ok(response).await?;
        Ok(response.json::<QueueStatus>().await?)
    }

    /// Submit a workflow for execution.
    ///
    /// Sends a single `POST /prompt` with body `{"prompt": <workflow>}`.
    /// Any 2xx status counts as accepted.
    pub async fn submit_workflow<W>(&self, workflow: &W) -> Result<SubmitResponse, ComfyUIApiError>
    where
        W: Serialize + ?Sized,
    {
        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .json(&PromptRequest { prompt: workflow })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::api_error(response).await);
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body).unwrap_or_default())
    }

    // ---- private helpers ----

    async fn get_queue(&self) -> Result<reqwest::Response, ComfyUIApiError> {
        Ok(self
            .client
            .get(format!("{}/queue", self.api_url))
            .send()
            .await?)
    }

    /// Pass the response through only when the status is exactly 200.
    async fn ensure_ok(response: reqwest::Response) -> Result<reqwest::Response, ComfyUIApiError> {
        if response.status() != StatusCode::OK {
            return Err(Self::api_error(response).await);
        }
        Ok(response)
    }

    async fn api_error(response: reqwest::Response) -> ComfyUIApiError {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        ComfyUIApiError::ApiError {
            status: status.as_u16(),
            body,
        }
    }
}
