//! Fixed-interval polling against a ComfyUI instance.
//!
//! [`poll_until`] is the single primitive: run a probe, stop on the first
//! success, otherwise sleep a fixed interval and try again until the
//! deadline passes or the [`CancellationToken`] fires. There is no
//! backoff. [`wait_until_ready`] and [`wait_until_idle`] are the two uses
//! the entrypoint makes of it.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::api::{ComfyUIApi, ComfyUIApiError, QueueStatus};

/// Interval and overall deadline for one polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay between consecutive probes.
    pub interval: Duration,
    /// Give up once this much time has passed since the first probe.
    pub deadline: Duration,
}

impl PollConfig {
    /// Waiting for the server to answer `GET /queue` after launch.
    pub fn readiness() -> Self {
        Self {
            interval: Duration::from_secs(1),
            deadline: Duration::from_secs(30),
        }
    }

    /// Waiting for a submitted job to leave the queue.
    pub fn completion() -> Self {
        Self {
            interval: Duration::from_secs(1),
            deadline: Duration::from_secs(900),
        }
    }
}

/// Why a polling loop ended without success.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("Deadline of {}s elapsed after {attempts} attempts", .deadline.as_secs())]
    DeadlineElapsed { deadline: Duration, attempts: u32 },

    #[error("Polling cancelled")]
    Cancelled,
}

/// Run `probe` every `config.interval` until it yields `Some`.
pub async fn poll_until<T, F, Fut>(
    config: &PollConfig,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<T, PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let start = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(PollError::Cancelled),
            outcome = probe() => outcome,
        };

        if let Some(value) = outcome {
            return Ok(value);
        }

        if start.elapsed() >= config.deadline {
            return Err(PollError::DeadlineElapsed {
                deadline: config.deadline,
                attempts,
            });
        }

        // Wait before the next attempt, respecting cancellation.
        tokio::select! {
            _ = cancel.cancelled() => return Err(PollError::Cancelled),
            _ = tokio::time::sleep(config.interval) => {}
        }
    }
}

/// Wait until `GET /queue` answers HTTP 200.
pub async fn wait_until_ready(
    api: &ComfyUIApi,
    config: &PollConfig,
    cancel: &CancellationToken,
) -> Result<(), PollError> {
    let interval_secs = config.interval.as_secs_f64();

    poll_until(config, cancel, || async move {
        match api.check_ready().await {
            Ok(()) => Some(()),
            Err(ComfyUIApiError::ApiError { status, .. }) => {
                tracing::info!(status, "Server not ready yet, waiting {interval_secs}s");
                None
            }
            Err(e) => {
                tracing::info!(
                    error = %e,
                    "Server not ready yet (no response), waiting {interval_secs}s"
                );
                None
            }
        }
    })
    .await
}

/// Wait until the queue reports no running and no pending jobs.
///
/// Transport errors, non-200 answers and unparseable bodies all count as
/// "not finished yet".
pub async fn wait_until_idle(
    api: &ComfyUIApi,
    config: &PollConfig,
    cancel: &CancellationToken,
) -> Result<QueueStatus, PollError> {
    poll_until(config, cancel, || async move {
        match api.queue_status().await {
            Ok(status) if status.is_idle() => Some(status),
            Ok(status) => {
                tracing::debug!(
                    running = status.queue_running.len(),
                    pending = status.queue_pending.len(),
                    "Prompt is still running",
                );
                None
            }
            Err(e) => {
                tracing::info!(error = %e, "Server not ready");
                None
            }
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn fast(deadline_ms: u64) -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(10),
            deadline: Duration::from_millis(deadline_ms),
        }
    }

    #[test]
    fn default_configs_match_documented_values() {
        assert_eq!(PollConfig::readiness().deadline, Duration::from_secs(30));
        assert_eq!(PollConfig::readiness().interval, Duration::from_secs(1));
        assert_eq!(PollConfig::completion().deadline, Duration::from_secs(900));
        assert_eq!(PollConfig::completion().interval, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn returns_first_successful_probe() {
        let cancel = CancellationToken::new();
        let mut calls = 0u32;

        let result = poll_until(&fast(5_000), &cancel, || {
            calls += 1;
            let n = calls;
            async move { (n >= 3).then_some(n) }
        })
        .await;

        assert_matches!(result, Ok(3));
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn immediate_success_does_not_sleep() {
        let cancel = CancellationToken::new();
        let config = PollConfig {
            interval: Duration::from_secs(60),
            deadline: Duration::from_secs(60),
        };
        let start = Instant::now();
        let result = poll_until(&config, &cancel, || async { Some("up") }).await;
        assert_matches!(result, Ok("up"));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn gives_up_after_deadline() {
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let result: Result<(), _> = poll_until(&fast(100), &cancel, || async { None }).await;

        assert_matches!(result, Err(PollError::DeadlineElapsed { attempts, .. }) if attempts > 1);
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn cancellation_token_stops_polling() {
        let cancel = CancellationToken::new();
        // Cancel immediately; the probe must never be awaited to completion.
        cancel.cancel();

        let result: Result<(), _> = poll_until(&fast(5_000), &cancel, || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            None
        })
        .await;

        assert_matches!(result, Err(PollError::Cancelled));
    }

    #[tokio::test]
    async fn cancellation_during_sleep_stops_polling() {
        let cancel = CancellationToken::new();
        let config = PollConfig {
            interval: Duration::from_secs(60),
            deadline: Duration::from_secs(600),
        };

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let result: Result<(), _> = poll_until(&config, &cancel, || async { None }).await;
        assert_matches!(result, Err(PollError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn unreachable_server_never_becomes_ready() {
        let cancel = CancellationToken::new();
        // Port 9 (discard) is not expected to run an HTTP server.
        let api =
            ComfyUIApi::new("http://127.0.0.1:9", Duration::from_millis(200)).expect("client");
        let result = wait_until_ready(&api, &fast(150), &cancel).await;
        assert_matches!(result, Err(PollError::DeadlineElapsed { .. }));
    }
}
