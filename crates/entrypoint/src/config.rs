use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use genrun_comfyui::launcher::{ServerCommand, DEFAULT_STOP_TIMEOUT};
use genrun_comfyui::poll::PollConfig;

/// Runtime configuration loaded from environment variables.
///
/// Job parameters (`PROMPT`, `SIZE`, ...) are not part of this struct;
/// they are resolved separately once the server is up.
#[derive(Debug, Clone)]
pub struct EntrypointConfig {
    /// How to launch the ComfyUI server.
    pub server: ServerCommand,
    /// Base HTTP URL of the launched server.
    pub api_url: String,
    /// Workflow document in ComfyUI API format.
    pub workflow_path: PathBuf,
    pub readiness: PollConfig,
    pub completion: PollConfig,
    /// Pause between readiness and parameter resolution.
    pub settle_delay: Duration,
    /// Upper bound on each HTTP request to the server.
    pub request_timeout: Duration,
    /// Grace period between SIGINT and a hard kill on shutdown.
    pub stop_timeout: Duration,
}

/// A runtime configuration variable could not be parsed.
#[derive(Debug, thiserror::Error)]
#[error("{var} must be {expected}, got '{value}'")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub expected: &'static str,
}

impl EntrypointConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                | Default                |
    /// |------------------------|------------------------|
    /// | `COMFYUI_PYTHON`       | `python3`              |
    /// | `COMFYUI_MAIN`         | `/app/ComfyUI/main.py` |
    /// | `COMFYUI_HOST`         | `127.0.0.1`            |
    /// | `COMFYUI_PORT`         | `8188`                 |
    /// | `OUTPUT_DIR`           | `/outputs/`            |
    /// | `WORKFLOW_PATH`        | `workflow.json`        |
    /// | `READY_TIMEOUT_SECS`   | `30`                   |
    /// | `JOB_TIMEOUT_SECS`     | `900`                  |
    /// | `POLL_INTERVAL_SECS`   | `1`                    |
    /// | `REQUEST_TIMEOUT_SECS` | `5`                    |
    /// | `STOP_TIMEOUT_SECS`    | `30`                   |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reading through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |var: &str, default: &str| {
            lookup(var)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let python = text("COMFYUI_PYTHON", "python3");
        let main_script = text("COMFYUI_MAIN", "/app/ComfyUI/main.py");
        let host = text("COMFYUI_HOST", "127.0.0.1");
        let output_dir = text("OUTPUT_DIR", "/outputs/");
        let workflow_path = PathBuf::from(text("WORKFLOW_PATH", "workflow.json"));

        let port: u16 = parse_var(&lookup, "COMFYUI_PORT", 8188, "a valid port number")?;
        let ready_secs: u64 = parse_var(&lookup, "READY_TIMEOUT_SECS", 30, WHOLE_SECS)?;
        let job_secs: u64 = parse_var(&lookup, "JOB_TIMEOUT_SECS", 900, WHOLE_SECS)?;
        let interval = parse_positive_secs(&lookup, "POLL_INTERVAL_SECS", 1)?;
        let request_timeout = parse_positive_secs(&lookup, "REQUEST_TIMEOUT_SECS", 5)?;
        let stop_secs: u64 = parse_var(
            &lookup,
            "STOP_TIMEOUT_SECS",
            DEFAULT_STOP_TIMEOUT.as_secs(),
            WHOLE_SECS,
        )?;

        Ok(Self {
            server: ServerCommand::comfyui(&python, &main_script, &host, port, &output_dir),
            api_url: format!("http://{host}:{port}"),
            workflow_path,
            readiness: PollConfig {
                interval,
                deadline: Duration::from_secs(ready_secs),
            },
            completion: PollConfig {
                interval,
                deadline: Duration::from_secs(job_secs),
            },
            settle_delay: Duration::from_secs(1),
            request_timeout,
            stop_timeout: Duration::from_secs(stop_secs),
        })
    }
}

const WHOLE_SECS: &str = "a whole number of seconds";
const POSITIVE_SECS: &str = "a positive number of seconds";

/// True when `DEBUG_MODE=true` is set.
pub fn debug_mode_from_env() -> bool {
    std::env::var("DEBUG_MODE").is_ok_and(|v| v == "true")
}

fn parse_var<F, T>(
    lookup: &F,
    var: &'static str,
    default: T,
    expected: &'static str,
) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError {
            var,
            value,
            expected,
        }),
    }
}

/// Parse a duration in seconds that must not be zero.
fn parse_positive_secs<F>(
    lookup: &F,
    var: &'static str,
    default: u64,
) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let secs: u64 = parse_var(lookup, var, default, POSITIVE_SECS)?;
    if secs == 0 {
        return Err(ConfigError {
            var,
            value: secs.to_string(),
            expected: POSITIVE_SECS,
        });
    }
    Ok(Duration::from_secs(secs))
}
