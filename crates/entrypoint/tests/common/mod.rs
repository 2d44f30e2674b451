//! Shared fixtures for entrypoint integration tests: an in-process axum
//! stand-in for the ComfyUI HTTP API and a stand-in server process.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use genrun_comfyui::launcher::ServerCommand;
use genrun_comfyui::poll::PollConfig;
use genrun_entrypoint::config::EntrypointConfig;

/// Workflow document shipped with the entrypoint.
pub fn bundled_workflow() -> PathBuf {
    PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/assets/workflow.json"))
}

// ---------------------------------------------------------------------------
// Mock ComfyUI
// ---------------------------------------------------------------------------

/// Behaviour of the mock server, measured from when it starts.
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// `GET /queue` answers 503 until this much time has passed.
    pub ready_after: Duration,
    /// After a submission the queue reports a running job for this long.
    /// `None` keeps it running forever.
    pub busy_for: Option<Duration>,
    /// Status code for `POST /prompt`.
    pub submit_status: StatusCode,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            ready_after: Duration::ZERO,
            busy_for: Some(Duration::from_millis(100)),
            submit_status: StatusCode::OK,
        }
    }
}

struct MockState {
    behavior: MockBehavior,
    started: Instant,
    submitted_at: Option<Instant>,
    prompts: Vec<Value>,
}

pub struct MockComfyUI {
    pub url: String,
    pub port: u16,
    state: Arc<Mutex<MockState>>,
}

impl MockComfyUI {
    pub async fn start(behavior: MockBehavior) -> Self {
        let state = Arc::new(Mutex::new(MockState {
            behavior,
            started: Instant::now(),
            submitted_at: None,
            prompts: Vec::new(),
        }));

        let app = Router::new()
            .route("/queue", get(queue))
            .route("/prompt", post(prompt))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{addr}"),
            port: addr.port(),
            state,
        }
    }

    /// Bodies received on `POST /prompt`, in order.
    pub fn prompts(&self) -> Vec<Value> {
        self.state.lock().unwrap().prompts.clone()
    }
}

async fn queue(State(state): State<Arc<Mutex<MockState>>>) -> (StatusCode, Json<Value>) {
    let s = state.lock().unwrap();
    if s.started.elapsed() < s.behavior.ready_after {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({})));
    }

    let busy = match (s.submitted_at, s.behavior.busy_for) {
        (Some(at), Some(busy_for)) => at.elapsed() < busy_for,
        (Some(_), None) => true,
        (None, _) => false,
    };

    let running = if busy {
        json!([[0, "mock-prompt", {}, {}, ["10", "24"]]])
    } else {
        json!([])
    };
    (
        StatusCode::OK,
        Json(json!({"queue_running": running, "queue_pending": []})),
    )
}

async fn prompt(
    State(state): State<Arc<Mutex<MockState>>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let mut s = state.lock().unwrap();
    s.prompts.push(body);
    let status = s.behavior.submit_status;
    if !status.is_success() {
        return (status, Json(json!({"error": "prompt rejected"})));
    }
    s.submitted_at = Some(Instant::now());
    (
        status,
        Json(json!({"prompt_id": "mock-prompt", "number": 0, "node_errors": {}})),
    )
}

// ---------------------------------------------------------------------------
// Stand-in server process
// ---------------------------------------------------------------------------

/// A shell loop that writes `marker` when it receives SIGINT, so tests can
/// tell the server was stopped gracefully.
pub fn stand_in_server(marker: &Path) -> ServerCommand {
    let script = format!(
        "trap 'echo stopped > \"{}\"; exit 0' INT; while true; do sleep 0.1; done",
        marker.display()
    );
    ServerCommand {
        program: "sh".to_string(),
        args: vec!["-c".to_string(), script],
    }
}

/// Test configuration with millisecond-scale polling.
pub fn test_config(api_url: &str, workflow_path: &Path, marker: &Path) -> EntrypointConfig {
    EntrypointConfig {
        server: stand_in_server(marker),
        api_url: api_url.to_string(),
        workflow_path: workflow_path.to_path_buf(),
        readiness: PollConfig {
            interval: Duration::from_millis(20),
            deadline: Duration::from_secs(2),
        },
        completion: PollConfig {
            interval: Duration::from_millis(20),
            deadline: Duration::from_secs(3),
        },
        // Long enough for the stand-in shell to install its trap.
        settle_delay: Duration::from_millis(200),
        request_timeout: Duration::from_millis(500),
        stop_timeout: Duration::from_secs(5),
    }
}

/// Environment lookup backed by a fixed list of pairs.
pub fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let pairs: Vec<(String, String)> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |var: &str| {
        pairs
            .iter()
            .find(|(k, _)| k == var)
            .map(|(_, v)| v.clone())
    }
}
