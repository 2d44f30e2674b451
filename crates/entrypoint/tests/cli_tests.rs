//! Exit-code tests for the `genrun` binary.
//!
//! The ComfyUI process is stood in for by a shell script launched through
//! `COMFYUI_PYTHON=sh`; the HTTP API is the shared axum mock.

mod common;

use std::path::Path;
use std::process::Output;

use common::{bundled_workflow, MockBehavior, MockComfyUI};

fn write_server_script(dir: &Path) -> std::path::PathBuf {
    let script = dir.join("server.sh");
    std::fs::write(
        &script,
        "trap 'exit 0' INT TERM\nwhile true; do sleep 0.1; done\n",
    )
    .unwrap();
    script
}

async fn run_binary(port: u16, dir: &Path, extra_env: &[(&str, &str)], args: &[&str]) -> Output {
    let script = write_server_script(dir);
    let mut cmd = tokio::process::Command::new(env!("CARGO_BIN_EXE_genrun"));
    cmd.env_clear()
        .env("PATH", std::env::var("PATH").unwrap_or_default())
        .env("COMFYUI_PYTHON", "sh")
        .env("COMFYUI_MAIN", &script)
        .env("COMFYUI_PORT", port.to_string())
        .env("OUTPUT_DIR", dir)
        .env("WORKFLOW_PATH", bundled_workflow())
        .env("READY_TIMEOUT_SECS", "5")
        .env("JOB_TIMEOUT_SECS", "10")
        .env("STOP_TIMEOUT_SECS", "5")
        .current_dir(dir)
        .args(args);
    for (k, v) in extra_env {
        cmd.env(k, v);
    }
    cmd.output().await.expect("binary should run")
}

#[tokio::test]
async fn successful_job_exits_zero() {
    let mock = MockComfyUI::start(MockBehavior::default()).await;
    let dir = tempfile::tempdir().unwrap();

    let output = run_binary(mock.port, dir.path(), &[("SIZE", "512")], &[]).await;

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(mock.prompts().len(), 1);
    assert_eq!(mock.prompts()[0]["prompt"]["22"]["inputs"]["width"], 512);
}

#[tokio::test]
async fn debug_mode_runs_job_and_exits_zero() {
    let mock = MockComfyUI::start(MockBehavior::default()).await;
    let dir = tempfile::tempdir().unwrap();

    let output =
        run_binary(mock.port, dir.path(), &[("DEBUG_MODE", "true")], &["--debug"]).await;

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Resolved job parameters"), "stdout: {stdout}");
    assert_eq!(mock.prompts().len(), 1);
}

#[tokio::test]
async fn invalid_parameter_exits_one() {
    let mock = MockComfyUI::start(MockBehavior::default()).await;
    let dir = tempfile::tempdir().unwrap();

    let output = run_binary(mock.port, dir.path(), &[("FRAMERATE", "30")], &[]).await;

    assert_eq!(output.status.code(), Some(1));
    assert!(mock.prompts().is_empty());
}

#[tokio::test]
async fn workflow_flag_overrides_environment() {
    let mock = MockComfyUI::start(MockBehavior::default()).await;
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.json");

    let output = run_binary(
        mock.port,
        dir.path(),
        &[],
        &["--workflow", missing.to_str().unwrap()],
    )
    .await;

    assert_eq!(output.status.code(), Some(1));
    assert!(mock.prompts().is_empty());
}

#[tokio::test]
async fn malformed_runtime_config_exits_one() {
    let dir = tempfile::tempdir().unwrap();

    let output = run_binary(0, dir.path(), &[("POLL_INTERVAL_SECS", "soon")], &[]).await;

    assert_eq!(output.status.code(), Some(1));
}
