//! ComfyUI server process lifecycle.
//!
//! [`ComfyUIServer::start`] spawns the server as a child process and
//! [`ComfyUIServer::stop`] interrupts it (SIGINT, like Ctrl-C) and waits
//! for it to exit. A server that dies on its own is not restarted.

use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::{Child, Command};

/// Default grace period between SIGINT and a hard kill.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Program and arguments used to launch the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ServerCommand {
    /// `python main.py --listen <host> --port <port> --output-directory <dir>`.
    pub fn comfyui(
        python: &str,
        main_script: &str,
        listen_host: &str,
        port: u16,
        output_dir: &str,
    ) -> Self {
        Self {
            program: python.to_string(),
            args: vec![
                main_script.to_string(),
                "--listen".to_string(),
                listen_host.to_string(),
                "--port".to_string(),
                port.to_string(),
                "--output-directory".to_string(),
                output_dir.to_string(),
            ],
        }
    }
}

/// Errors from launching or stopping the server process.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed waiting for server exit: {0}")]
    Wait(#[source] std::io::Error),
}

/// Exclusive owner of the running server process.
pub struct ComfyUIServer {
    /// `None` once the server has been stopped.
    child: Option<Child>,
    stop_timeout: Duration,
}

impl ComfyUIServer {
    /// Spawn the server. Its stdout/stderr are inherited.
    ///
    /// The child is spawned with `kill_on_drop(true)` so dropping the
    /// handle without calling [`stop`](Self::stop) still kills it.
    pub fn start(command: &ServerCommand, stop_timeout: Duration) -> Result<Self, LaunchError> {
        let child = Command::new(&command.program)
            .args(&command.args)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        tracing::info!(
            pid = child.id(),
            program = %command.program,
            args = ?command.args,
            "Started ComfyUI server",
        );

        Ok(Self {
            child: Some(child),
            stop_timeout,
        })
    }

    /// OS process id, if the server has not been stopped.
    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// True until [`stop`](Self::stop) has been called.
    pub fn is_started(&self) -> bool {
        self.child.is_some()
    }

    /// Interrupt the server and wait for it to exit.
    ///
    /// Idempotent: returns `Ok(None)` when there is nothing to stop. If
    /// the process ignores SIGINT for longer than the stop timeout it is
    /// killed.
    pub async fn stop(&mut self) -> Result<Option<ExitStatus>, LaunchError> {
        let Some(mut child) = self.child.take() else {
            return Ok(None);
        };

        let pid = child.id();
        tracing::info!(pid, "Stopping ComfyUI server");

        if let Err(e) = interrupt(&mut child) {
            // Typically the process already exited; wait() below reaps it.
            tracing::warn!(pid, error = %e, "Failed to interrupt ComfyUI server");
        }

        let status = match tokio::time::timeout(self.stop_timeout, child.wait()).await {
            Ok(result) => result.map_err(LaunchError::Wait)?,
            Err(_) => {
                tracing::warn!(
                    pid,
                    timeout_ms = self.stop_timeout.as_millis() as u64,
                    "ComfyUI server ignored interrupt, killing",
                );
                child.kill().await.map_err(LaunchError::Wait)?;
                child.wait().await.map_err(LaunchError::Wait)?
            }
        };

        tracing::info!(pid, ?status, "ComfyUI server stopped");
        Ok(Some(status))
    }
}

/// Send SIGINT to the child.
#[cfg(unix)]
fn interrupt(child: &mut Child) -> std::io::Result<()> {
    let Some(pid) = child.id() else {
        return Ok(());
    };
    // Safety: kill(2) has no memory-safety preconditions.
    let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn interrupt(child: &mut Child) -> std::io::Result<()> {
    child.start_kill()
}
