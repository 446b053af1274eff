//! Shell-based step execution on the host.

use crate::runner::{OutputLine, OutputStream, StepRunner};
use async_trait::async_trait;
use gantry_core::environment::{EnvironmentHandle, PreparedStep};
use gantry_core::{Error, Result};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::debug;

/// Runs each step as `sh -c <command>` inside the handle's workspace.
///
/// The child is killed if the returned future is dropped, which is how job
/// timeouts reach running processes.
#[derive(Debug, Clone, Default)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }
}

fn stream_lines<R>(
    reader: R,
    stream: OutputStream,
    tx: mpsc::Sender<OutputLine>,
) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let mut line_num = 0u32;
        while let Ok(Some(line)) = lines.next_line().await {
            line_num += 1;
            if tx.send(OutputLine::new(stream, line, line_num)).await.is_err() {
                break;
            }
        }
    })
}

#[async_trait]
impl StepRunner for ShellRunner {
    async fn run_step(
        &self,
        handle: &EnvironmentHandle,
        step: &PreparedStep,
        output_tx: mpsc::Sender<OutputLine>,
    ) -> Result<i32> {
        debug!(step = %step.name, command = %step.command, "Executing shell command");

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&step.command)
            .current_dir(&handle.workspace)
            .envs(&step.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Internal(format!("failed to spawn step {}: {e}", step.name)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("child stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Internal("child stderr was not captured".to_string()))?;

        let stdout_handle = stream_lines(stdout, OutputStream::Stdout, output_tx.clone());
        let stderr_handle = stream_lines(stderr, OutputStream::Stderr, output_tx);

        let status = child
            .wait()
            .await
            .map_err(|e| Error::Internal(format!("failed to wait for step {}: {e}", step.name)))?;

        let _ = stdout_handle.await;
        let _ = stderr_handle.await;

        // Killed by a signal.
        Ok(status.code().unwrap_or(-1))
    }
}
