//! Output capture shared by every provisioner.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gantry_core::Result;
use gantry_core::environment::{EnvironmentHandle, ExecutionResult, PreparedStep, StepOutcome};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{info, trace, warn};

/// Number of trailing output lines kept per job for diagnostics.
pub const DEFAULT_DIAGNOSTIC_LINES: usize = 50;

/// A line of output from a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub content: String,
    pub line_number: u32,
    pub timestamp: DateTime<Utc>,
}

impl OutputLine {
    pub fn new(stream: OutputStream, content: impl Into<String>, line_number: u32) -> Self {
        Self {
            stream,
            content: content.into(),
            line_number,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Bounded buffer holding the last lines a job printed.
#[derive(Debug, Clone)]
pub struct OutputTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl OutputTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn push(&mut self, step: &str, line: &OutputLine) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        let marker = match line.stream {
            OutputStream::Stdout => "",
            OutputStream::Stderr => "!",
        };
        self.lines
            .push_back(format!("[{step}]{marker} {}", line.content));
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines.into()
    }
}

impl Default for OutputTail {
    fn default() -> Self {
        Self::new(DEFAULT_DIAGNOSTIC_LINES)
    }
}

/// Runs a single prepared step inside a provisioned environment.
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Run the step to completion and return its exit code. Output lines are
    /// sent to `output_tx` as they are produced.
    async fn run_step(
        &self,
        handle: &EnvironmentHandle,
        step: &PreparedStep,
        output_tx: mpsc::Sender<OutputLine>,
    ) -> Result<i32>;
}

/// Run steps in order through `runner`, stopping at the first failing step
/// that does not continue on error.
pub async fn execute_steps(
    runner: &dyn StepRunner,
    handle: &EnvironmentHandle,
    steps: &[PreparedStep],
    diagnostic_lines: usize,
) -> Result<ExecutionResult> {
    let started = Instant::now();
    let mut tail = OutputTail::new(diagnostic_lines);
    let mut outcomes = Vec::with_capacity(steps.len());
    let mut failed_step = None;

    for step in steps {
        info!(job = %handle.job, step = %step.name, "Running step");
        let step_started = Instant::now();

        let (tx, mut rx) = mpsc::channel::<OutputLine>(256);
        let collect = async {
            while let Some(line) = rx.recv().await {
                trace!(job = %handle.job, step = %step.name, line = %line.content);
                tail.push(&step.name, &line);
            }
        };
        let (exit_code, ()) = tokio::join!(runner.run_step(handle, step, tx), collect);
        let exit_code = exit_code?;

        outcomes.push(StepOutcome {
            name: step.name.clone(),
            exit_code,
            duration_ms: step_started.elapsed().as_millis() as u64,
        });

        if exit_code != 0 {
            if step.continue_on_error {
                warn!(job = %handle.job, step = %step.name, exit_code, "Step failed, continuing");
            } else {
                warn!(job = %handle.job, step = %step.name, exit_code, "Step failed");
                failed_step = Some(step.name.clone());
                break;
            }
        }
    }

    Ok(ExecutionResult::from_steps(
        outcomes,
        failed_step,
        tail.into_lines(),
        started.elapsed().as_millis() as u64,
    ))
}

/// Settings shared by the host and container provisioners.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Per-job workspaces are created under `<root>/<invocation>/<job>`.
    pub workspace_root: PathBuf,
    /// Leave workspaces on disk after teardown.
    pub keep_workspaces: bool,
    pub diagnostic_lines: usize,
}

impl RunnerConfig {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            keep_workspaces: false,
            diagnostic_lines: DEFAULT_DIAGNOSTIC_LINES,
        }
    }

    pub fn keep_workspaces(mut self, keep: bool) -> Self {
        self.keep_workspaces = keep;
        self
    }

    pub fn workspace_for(&self, invocation: impl std::fmt::Display, job: &str) -> PathBuf {
        self.workspace_root
            .join(invocation.to_string())
            .join(sanitize_segment(job))
    }
}

/// Job names become directory names; keep them to one safe path segment.
fn sanitize_segment(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => format!("_{cleaned}"),
        _ => cleaned,
    }
}
