//! Types exchanged with environment provisioners.

use crate::ids::{InvocationId, JobRunId};
use crate::pipeline::EnvironmentDescriptor;
use crate::trigger::ToolchainChannel;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Mount point of the job workspace inside container environments.
pub const CONTAINER_WORKSPACE: &str = "/workspace";

/// Workspace-relative directory where consumed artifacts are staged.
pub const STAGED_ARTIFACTS_DIR: &str = ".gantry/artifacts";

/// Request to prepare an isolated environment for one job run.
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub invocation: InvocationId,
    pub run: JobRunId,
    pub job: String,
    pub descriptor: EnvironmentDescriptor,
    /// Toolchain channel after applying the descriptor's selection.
    pub channel: ToolchainChannel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EnvironmentKind {
    Host,
    Container { container_id: String, image: String },
}

/// A provisioned environment. Must be passed back to `teardown`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentHandle {
    pub job: String,
    pub kind: EnvironmentKind,
    /// Workspace directory on the coordinating host. Container environments
    /// mount it at their own working directory.
    pub workspace: PathBuf,
    /// Variables the environment itself contributes to every step.
    pub env: BTreeMap<String, String>,
}

impl EnvironmentHandle {
    /// Workspace path as steps see it.
    pub fn step_workspace(&self) -> String {
        match &self.kind {
            EnvironmentKind::Host => self.workspace.display().to_string(),
            EnvironmentKind::Container { .. } => CONTAINER_WORKSPACE.to_string(),
        }
    }

    /// Host path where consumed artifacts are written before steps run.
    pub fn staged_artifacts(&self) -> PathBuf {
        self.workspace.join(STAGED_ARTIFACTS_DIR)
    }
}

/// A step with templates already interpolated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedStep {
    pub name: String,
    pub command: String,
    pub env: BTreeMap<String, String>,
    pub continue_on_error: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub name: String,
    pub exit_code: i32,
    pub duration_ms: u64,
}

impl StepOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Result of executing a job's steps inside an environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub exit_code: i32,
    /// First step that failed without `continue_on_error`.
    pub failed_step: Option<String>,
    pub steps: Vec<StepOutcome>,
    /// Last lines of combined output, for diagnostics.
    pub diagnostics: Vec<String>,
    pub duration_ms: u64,
}

impl ExecutionResult {
    /// Fold step outcomes into a job result. Stops counting at the first
    /// failing step that does not continue on error.
    pub fn from_steps(
        steps: Vec<StepOutcome>,
        failed_step: Option<String>,
        diagnostics: Vec<String>,
        duration_ms: u64,
    ) -> Self {
        let exit_code = failed_step
            .as_ref()
            .and_then(|name| steps.iter().find(|s| &s.name == name))
            .map(|s| s.exit_code)
            .unwrap_or(0);
        Self {
            success: failed_step.is_none(),
            exit_code,
            failed_step,
            steps,
            diagnostics,
            duration_ms,
        }
    }
}
