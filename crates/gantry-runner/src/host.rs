//! Provisioner for jobs that run directly on the coordinating host.

use crate::environments::{prepare_workspace, remove_workspace};
use crate::runner::{RunnerConfig, execute_steps};
use crate::shell::ShellRunner;
use async_trait::async_trait;
use gantry_core::environment::{
    EnvironmentHandle, EnvironmentKind, ExecutionResult, PreparedStep, ProvisionRequest,
};
use gantry_core::pipeline::EnvironmentDescriptor;
use gantry_core::ports::EnvironmentProvisioner;
use gantry_core::{Error, Result};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Toolchain override understood by rustup-managed hosts.
pub const TOOLCHAIN_ENV: &str = "RUSTUP_TOOLCHAIN";

/// Runs jobs as shell processes in a per-job directory on the host.
pub struct HostProvisioner {
    config: RunnerConfig,
    shell: ShellRunner,
}

impl HostProvisioner {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            shell: ShellRunner::new(),
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }
}

#[async_trait]
impl EnvironmentProvisioner for HostProvisioner {
    async fn provision(&self, request: &ProvisionRequest) -> Result<EnvironmentHandle> {
        if !matches!(request.descriptor, EnvironmentDescriptor::Host) {
            return Err(Error::Provisioning(format!(
                "host provisioner cannot run {} for job {}",
                request.descriptor.label(),
                request.job
            )));
        }

        let workspace = self.config.workspace_for(request.invocation, &request.job);
        let workspace = prepare_workspace(&workspace).await?;

        info!(
            job = %request.job,
            channel = %request.channel,
            workspace = %workspace.display(),
            "Provisioned host environment"
        );

        Ok(EnvironmentHandle {
            job: request.job.clone(),
            kind: EnvironmentKind::Host,
            workspace,
            env: BTreeMap::from([(
                TOOLCHAIN_ENV.to_string(),
                request.channel.as_str().to_string(),
            )]),
        })
    }

    async fn execute(
        &self,
        handle: &EnvironmentHandle,
        steps: &[PreparedStep],
    ) -> Result<ExecutionResult> {
        execute_steps(&self.shell, handle, steps, self.config.diagnostic_lines).await
    }

    async fn teardown(&self, handle: EnvironmentHandle) -> Result<()> {
        if self.config.keep_workspaces {
            debug!(job = %handle.job, workspace = %handle.workspace.display(), "Keeping workspace");
            return Ok(());
        }
        remove_workspace(&handle.workspace).await
    }

    async fn abandon(&self, request: &ProvisionRequest) -> Result<()> {
        if self.config.keep_workspaces {
            return Ok(());
        }
        let workspace = self.config.workspace_for(request.invocation, &request.job);
        remove_workspace(&workspace).await
    }
}
