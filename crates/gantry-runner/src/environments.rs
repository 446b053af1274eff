//! Workspace lifecycle and provisioner routing.

use async_trait::async_trait;
use gantry_core::environment::{
    EnvironmentHandle, EnvironmentKind, ExecutionResult, PreparedStep, ProvisionRequest,
};
use gantry_core::pipeline::EnvironmentDescriptor;
use gantry_core::ports::EnvironmentProvisioner;
use gantry_core::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Create a fresh, empty workspace and return its absolute path. Leftovers
/// from an earlier attempt of the same job are removed first.
pub async fn prepare_workspace(workspace: &Path) -> Result<PathBuf> {
    info!(workspace = %workspace.display(), "Preparing workspace");
    match tokio::fs::remove_dir_all(workspace).await {
        Ok(()) => debug!(workspace = %workspace.display(), "Removed stale workspace"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(Error::Provisioning(format!(
                "failed to clear workspace {}: {e}",
                workspace.display()
            )));
        }
    }
    tokio::fs::create_dir_all(workspace).await.map_err(|e| {
        Error::Provisioning(format!(
            "failed to create workspace {}: {e}",
            workspace.display()
        ))
    })?;
    // Steps run inside the workspace, so relative roots would resolve twice.
    std::path::absolute(workspace).map_err(|e| {
        Error::Provisioning(format!(
            "failed to resolve workspace {}: {e}",
            workspace.display()
        ))
    })
}

/// Remove a workspace. A workspace that is already gone is not an error.
pub async fn remove_workspace(workspace: &Path) -> Result<()> {
    info!(workspace = %workspace.display(), "Cleaning up workspace");
    match tokio::fs::remove_dir_all(workspace).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Teardown(format!(
            "failed to remove workspace {}: {e}",
            workspace.display()
        ))),
    }
}

/// Dispatches each job to the provisioner for its environment kind.
pub struct RoutingProvisioner {
    host: Arc<dyn EnvironmentProvisioner>,
    container: Option<Arc<dyn EnvironmentProvisioner>>,
}

impl RoutingProvisioner {
    pub fn new(host: Arc<dyn EnvironmentProvisioner>) -> Self {
        Self {
            host,
            container: None,
        }
    }

    pub fn with_container(mut self, container: Arc<dyn EnvironmentProvisioner>) -> Self {
        self.container = Some(container);
        self
    }

    pub fn has_container_runtime(&self) -> bool {
        self.container.is_some()
    }

    fn for_descriptor(
        &self,
        job: &str,
        descriptor: &EnvironmentDescriptor,
    ) -> Result<&Arc<dyn EnvironmentProvisioner>> {
        match descriptor {
            EnvironmentDescriptor::Host => Ok(&self.host),
            EnvironmentDescriptor::Container { image, .. } => {
                self.container.as_ref().ok_or_else(|| {
                    Error::Provisioning(format!(
                        "job {job} needs image {image} but no container runtime is available"
                    ))
                })
            }
        }
    }

    fn for_handle(&self, handle: &EnvironmentHandle) -> Result<&Arc<dyn EnvironmentProvisioner>> {
        match &handle.kind {
            EnvironmentKind::Host => Ok(&self.host),
            EnvironmentKind::Container { container_id, .. } => {
                self.container.as_ref().ok_or_else(|| {
                    Error::Internal(format!(
                        "container {container_id} has no provisioner to drive it"
                    ))
                })
            }
        }
    }
}

#[async_trait]
impl EnvironmentProvisioner for RoutingProvisioner {
    async fn provision(&self, request: &ProvisionRequest) -> Result<EnvironmentHandle> {
        self.for_descriptor(&request.job, &request.descriptor)?
            .provision(request)
            .await
    }

    async fn execute(
        &self,
        handle: &EnvironmentHandle,
        steps: &[PreparedStep],
    ) -> Result<ExecutionResult> {
        self.for_handle(handle)?.execute(handle, steps).await
    }

    async fn teardown(&self, handle: EnvironmentHandle) -> Result<()> {
        self.for_handle(&handle)?.teardown(handle).await
    }

    async fn abandon(&self, request: &ProvisionRequest) -> Result<()> {
        self.for_descriptor(&request.job, &request.descriptor)?
            .abandon(request)
            .await
    }
}
