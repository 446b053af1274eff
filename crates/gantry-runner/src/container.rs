//! Container-based environments using Docker.
//!
//! Each job gets a long-lived container running `sleep infinity` with the
//! host workspace bind-mounted at `/workspace`. Bootstrap commands and steps
//! run through `docker exec`, so the filesystem persists across steps.

use crate::environments::{prepare_workspace, remove_workspace};
use crate::host::TOOLCHAIN_ENV;
use crate::runner::{OutputLine, OutputStream, RunnerConfig, StepRunner, execute_steps};
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use futures::StreamExt;
use gantry_core::environment::{
    CONTAINER_WORKSPACE, EnvironmentHandle, EnvironmentKind, ExecutionResult, PreparedStep,
    ProvisionRequest,
};
use gantry_core::ids::JobRunId;
use gantry_core::pipeline::EnvironmentDescriptor;
use gantry_core::ports::EnvironmentProvisioner;
use gantry_core::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Split an image reference into the `fromImage` and `tag` the pull API
/// expects. An empty tag would pull every tag, so untagged images get
/// `latest`. Digest references are passed through whole.
pub fn split_image_reference(image: &str) -> (String, String) {
    if image.contains('@') {
        return (image.to_string(), String::new());
    }
    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[name_start..].rfind(':') {
        Some(i) => {
            let split = name_start + i;
            (image[..split].to_string(), image[split + 1..].to_string())
        }
        None => (image.to_string(), "latest".to_string()),
    }
}

/// Name of the container provisioned for a job run.
pub fn container_name(run: JobRunId) -> String {
    format!("gantry-{}", run.as_uuid())
}

/// Provisions one Docker container per job.
pub struct ContainerProvisioner {
    docker: Docker,
    config: RunnerConfig,
    pull_images: bool,
}

impl ContainerProvisioner {
    /// Connect to the local Docker daemon.
    pub fn connect(config: RunnerConfig) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::Provisioning(format!("failed to connect to Docker: {e}")))?;
        Ok(Self::with_docker(docker, config))
    }

    /// Create with an existing Docker client.
    pub fn with_docker(docker: Docker, config: RunnerConfig) -> Self {
        Self {
            docker,
            config,
            pull_images: true,
        }
    }

    /// Skip pulling and rely on images already present on the daemon.
    pub fn pull_images(mut self, pull: bool) -> Self {
        self.pull_images = pull;
        self
    }

    /// Check that the daemon answers.
    pub async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| Error::Provisioning(format!("Docker is not reachable: {e}")))
    }

    async fn pull(&self, image: &str) -> Result<()> {
        let (from_image, tag) = split_image_reference(image);
        info!(image = %image, "Pulling image");
        let options = CreateImageOptions {
            from_image,
            tag,
            ..Default::default()
        };
        let mut progress = self.docker.create_image(Some(options), None, None);
        while let Some(status) = progress.next().await {
            status.map_err(|e| Error::Provisioning(format!("failed to pull {image}: {e}")))?;
        }
        Ok(())
    }

    async fn start_container(
        &self,
        request: &ProvisionRequest,
        image: &str,
        workspace: &Path,
        env: &BTreeMap<String, String>,
    ) -> Result<String> {
        let name = container_name(request.run);
        let labels = HashMap::from([
            ("gantry.invocation".to_string(), request.invocation.to_string()),
            ("gantry.job".to_string(), request.job.clone()),
        ]);

        let container_config = Config {
            image: Some(image.to_string()),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            env: Some(env.iter().map(|(k, v)| format!("{k}={v}")).collect()),
            working_dir: Some(CONTAINER_WORKSPACE.to_string()),
            labels: Some(labels),
            host_config: Some(bollard::models::HostConfig {
                binds: Some(vec![format!(
                    "{}:{CONTAINER_WORKSPACE}",
                    workspace.display()
                )]),
                auto_remove: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.as_str(),
                    platform: None,
                }),
                container_config,
            )
            .await
            .map_err(|e| Error::Provisioning(format!("failed to create container: {e}")))?;

        if let Err(e) = self
            .docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
        {
            self.remove_container(&created.id).await;
            return Err(Error::Provisioning(format!(
                "failed to start container: {e}"
            )));
        }

        debug!(container = %created.id, name = %name, "Container started");
        Ok(created.id)
    }

    async fn remove_container(&self, container_id: &str) {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        if let Err(e) = self
            .docker
            .remove_container(container_id, Some(options))
            .await
        {
            warn!(container = %container_id, error = %e, "Failed to remove container");
        }
    }

    /// Run `sh -c <command>` in the container and return its exit code.
    async fn exec(
        &self,
        container_id: &str,
        command: &str,
        env: &BTreeMap<String, String>,
        output_tx: mpsc::Sender<OutputLine>,
    ) -> Result<i32> {
        let exec = self
            .docker
            .create_exec(
                container_id,
                CreateExecOptions {
                    cmd: Some(vec![
                        "sh".to_string(),
                        "-c".to_string(),
                        command.to_string(),
                    ]),
                    env: Some(env.iter().map(|(k, v)| format!("{k}={v}")).collect()),
                    working_dir: Some(CONTAINER_WORKSPACE.to_string()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Error::Internal(format!("failed to create exec: {e}")))?;

        let started = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| Error::Internal(format!("failed to start exec: {e}")))?;

        if let StartExecResults::Attached { mut output, .. } = started {
            let mut stdout_line_num = 0u32;
            let mut stderr_line_num = 0u32;
            while let Some(chunk) = output.next().await {
                let (stream, message, counter) = match chunk {
                    Ok(LogOutput::StdOut { message }) => {
                        (OutputStream::Stdout, message, &mut stdout_line_num)
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        (OutputStream::Stderr, message, &mut stderr_line_num)
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(container = %container_id, error = %e, "Error reading exec output");
                        break;
                    }
                };
                for line in String::from_utf8_lossy(&message).lines() {
                    *counter += 1;
                    // A closed receiver only means nobody wants the output.
                    let _ = output_tx
                        .send(OutputLine::new(stream, line, *counter))
                        .await;
                }
            }
        }

        let inspected = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| Error::Internal(format!("failed to inspect exec: {e}")))?;
        Ok(inspected.exit_code.map(|code| code as i32).unwrap_or(-1))
    }

    async fn bootstrap(
        &self,
        container_id: &str,
        job: &str,
        commands: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<()> {
        for command in commands {
            info!(job = %job, command = %command, "Bootstrapping container");
            let (tx, mut rx) = mpsc::channel::<OutputLine>(256);
            let mut last_lines = Vec::new();
            let collect = async {
                while let Some(line) = rx.recv().await {
                    debug!(job = %job, line = %line.content, "bootstrap");
                    last_lines.push(line.content);
                }
            };
            let (code, ()) = tokio::join!(self.exec(container_id, command, env, tx), collect);
            match code {
                Ok(0) => {}
                Ok(code) => {
                    let tail = last_lines.len().saturating_sub(5);
                    return Err(Error::Provisioning(format!(
                        "bootstrap command `{command}` exited with {code}: {}",
                        last_lines[tail..].join(" | ")
                    )));
                }
                Err(e) => {
                    return Err(Error::Provisioning(format!(
                        "bootstrap command `{command}` failed: {e}"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StepRunner for ContainerProvisioner {
    async fn run_step(
        &self,
        handle: &EnvironmentHandle,
        step: &PreparedStep,
        output_tx: mpsc::Sender<OutputLine>,
    ) -> Result<i32> {
        let EnvironmentKind::Container { container_id, .. } = &handle.kind else {
            return Err(Error::Internal(format!(
                "job {} is not running in a container",
                handle.job
            )));
        };
        self.exec(container_id, &step.command, &step.env, output_tx)
            .await
    }
}

#[async_trait]
impl EnvironmentProvisioner for ContainerProvisioner {
    async fn provision(&self, request: &ProvisionRequest) -> Result<EnvironmentHandle> {
        let EnvironmentDescriptor::Container {
            image, bootstrap, ..
        } = &request.descriptor
        else {
            return Err(Error::Provisioning(format!(
                "container provisioner cannot run {} for job {}",
                request.descriptor.label(),
                request.job
            )));
        };

        let workspace = self.config.workspace_for(request.invocation, &request.job);
        let workspace = prepare_workspace(&workspace).await?;

        let env = BTreeMap::from([(
            TOOLCHAIN_ENV.to_string(),
            request.channel.as_str().to_string(),
        )]);

        let started = async {
            if self.pull_images {
                self.pull(image).await?;
            }
            self.start_container(request, image, &workspace, &env).await
        }
        .await;
        let container_id = match started {
            Ok(id) => id,
            Err(e) => {
                let _ = remove_workspace(&workspace).await;
                return Err(e);
            }
        };

        if let Err(e) = self
            .bootstrap(&container_id, &request.job, bootstrap, &env)
            .await
        {
            self.remove_container(&container_id).await;
            let _ = remove_workspace(&workspace).await;
            return Err(e);
        }

        info!(
            job = %request.job,
            image = %image,
            container = %container_id,
            variant = ?request.descriptor.variant(),
            "Provisioned container environment"
        );

        Ok(EnvironmentHandle {
            job: request.job.clone(),
            kind: EnvironmentKind::Container {
                container_id,
                image: image.clone(),
            },
            workspace,
            env,
        })
    }

    async fn execute(
        &self,
        handle: &EnvironmentHandle,
        steps: &[PreparedStep],
    ) -> Result<ExecutionResult> {
        execute_steps(self, handle, steps, self.config.diagnostic_lines).await
    }

    async fn teardown(&self, handle: EnvironmentHandle) -> Result<()> {
        if let EnvironmentKind::Container { container_id, .. } = &handle.kind {
            let options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };
            self.docker
                .remove_container(container_id, Some(options))
                .await
                .map_err(|e| {
                    Error::Teardown(format!("failed to remove container {container_id}: {e}"))
                })?;
            debug!(container = %container_id, "Container removed");
        }
        if self.config.keep_workspaces {
            return Ok(());
        }
        remove_workspace(&handle.workspace).await
    }

    async fn abandon(&self, request: &ProvisionRequest) -> Result<()> {
        let name = container_name(request.run);
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(&name, Some(options)).await {
            Ok(()) => info!(job = %request.job, container = %name, "Removed abandoned container"),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(e) => {
                return Err(Error::Teardown(format!(
                    "failed to remove container {name}: {e}"
                )));
            }
        }
        if self.config.keep_workspaces {
            return Ok(());
        }
        let workspace = self.config.workspace_for(request.invocation, &request.job);
        remove_workspace(&workspace).await
    }
}
