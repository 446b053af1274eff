//! Test doubles for scheduler integration tests.
//!
//! `FakeProvisioner` interprets a tiny command language instead of spawning
//! processes, so tests can script step outcomes and observe what the
//! scheduler asked for:
//!
//! - `exit N` fails the step with code N
//! - `write <path> <text>` writes a workspace file
//! - `read <path>` records the bytes of a workspace file
//! - `nap <ms>` sleeps
//! - `hang` never finishes
//! - `panic` panics the worker
//! - anything else succeeds
//!
//! It also tracks which environments are live, so tests can check that
//! every provisioned environment was released.

#![allow(dead_code)]

use async_trait::async_trait;
use gantry_artifacts::InMemoryArtifactStore;
use gantry_core::artifact::{ArtifactHandle, ArtifactScope};
use gantry_core::environment::{
    EnvironmentHandle, EnvironmentKind, ExecutionResult, PreparedStep, ProvisionRequest,
    StepOutcome,
};
use gantry_core::events::Event;
use gantry_core::pipeline::{EnvironmentDescriptor, PipelineDefinition, ReleaseConfig};
use gantry_core::ids::InvocationId;
use gantry_core::ports::{
    ArtifactStore, EnvironmentProvisioner, ReleasePublisher, ReleaseReference, ReleaseRequest,
};
use gantry_core::trigger::TriggerEvent;
use gantry_core::{Error, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Provision(String),
    ExecuteStarted(String),
    ExecuteFinished(String),
    Teardown(String),
    Abandon(String),
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    steps: HashMap<String, Vec<PreparedStep>>,
    reads: HashMap<String, Vec<u8>>,
    provision_failures: HashMap<String, u32>,
    provision_hangs: HashMap<String, u32>,
    live: HashSet<String>,
    running: usize,
    max_running: usize,
}

pub struct FakeProvisioner {
    root: TempDir,
    state: Mutex<State>,
}

impl FakeProvisioner {
    pub fn new() -> Self {
        Self {
            root: TempDir::new().unwrap(),
            state: Mutex::new(State::default()),
        }
    }

    /// Fail the next `times` provisioning attempts of `job`.
    pub fn fail_provisioning(&self, job: &str, times: u32) {
        self.state
            .lock()
            .unwrap()
            .provision_failures
            .insert(job.to_string(), times);
    }

    /// Acquire an environment for `job`, then never finish provisioning,
    /// for the next `times` attempts.
    pub fn hang_provisioning(&self, job: &str, times: u32) {
        self.state
            .lock()
            .unwrap()
            .provision_hangs
            .insert(job.to_string(), times);
    }

    /// Environments acquired and not yet torn down or abandoned.
    pub fn live_environments(&self) -> usize {
        self.state.lock().unwrap().live.len()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    pub fn provision_attempts(&self, job: &str) -> usize {
        self.count(&Call::Provision(job.to_string()))
    }

    /// Steps as prepared for the last execution of `job`.
    pub fn steps(&self, job: &str) -> Vec<PreparedStep> {
        self.state
            .lock()
            .unwrap()
            .steps
            .get(job)
            .cloned()
            .unwrap_or_default()
    }

    pub fn step_env(&self, job: &str) -> BTreeMap<String, String> {
        self.steps(job)
            .into_iter()
            .next()
            .map(|s| s.env)
            .unwrap_or_default()
    }

    pub fn read_by(&self, job: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().reads.get(job).cloned()
    }

    pub fn max_running(&self) -> usize {
        self.state.lock().unwrap().max_running
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn run_command(&self, handle: &EnvironmentHandle, command: &str) -> StepAction {
        let mut words = command.splitn(3, ' ');
        match (words.next(), words.next(), words.next()) {
            (Some("exit"), Some(code), _) => StepAction::Exit(code.parse().unwrap()),
            (Some("write"), Some(path), text) => {
                let path = handle.workspace.join(path);
                std::fs::create_dir_all(path.parent().unwrap()).unwrap();
                std::fs::write(path, text.unwrap_or_default()).unwrap();
                StepAction::Exit(0)
            }
            (Some("read"), Some(path), _) => {
                let data = std::fs::read(handle.workspace.join(path)).unwrap();
                self.state
                    .lock()
                    .unwrap()
                    .reads
                    .insert(handle.job.clone(), data);
                StepAction::Exit(0)
            }
            (Some("nap"), Some(ms), _) => StepAction::Nap(ms.parse().unwrap()),
            (Some("hang"), _, _) => StepAction::Hang,
            (Some("panic"), _, _) => panic!("step asked to panic"),
            _ => StepAction::Exit(0),
        }
    }
}

enum StepAction {
    Exit(i32),
    Nap(u64),
    Hang,
}

#[async_trait]
impl EnvironmentProvisioner for FakeProvisioner {
    async fn provision(&self, request: &ProvisionRequest) -> Result<EnvironmentHandle> {
        self.record(Call::Provision(request.job.clone()));
        let hang = {
            let mut state = self.state.lock().unwrap();
            if let Some(remaining) = state.provision_failures.get_mut(&request.job)
                && *remaining > 0
            {
                *remaining -= 1;
                return Err(Error::Provisioning(format!(
                    "no capacity for {}",
                    request.job
                )));
            }
            state.live.insert(request.job.clone());
            match state.provision_hangs.get_mut(&request.job) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let workspace: PathBuf = self
            .root
            .path()
            .join(request.invocation.to_string())
            .join(&request.job);
        std::fs::create_dir_all(&workspace).unwrap();

        let kind = match &request.descriptor {
            EnvironmentDescriptor::Host => EnvironmentKind::Host,
            EnvironmentDescriptor::Container { image, .. } => EnvironmentKind::Container {
                container_id: format!("fake-{}", request.run),
                image: image.clone(),
            },
        };
        Ok(EnvironmentHandle {
            job: request.job.clone(),
            kind,
            workspace,
            env: BTreeMap::from([(
                "RUSTUP_TOOLCHAIN".to_string(),
                request.channel.to_string(),
            )]),
        })
    }

    async fn execute(
        &self,
        handle: &EnvironmentHandle,
        steps: &[PreparedStep],
    ) -> Result<ExecutionResult> {
        self.record(Call::ExecuteStarted(handle.job.clone()));
        {
            let mut state = self.state.lock().unwrap();
            state.steps.insert(handle.job.clone(), steps.to_vec());
            state.running += 1;
            state.max_running = state.max_running.max(state.running);
        }

        let mut outcomes = vec![];
        let mut failed_step = None;
        for step in steps {
            let exit_code = match self.run_command(handle, &step.command) {
                StepAction::Exit(code) => code,
                StepAction::Nap(ms) => {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    0
                }
                StepAction::Hang => std::future::pending().await,
            };
            outcomes.push(StepOutcome {
                name: step.name.clone(),
                exit_code,
                duration_ms: 0,
            });
            if exit_code != 0 && !step.continue_on_error {
                failed_step = Some(step.name.clone());
                break;
            }
        }

        self.state.lock().unwrap().running -= 1;
        self.record(Call::ExecuteFinished(handle.job.clone()));
        Ok(ExecutionResult::from_steps(outcomes, failed_step, vec![], 0))
    }

    async fn teardown(&self, handle: EnvironmentHandle) -> Result<()> {
        self.record(Call::Teardown(handle.job.clone()));
        self.state.lock().unwrap().live.remove(&handle.job);
        Ok(())
    }

    async fn abandon(&self, request: &ProvisionRequest) -> Result<()> {
        self.record(Call::Abandon(request.job.clone()));
        self.state.lock().unwrap().live.remove(&request.job);
        Ok(())
    }
}

/// In-memory store that fails to publish one artifact name.
pub struct RefusingStore {
    inner: InMemoryArtifactStore,
    refused: String,
}

impl RefusingStore {
    pub fn refusing(name: &str) -> Self {
        Self {
            inner: InMemoryArtifactStore::new(),
            refused: name.to_string(),
        }
    }

    pub fn inner(&self) -> &InMemoryArtifactStore {
        &self.inner
    }
}

#[async_trait]
impl ArtifactStore for RefusingStore {
    async fn publish(
        &self,
        scope: ArtifactScope,
        name: &str,
        data: Vec<u8>,
    ) -> Result<ArtifactHandle> {
        if name == self.refused {
            return Err(Error::ArtifactStore(format!("disk full writing {name}")));
        }
        self.inner.publish(scope, name, data).await
    }

    async fn fetch(&self, scope: ArtifactScope, name: &str) -> Result<Vec<u8>> {
        self.inner.fetch(scope, name).await
    }

    async fn list(&self, invocation: InvocationId) -> Result<Vec<ArtifactHandle>> {
        self.inner.list(invocation).await
    }

    async fn expire(&self, invocation: InvocationId) -> Result<usize> {
        self.inner.expire(invocation).await
    }

    async fn discard(&self, scope: ArtifactScope) -> Result<usize> {
        self.inner.discard(scope).await
    }
}

/// Publisher that records every request and can be told to fail.
#[derive(Default)]
pub struct RecordingPublisher {
    fail: bool,
    requests: Mutex<Vec<ReleaseRequest>>,
}

impl RecordingPublisher {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn requests(&self) -> Vec<ReleaseRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReleasePublisher for RecordingPublisher {
    fn name(&self) -> &str {
        "recording"
    }

    async fn publish(&self, request: &ReleaseRequest) -> Result<ReleaseReference> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail {
            return Err(Error::Release("registry unavailable".to_string()));
        }
        Ok(ReleaseReference {
            reference: format!("releases/{}", request.tag),
        })
    }
}

pub fn drain(rx: &mut mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
    let mut events = vec![];
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn push() -> TriggerEvent {
    TriggerEvent::Push { branch: None }
}

pub fn release(tag: &str) -> TriggerEvent {
    TriggerEvent::ReleasePublished {
        tag: tag.to_string(),
    }
}

pub fn pipeline(
    jobs: Vec<gantry_core::pipeline::JobDefinition>,
    release: Option<ReleaseConfig>,
) -> PipelineDefinition {
    PipelineDefinition {
        name: "test".to_string(),
        description: None,
        env: BTreeMap::new(),
        jobs,
        release,
    }
}
