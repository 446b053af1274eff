//! Main scheduler orchestration.
//!
//! One coordinator owns every [`JobRun`] of an invocation. Ready jobs are
//! handed to worker tasks in a [`JoinSet`]; each worker provisions an
//! environment, stages consumed artifacts, runs the steps, reads declared
//! outputs, tears the environment down, and returns a completion value.
//! Only the coordinator changes job status or publishes artifacts.

use crate::config::SchedulerConfig;
use crate::dag::JobGraph;
use crate::release::{GateDecision, ReleaseGate};
use crate::sinks::TracingEventSink;
use crate::triggers::TriggerResolver;
use chrono::Utc;
use gantry_core::artifact::ArtifactScope;
use gantry_core::environment::{
    EnvironmentHandle, ExecutionResult, PreparedStep, ProvisionRequest, STAGED_ARTIFACTS_DIR,
};
use gantry_core::events::*;
use gantry_core::ids::{InvocationId, JobRunId};
use gantry_core::interpolation::InterpolationContext;
use gantry_core::pipeline::{JobDefinition, PipelineDefinition};
use gantry_core::ports::{
    ArtifactStore, EnvironmentProvisioner, EventSink, ReleaseAsset, ReleasePublisher,
    ReleaseRequest,
};
use gantry_core::run::{
    FailureKind, InvocationOutcome, JobRunStatus, PipelineInvocation, ReleaseStatus, SkipReason,
};
use gantry_core::trigger::{ToolchainChannel, TriggerEvent, TriggerParameters};
use gantry_core::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, instrument, warn};

/// The job-graph scheduler.
pub struct Scheduler {
    config: SchedulerConfig,
    resolver: TriggerResolver,
    provisioner: Arc<dyn EnvironmentProvisioner>,
    artifacts: Arc<dyn ArtifactStore>,
    publisher: Option<Arc<dyn ReleasePublisher>>,
    events: Arc<dyn EventSink>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        provisioner: Arc<dyn EnvironmentProvisioner>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            config,
            resolver: TriggerResolver::new(),
            provisioner,
            artifacts,
            publisher: None,
            events: Arc::new(TracingEventSink),
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn ReleasePublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Validate the pipeline, resolve the event, and run the invocation to
    /// completion. Validation errors abort before any job is dispatched.
    pub async fn run(
        &self,
        pipeline: &PipelineDefinition,
        event: &TriggerEvent,
    ) -> Result<PipelineInvocation> {
        let graph = JobGraph::build(pipeline)?;
        let params = self.resolver.resolve(event);
        self.execute(Arc::new(graph), params).await
    }

    /// Run an already validated graph with resolved parameters.
    #[instrument(skip_all, fields(pipeline = %graph.pipeline()))]
    pub async fn execute(
        &self,
        graph: Arc<JobGraph>,
        params: TriggerParameters,
    ) -> Result<PipelineInvocation> {
        let params = Arc::new(params);
        let mut inv = PipelineInvocation::new(
            graph.pipeline(),
            (*params).clone(),
            graph.jobs().map(|node| node.name.clone()),
        );

        info!(
            invocation = %inv.id,
            event = %params.event,
            channel = %params.channel,
            jobs = graph.len(),
            "Starting invocation"
        );
        self.emit(Event::InvocationStarted(InvocationStartedPayload {
            invocation_id: inv.id,
            pipeline: inv.pipeline.clone(),
            event: params.event,
            channel: params.channel,
            release_tag: params.release_tag.clone(),
            jobs: graph.len(),
            started_at: inv.started_at,
        }))
        .await;

        let mut workers: JoinSet<JobCompletion> = JoinSet::new();
        let mut in_flight: HashMap<tokio::task::Id, usize> = HashMap::new();

        loop {
            self.advance(&graph, &params, &mut inv).await?;
            self.dispatch_ready(&graph, &params, &mut inv, &mut workers, &mut in_flight)
                .await?;

            if workers.is_empty() {
                break;
            }

            match workers.join_next_with_id().await {
                Some(Ok((id, completion))) => {
                    in_flight.remove(&id);
                    self.record(&mut inv, completion).await?;
                }
                Some(Err(err)) => {
                    let Some(index) = in_flight.remove(&err.id()) else {
                        continue;
                    };
                    error!(job = %inv.runs[index].job, error = %err, "Worker crashed");
                    self.fail(
                        &mut inv,
                        index,
                        FailureKind::Internal,
                        format!("worker crashed: {err}"),
                    )
                    .await?;
                }
                None => break,
            }
        }

        if !inv.is_settled() {
            warn!(invocation = %inv.id, "Invocation finished with unsettled jobs");
        }

        let graph_outcome = inv.graph_outcome();
        inv.release = self.release(&graph, &inv).await;
        let outcome = match (&graph_outcome, &inv.release) {
            (InvocationOutcome::Success, ReleaseStatus::Failed { .. }) => {
                InvocationOutcome::Partial
            }
            _ => graph_outcome,
        };
        inv.outcome = Some(outcome);

        if !self.config.retain_artifacts {
            match self.artifacts.expire(inv.id).await {
                Ok(removed) => debug!(invocation = %inv.id, removed, "Expired artifacts"),
                Err(e) => warn!(invocation = %inv.id, error = %e, "Failed to expire artifacts"),
            }
        }

        let completed_at = Utc::now();
        inv.completed_at = Some(completed_at);
        let duration_ms = (completed_at - inv.started_at).num_milliseconds().max(0) as u64;

        info!(
            invocation = %inv.id,
            outcome = ?outcome,
            duration_ms,
            "Invocation completed"
        );
        self.emit(Event::InvocationCompleted(InvocationCompletedPayload {
            invocation_id: inv.id,
            outcome,
            succeeded: inv.count(JobRunStatus::Succeeded),
            failed: inv.count(JobRunStatus::Failed),
            skipped: inv.count(JobRunStatus::Skipped),
            duration_ms,
            completed_at,
        }))
        .await;

        Ok(inv)
    }

    /// Apply the current frontier: skip, block, or ready waiting jobs.
    async fn advance(
        &self,
        graph: &JobGraph,
        params: &TriggerParameters,
        inv: &mut PipelineInvocation,
    ) -> Result<()> {
        let frontier = graph.frontier(&inv.statuses(), params);

        for (index, reason) in frontier.skipped {
            info!(job = %inv.runs[index].job, reason = %reason, "Skipping job");
            self.skip(inv, index, reason).await?;
        }
        for index in frontier.blocked {
            if inv.runs[index].status == JobRunStatus::Pending {
                self.transition(inv, index, JobRunStatus::Blocked).await?;
            }
        }
        for index in frontier.ready {
            self.transition(inv, index, JobRunStatus::Ready).await?;
        }
        Ok(())
    }

    /// Start ready jobs, in declaration order, up to the parallelism bound.
    async fn dispatch_ready(
        &self,
        graph: &Arc<JobGraph>,
        params: &Arc<TriggerParameters>,
        inv: &mut PipelineInvocation,
        workers: &mut JoinSet<JobCompletion>,
        in_flight: &mut HashMap<tokio::task::Id, usize>,
    ) -> Result<()> {
        let capacity = self
            .config
            .max_parallel_jobs
            .max(1)
            .saturating_sub(workers.len());
        let ready: Vec<usize> = inv
            .runs
            .iter()
            .enumerate()
            .filter(|(_, run)| run.status == JobRunStatus::Ready)
            .map(|(index, _)| index)
            .take(capacity)
            .collect();

        for index in ready {
            let dispatch = self.dispatch_for(graph, params, inv, index)?;
            self.transition(inv, index, JobRunStatus::Running).await?;
            info!(
                job = %inv.runs[index].job,
                environment = %graph.job(index).definition.environment.label(),
                "Dispatching job"
            );
            let handle = workers.spawn(dispatch.run());
            in_flight.insert(handle.id(), index);
        }
        Ok(())
    }

    fn dispatch_for(
        &self,
        graph: &Arc<JobGraph>,
        params: &Arc<TriggerParameters>,
        inv: &PipelineInvocation,
        index: usize,
    ) -> Result<JobDispatch> {
        let job = &graph.job(index).definition;
        let inputs = job
            .consumes
            .iter()
            .map(|name| {
                let producer = graph.producer_of(name).ok_or_else(|| {
                    Error::Internal(format!("artifact {name} has no producer"))
                })?;
                let scope = ArtifactScope {
                    invocation: inv.id,
                    run: inv.runs[producer].id,
                };
                Ok((name.clone(), scope))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(JobDispatch {
            index,
            invocation: inv.id,
            run: inv.runs[index].id,
            graph: graph.clone(),
            params: params.clone(),
            inputs,
            config: self.config.clone(),
            provisioner: self.provisioner.clone(),
            artifacts: self.artifacts.clone(),
            events: self.events.clone(),
        })
    }

    /// Record a worker's completion. Artifacts are published only for
    /// successful runs, and only all together.
    async fn record(&self, inv: &mut PipelineInvocation, completion: JobCompletion) -> Result<()> {
        let index = completion.index;
        inv.runs[index].attempts = completion.attempts;

        match completion.result {
            Ok(output) => {
                inv.runs[index].execution = Some(output.execution);
                let scope = ArtifactScope {
                    invocation: inv.id,
                    run: inv.runs[index].id,
                };

                let mut handles = Vec::with_capacity(output.produced.len());
                for (name, data) in output.produced {
                    match self.artifacts.publish(scope, &name, data).await {
                        Ok(handle) => handles.push(handle),
                        Err(e) => {
                            error!(job = %inv.runs[index].job, artifact = %name, error = %e, "Artifact publish failed");
                            if let Err(e) = self.artifacts.discard(scope).await {
                                warn!(job = %inv.runs[index].job, error = %e, "Failed to discard partial outputs");
                            }
                            return self
                                .fail(
                                    inv,
                                    index,
                                    FailureKind::Infrastructure,
                                    format!("publishing artifact {name}: {e}"),
                                )
                                .await;
                        }
                    }
                }

                for handle in &handles {
                    self.emit(Event::ArtifactPublished(ArtifactPublishedPayload {
                        invocation_id: inv.id,
                        run_id: inv.runs[index].id,
                        job: inv.runs[index].job.clone(),
                        name: handle.name.clone(),
                        size_bytes: handle.size_bytes,
                        checksum: handle.checksum.clone(),
                    }))
                    .await;
                }
                inv.runs[index].artifacts = handles;
                self.transition(inv, index, JobRunStatus::Succeeded).await?;
                info!(
                    job = %inv.runs[index].job,
                    duration_ms = inv.runs[index].duration_ms().unwrap_or_default(),
                    "Job succeeded"
                );
            }
            Err(failure) => {
                inv.runs[index].execution = failure.execution;
                warn!(
                    job = %inv.runs[index].job,
                    attempts = completion.attempts,
                    error = %failure.message,
                    "Job failed"
                );
                self.fail(inv, index, failure.kind, failure.message).await?;
            }
        }
        Ok(())
    }

    async fn release(&self, graph: &JobGraph, inv: &PipelineInvocation) -> ReleaseStatus {
        let gate = ReleaseGate::new(graph.release(), self.publisher.is_some());
        let (tag, artifacts) = match gate.evaluate(inv) {
            GateDecision::NotRequested => return ReleaseStatus::NotRequested,
            GateDecision::Refused(reason) => {
                info!(reason = %reason, "Release refused");
                self.emit(Event::ReleaseRefused(ReleaseRefusedPayload {
                    invocation_id: inv.id,
                    tag: inv.parameters.release_tag.clone(),
                    reason: reason.clone(),
                }))
                .await;
                return ReleaseStatus::Refused { reason };
            }
            GateDecision::Publish { tag, artifacts } => (tag, artifacts),
        };
        let Some(publisher) = &self.publisher else {
            return ReleaseStatus::Refused {
                reason: "no release publisher configured".to_string(),
            };
        };

        let result = match self.release_assets(graph, inv, &artifacts).await {
            Ok(assets) => {
                let request = ReleaseRequest {
                    invocation: inv.id,
                    pipeline: inv.pipeline.clone(),
                    tag: tag.clone(),
                    assets,
                };
                info!(
                    tag = %tag,
                    publisher = publisher.name(),
                    assets = request.assets.len(),
                    "Publishing release"
                );
                publisher.publish(&request).await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(reference) => {
                self.emit(Event::ReleasePublished(ReleasePublishedPayload {
                    invocation_id: inv.id,
                    tag,
                    reference: reference.reference.clone(),
                    assets: artifacts,
                }))
                .await;
                ReleaseStatus::Published {
                    reference: reference.reference,
                }
            }
            Err(e) => {
                // Publishing is not idempotent; an operator decides whether to retry.
                error!(tag = %tag, error = %e, "Release publishing failed");
                self.emit(Event::ReleaseFailed(ReleaseFailedPayload {
                    invocation_id: inv.id,
                    tag,
                    error: e.to_string(),
                }))
                .await;
                ReleaseStatus::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn release_assets(
        &self,
        graph: &JobGraph,
        inv: &PipelineInvocation,
        names: &[String],
    ) -> Result<Vec<ReleaseAsset>> {
        let mut assets = Vec::with_capacity(names.len());
        for name in names {
            let handle = graph
                .producer_of(name)
                .and_then(|producer| inv.runs[producer].artifacts.iter().find(|h| &h.name == name))
                .ok_or_else(|| Error::ArtifactNotFound {
                    run: "release".to_string(),
                    name: name.clone(),
                })?;
            let data = self.artifacts.fetch(handle.scope, name).await?;
            assets.push(ReleaseAsset {
                name: name.clone(),
                data,
                checksum: handle.checksum.clone(),
            });
        }
        Ok(assets)
    }

    async fn transition(
        &self,
        inv: &mut PipelineInvocation,
        index: usize,
        next: JobRunStatus,
    ) -> Result<()> {
        let from = inv.runs[index].status;
        inv.runs[index].transition(next)?;
        self.announce(inv, index, from).await;
        Ok(())
    }

    async fn skip(
        &self,
        inv: &mut PipelineInvocation,
        index: usize,
        reason: SkipReason,
    ) -> Result<()> {
        let from = inv.runs[index].status;
        inv.runs[index].skip(reason)?;
        self.announce(inv, index, from).await;
        Ok(())
    }

    async fn fail(
        &self,
        inv: &mut PipelineInvocation,
        index: usize,
        kind: FailureKind,
        message: String,
    ) -> Result<()> {
        let from = inv.runs[index].status;
        inv.runs[index].fail(kind, message)?;
        self.announce(inv, index, from).await;
        Ok(())
    }

    async fn announce(&self, inv: &PipelineInvocation, index: usize, from: JobRunStatus) {
        let run = &inv.runs[index];
        self.emit(Event::JobStatusChanged(JobStatusChangedPayload {
            invocation_id: inv.id,
            run_id: run.id,
            job: run.job.clone(),
            from,
            to: run.status,
            skip_reason: run.skip_reason.clone(),
            failure: run.failure.clone(),
            at: Utc::now(),
        }))
        .await;
    }

    async fn emit(&self, event: Event) {
        emit_to(self.events.as_ref(), event).await;
    }
}

async fn emit_to(sink: &dyn EventSink, event: Event) {
    if let Err(e) = sink.emit(event).await {
        warn!(error = %e, "Event sink rejected event");
    }
}

/// Variables the engine exports to every step.
pub fn engine_env(
    params: &TriggerParameters,
    invocation: InvocationId,
    job: &JobDefinition,
    channel: ToolchainChannel,
    handle: &EnvironmentHandle,
) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("GANTRY_EVENT".to_string(), params.event.to_string());
    env.insert("GANTRY_TOOLCHAIN".to_string(), channel.to_string());
    env.insert("GANTRY_JOB".to_string(), job.name.clone());
    env.insert("GANTRY_INVOCATION_ID".to_string(), invocation.to_string());
    env.insert(
        "GANTRY_ARTIFACTS_DIR".to_string(),
        format!("{}/{}", handle.step_workspace(), STAGED_ARTIFACTS_DIR),
    );

    let variant = job.environment.variant();
    env.insert(
        "GANTRY_ALTERNATE_ENV".to_string(),
        variant.is_some().to_string(),
    );
    if let Some(variant) = variant {
        env.insert("GANTRY_ENV_VARIANT".to_string(), variant.to_string());
    }
    if let Some(tag) = &params.release_tag {
        env.insert("GANTRY_RELEASE_TAG".to_string(), tag.clone());
    }
    env
}

/// Everything a worker needs to run one job, owned so it can move into a task.
struct JobDispatch {
    index: usize,
    invocation: InvocationId,
    run: JobRunId,
    graph: Arc<JobGraph>,
    params: Arc<TriggerParameters>,
    inputs: Vec<(String, ArtifactScope)>,
    config: SchedulerConfig,
    provisioner: Arc<dyn EnvironmentProvisioner>,
    artifacts: Arc<dyn ArtifactStore>,
    events: Arc<dyn EventSink>,
}

struct JobCompletion {
    index: usize,
    attempts: u32,
    result: std::result::Result<JobOutput, JobFailure>,
}

struct JobOutput {
    execution: ExecutionResult,
    produced: Vec<(String, Vec<u8>)>,
}

struct JobFailure {
    kind: FailureKind,
    message: String,
    execution: Option<ExecutionResult>,
}

impl JobFailure {
    fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            execution: None,
        }
    }
}

enum AttemptError {
    /// Infrastructure trouble before any step ran.
    Retryable(JobFailure),
    Final(JobFailure),
}

impl AttemptError {
    /// Errors raised before any step ran. Infrastructure errors may be retried.
    fn classify(error: &Error, message: String) -> Self {
        let failure = JobFailure::new(FailureKind::Infrastructure, message);
        if error.is_infrastructure() {
            AttemptError::Retryable(failure)
        } else {
            AttemptError::Final(failure)
        }
    }
}

impl JobDispatch {
    fn job(&self) -> &JobDefinition {
        &self.graph.job(self.index).definition
    }

    async fn run(self) -> JobCompletion {
        let mut attempts = 0;
        let result = loop {
            attempts += 1;
            match self.attempt().await {
                Ok(output) => break Ok(output),
                Err(AttemptError::Final(failure)) => break Err(failure),
                Err(AttemptError::Retryable(failure)) => {
                    if !self.config.retry.allows_another(attempts) {
                        break Err(failure);
                    }
                    warn!(
                        job = %self.job().name,
                        attempt = attempts,
                        error = %failure.message,
                        "Infrastructure failure, retrying"
                    );
                    emit_to(
                        self.events.as_ref(),
                        Event::JobRetrying(JobRetryingPayload {
                            invocation_id: self.invocation,
                            run_id: self.run,
                            job: self.job().name.clone(),
                            attempt: attempts,
                            error: failure.message,
                        }),
                    )
                    .await;
                    sleep(self.config.retry.delay()).await;
                }
            }
        };

        JobCompletion {
            index: self.index,
            attempts,
            result,
        }
    }

    async fn attempt(&self) -> std::result::Result<JobOutput, AttemptError> {
        let job = self.job();

        let mut inputs = Vec::with_capacity(self.inputs.len());
        for (name, scope) in &self.inputs {
            let data = self.artifacts.fetch(*scope, name).await.map_err(|e| {
                AttemptError::classify(&e, format!("fetching artifact {name}: {e}"))
            })?;
            inputs.push((name.clone(), data));
        }

        let channel = self.params.channel;
        let request = ProvisionRequest {
            invocation: self.invocation,
            run: self.run,
            job: job.name.clone(),
            descriptor: job.environment.clone(),
            channel,
        };

        let budget = self.config.provision_timeout();
        let handle = match timeout(budget, self.provisioner.provision(&request)).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => return Err(AttemptError::classify(&e, e.to_string())),
            Err(_) => {
                let e = Error::Timeout {
                    during: "provisioning".to_string(),
                    seconds: budget.as_secs(),
                };
                warn!(job = %job.name, error = %e, "Releasing partially provisioned environment");
                if let Err(e) = self.provisioner.abandon(&request).await {
                    warn!(job = %job.name, error = %e, "Environment teardown failed");
                }
                return Err(AttemptError::Retryable(JobFailure::new(
                    FailureKind::Timeout,
                    e.to_string(),
                )));
            }
        };
        debug!(job = %job.name, workspace = %handle.workspace.display(), "Environment ready");

        let outcome = self.run_in(&handle, channel, inputs).await;

        if let Err(e) = self.provisioner.teardown(handle).await {
            warn!(job = %job.name, error = %e, "Environment teardown failed");
        }
        outcome
    }

    async fn run_in(
        &self,
        handle: &EnvironmentHandle,
        channel: ToolchainChannel,
        inputs: Vec<(String, Vec<u8>)>,
    ) -> std::result::Result<JobOutput, AttemptError> {
        let job = self.job();

        let staged = handle.staged_artifacts();
        tokio::fs::create_dir_all(&staged).await.map_err(|e| {
            AttemptError::Retryable(JobFailure::new(
                FailureKind::Infrastructure,
                format!("staging artifacts: {e}"),
            ))
        })?;
        for (name, data) in inputs {
            tokio::fs::write(staged.join(&name), data).await.map_err(|e| {
                AttemptError::Retryable(JobFailure::new(
                    FailureKind::Infrastructure,
                    format!("staging artifact {name}: {e}"),
                ))
            })?;
        }

        let steps = self.prepare_steps(handle, channel);
        let budget = self.config.job_timeout(job.timeout_minutes);
        let execution = match timeout(budget, self.provisioner.execute(handle, &steps)).await {
            Ok(Ok(result)) => result,
            // Steps may already have had side effects, so never retried.
            Ok(Err(e)) => {
                return Err(AttemptError::Final(JobFailure::new(
                    FailureKind::Infrastructure,
                    format!("execution failed: {e}"),
                )));
            }
            Err(_) => {
                let e = Error::Timeout {
                    during: "running steps".to_string(),
                    seconds: budget.as_secs(),
                };
                return Err(AttemptError::Final(JobFailure::new(
                    FailureKind::Timeout,
                    e.to_string(),
                )));
            }
        };

        if !execution.success {
            let step = execution.failed_step.clone().unwrap_or_default();
            let exit_code = execution.exit_code;
            return Err(AttemptError::Final(JobFailure {
                kind: FailureKind::Step {
                    step: step.clone(),
                    exit_code,
                },
                message: format!("step {step} exited with code {exit_code}"),
                execution: Some(execution),
            }));
        }

        let mut produced = Vec::with_capacity(job.produces.len());
        for decl in &job.produces {
            let path = handle.workspace.join(&decl.path);
            match tokio::fs::read(&path).await {
                Ok(data) => produced.push((decl.name.clone(), data)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(AttemptError::Final(JobFailure {
                        kind: FailureKind::MissingOutput {
                            artifact: decl.name.clone(),
                        },
                        message: format!(
                            "declared output {} not found at {}",
                            decl.name, decl.path
                        ),
                        execution: Some(execution),
                    }));
                }
                Err(e) => {
                    return Err(AttemptError::Final(JobFailure {
                        kind: FailureKind::Infrastructure,
                        message: format!("reading output {}: {e}", decl.name),
                        execution: Some(execution),
                    }));
                }
            }
        }

        Ok(JobOutput {
            execution,
            produced,
        })
    }

    /// Merge variables and interpolate step commands. Later layers win:
    /// environment, pipeline, job, step, then engine variables.
    fn prepare_steps(
        &self,
        handle: &EnvironmentHandle,
        channel: ToolchainChannel,
    ) -> Vec<PreparedStep> {
        let job = self.job();
        let engine = engine_env(&self.params, self.invocation, job, channel, handle);

        let mut base = handle.env.clone();
        base.extend(self.graph.env().clone());
        base.extend(job.env.clone());

        job.steps
            .iter()
            .map(|step| {
                let mut env = base.clone();
                env.extend(step.env.clone());
                env.extend(engine.clone());
                let command = InterpolationContext::new(&self.params, &env, &job.name)
                    .interpolate(&step.run);
                PreparedStep {
                    name: step.name.clone(),
                    command,
                    env,
                    continue_on_error: step.continue_on_error,
                }
            })
            .collect()
    }
}
