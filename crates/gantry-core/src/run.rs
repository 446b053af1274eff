//! Job runs and pipeline invocations.

use crate::artifact::ArtifactHandle;
use crate::environment::ExecutionResult;
use crate::ids::{InvocationId, JobRunId};
use crate::trigger::TriggerParameters;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobRunStatus {
    Pending,
    Blocked,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl JobRunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobRunStatus::Succeeded | JobRunStatus::Failed | JobRunStatus::Skipped
        )
    }

    /// Whether a job in this status disqualifies its dependents.
    pub fn poisons_dependents(&self) -> bool {
        matches!(self, JobRunStatus::Failed | JobRunStatus::Skipped)
    }

    pub fn can_transition_to(&self, next: JobRunStatus) -> bool {
        use JobRunStatus::*;
        matches!(
            (self, next),
            (Pending, Blocked)
                | (Pending, Ready)
                | (Pending, Skipped)
                | (Blocked, Ready)
                | (Blocked, Skipped)
                | (Ready, Running)
                | (Running, Succeeded)
                | (Running, Failed)
        )
    }
}

impl fmt::Display for JobRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobRunStatus::Pending => "pending",
            JobRunStatus::Blocked => "blocked",
            JobRunStatus::Ready => "ready",
            JobRunStatus::Running => "running",
            JobRunStatus::Succeeded => "succeeded",
            JobRunStatus::Failed => "failed",
            JobRunStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Why a job ended `Skipped`. Skips are expected outcomes, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    DependencyFailed { job: String },
    DependencySkipped { job: String },
    ConditionFalse,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::DependencyFailed { job } => write!(f, "dependency {job} failed"),
            SkipReason::DependencySkipped { job } => write!(f, "dependency {job} was skipped"),
            SkipReason::ConditionFalse => f.write_str("condition not met"),
        }
    }
}

/// Why a job ended `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// A job step exited non-zero.
    Step { step: String, exit_code: i32 },
    /// Provisioning, artifact transfer, or another infrastructure problem.
    Infrastructure,
    /// Provisioning or execution exceeded its time budget.
    Timeout,
    /// Steps succeeded but a declared output was not produced.
    MissingOutput { artifact: String },
    /// The worker crashed.
    Internal,
}

/// One execution instance of a job within a pipeline invocation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobRun {
    pub id: JobRunId,
    pub job: String,
    pub status: JobRunStatus,
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    #[schemars(skip)]
    pub execution: Option<ExecutionResult>,
    pub failure: Option<FailureKind>,
    pub skip_reason: Option<SkipReason>,
    /// Diagnostic message for failures.
    pub message: Option<String>,
    pub artifacts: Vec<ArtifactHandle>,
}

impl JobRun {
    pub fn new(job: impl Into<String>) -> Self {
        Self {
            id: JobRunId::new(),
            job: job.into(),
            status: JobRunStatus::Pending,
            attempts: 0,
            started_at: None,
            ended_at: None,
            execution: None,
            failure: None,
            skip_reason: None,
            message: None,
            artifacts: vec![],
        }
    }

    /// Move to `next`, rejecting transitions the state machine forbids.
    pub fn transition(&mut self, next: JobRunStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                job: self.job.clone(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        let now = Utc::now();
        match next {
            JobRunStatus::Running => self.started_at = Some(now),
            s if s.is_terminal() => self.ended_at = Some(now),
            _ => {}
        }
        self.status = next;
        Ok(())
    }

    pub fn skip(&mut self, reason: SkipReason) -> Result<()> {
        self.transition(JobRunStatus::Skipped)?;
        self.skip_reason = Some(reason);
        Ok(())
    }

    pub fn fail(&mut self, kind: FailureKind, message: impl Into<String>) -> Result<()> {
        self.transition(JobRunStatus::Failed)?;
        self.failure = Some(kind);
        self.message = Some(message.into());
        Ok(())
    }

    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum InvocationOutcome {
    Success,
    Failure,
    /// Every job succeeded but publishing the release failed.
    Partial,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReleaseStatus {
    /// The trigger carried no release tag or the pipeline has no release gate.
    NotRequested,
    /// A release was requested but a gate condition did not hold.
    Refused { reason: String },
    Published { reference: String },
    /// The publisher failed. Not retried; needs operator attention.
    Failed { error: String },
}

/// Root aggregate for one end-to-end run of the job graph.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PipelineInvocation {
    pub id: InvocationId,
    pub pipeline: String,
    pub parameters: TriggerParameters,
    /// Job runs in declaration order.
    pub runs: Vec<JobRun>,
    pub outcome: Option<InvocationOutcome>,
    pub release: ReleaseStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PipelineInvocation {
    pub fn new<I, S>(pipeline: impl Into<String>, parameters: TriggerParameters, jobs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: InvocationId::new(),
            pipeline: pipeline.into(),
            parameters,
            runs: jobs.into_iter().map(JobRun::new).collect(),
            outcome: None,
            release: ReleaseStatus::NotRequested,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn run(&self, job: &str) -> Option<&JobRun> {
        self.runs.iter().find(|r| r.job == job)
    }

    pub fn status_of(&self, job: &str) -> Option<JobRunStatus> {
        self.run(job).map(|r| r.status)
    }

    pub fn statuses(&self) -> Vec<JobRunStatus> {
        self.runs.iter().map(|r| r.status).collect()
    }

    pub fn is_settled(&self) -> bool {
        self.runs.iter().all(|r| r.status.is_terminal())
    }

    /// `Success` iff every non-skipped job succeeded.
    pub fn graph_outcome(&self) -> InvocationOutcome {
        let all_ok = self
            .runs
            .iter()
            .filter(|r| r.status != JobRunStatus::Skipped)
            .all(|r| r.status == JobRunStatus::Succeeded);
        if all_ok {
            InvocationOutcome::Success
        } else {
            InvocationOutcome::Failure
        }
    }

    pub fn count(&self, status: JobRunStatus) -> usize {
        self.runs.iter().filter(|r| r.status == status).count()
    }
}
