//! Lifecycle events emitted while an invocation runs.

use crate::ids::*;
use crate::run::{FailureKind, InvocationOutcome, JobRunStatus, SkipReason};
use crate::trigger::{EventKind, ToolchainChannel};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// All events in the Gantry engine.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    // Invocation lifecycle
    InvocationStarted(InvocationStartedPayload),
    InvocationCompleted(InvocationCompletedPayload),

    // Job lifecycle
    JobStatusChanged(JobStatusChangedPayload),
    JobRetrying(JobRetryingPayload),

    // Artifacts
    ArtifactPublished(ArtifactPublishedPayload),

    // Release
    ReleasePublished(ReleasePublishedPayload),
    ReleaseRefused(ReleaseRefusedPayload),
    ReleaseFailed(ReleaseFailedPayload),
}

impl Event {
    /// Dotted subject for this event, e.g. `job.status.<invocation>.build`.
    pub fn subject(&self) -> String {
        match self {
            Event::InvocationStarted(p) => format!("invocation.started.{}", p.invocation_id),
            Event::InvocationCompleted(p) => format!("invocation.completed.{}", p.invocation_id),
            Event::JobStatusChanged(p) => format!("job.status.{}.{}", p.invocation_id, p.job),
            Event::JobRetrying(p) => format!("job.retrying.{}.{}", p.invocation_id, p.job),
            Event::ArtifactPublished(p) => {
                format!("artifact.published.{}.{}", p.invocation_id, p.name)
            }
            Event::ReleasePublished(p) => format!("release.published.{}", p.invocation_id),
            Event::ReleaseRefused(p) => format!("release.refused.{}", p.invocation_id),
            Event::ReleaseFailed(p) => format!("release.failed.{}", p.invocation_id),
        }
    }

    pub fn invocation_id(&self) -> InvocationId {
        match self {
            Event::InvocationStarted(p) => p.invocation_id,
            Event::InvocationCompleted(p) => p.invocation_id,
            Event::JobStatusChanged(p) => p.invocation_id,
            Event::JobRetrying(p) => p.invocation_id,
            Event::ArtifactPublished(p) => p.invocation_id,
            Event::ReleasePublished(p) => p.invocation_id,
            Event::ReleaseRefused(p) => p.invocation_id,
            Event::ReleaseFailed(p) => p.invocation_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct InvocationStartedPayload {
    pub invocation_id: InvocationId,
    pub pipeline: String,
    pub event: EventKind,
    pub channel: ToolchainChannel,
    pub release_tag: Option<String>,
    pub jobs: usize,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct InvocationCompletedPayload {
    pub invocation_id: InvocationId,
    pub outcome: InvocationOutcome,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobStatusChangedPayload {
    pub invocation_id: InvocationId,
    pub run_id: JobRunId,
    pub job: String,
    pub from: JobRunStatus,
    pub to: JobRunStatus,
    pub skip_reason: Option<SkipReason>,
    pub failure: Option<FailureKind>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobRetryingPayload {
    pub invocation_id: InvocationId,
    pub run_id: JobRunId,
    pub job: String,
    pub attempt: u32,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ArtifactPublishedPayload {
    pub invocation_id: InvocationId,
    pub run_id: JobRunId,
    pub job: String,
    pub name: String,
    pub size_bytes: u64,
    pub checksum: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReleasePublishedPayload {
    pub invocation_id: InvocationId,
    pub tag: String,
    pub reference: String,
    pub assets: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReleaseRefusedPayload {
    pub invocation_id: InvocationId,
    pub tag: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReleaseFailedPayload {
    pub invocation_id: InvocationId,
    pub tag: String,
    pub error: String,
}
