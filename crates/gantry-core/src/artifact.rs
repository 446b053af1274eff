//! Artifact handles exchanged between jobs of one invocation.

use crate::ids::{InvocationId, JobRunId};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Artifact names become file names under the staged-artifacts directory, so
/// each must be a single path segment.
pub fn is_valid_artifact_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

/// Where an artifact lives: one job run of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct ArtifactScope {
    pub invocation: InvocationId,
    pub run: JobRunId,
}

/// Metadata for a published artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ArtifactHandle {
    pub scope: ArtifactScope,
    pub name: String,
    pub size_bytes: u64,
    /// Hex-encoded sha256 of the uploaded bytes.
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

/// A consumer's reference to an artifact produced upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ArtifactRef {
    pub name: String,
    pub producer_job: String,
    pub producer_run: JobRunId,
}
