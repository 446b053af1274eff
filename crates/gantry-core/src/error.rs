//! Error types for Gantry.

use thiserror::Error;

/// Problems found while validating a job graph. All of them abort the
/// invocation before any job is dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("Pipeline has no jobs")]
    EmptyPipeline,

    #[error("Duplicate job name: {0}")]
    DuplicateJob(String),

    #[error("Job {job} needs unknown job {dependency}")]
    UnknownDependency { job: String, dependency: String },

    #[error("Cycle detected in job dependencies: {}", cycle.join(" -> "))]
    CycleDetected { cycle: Vec<String> },

    #[error("Artifact {artifact} is produced by both {first} and {second}")]
    DuplicateArtifactProducer {
        artifact: String,
        first: String,
        second: String,
    },

    #[error("Job {job} declares artifact {artifact:?}, which is not a plain file name")]
    InvalidArtifactName { job: String, artifact: String },

    #[error("Job {job} consumes artifact {artifact} which no job produces")]
    UnknownArtifact { job: String, artifact: String },

    #[error("Job {job} consumes artifact {artifact} from {producer} without needing it")]
    UnreachableArtifact {
        job: String,
        artifact: String,
        producer: String,
    },

    #[error("Malformed condition on job {job}: {reason}")]
    MalformedCondition { job: String, reason: String },

    #[error("Release gate references unknown job {0}")]
    UnknownReleasePrerequisite(String),

    #[error("Release gate references unknown artifact {0}")]
    UnknownReleaseArtifact(String),
}

#[derive(Debug, Error)]
pub enum Error {
    // Validation errors
    #[error("Pipeline validation failed: {0}")]
    Validation(#[from] GraphError),

    // Job run errors
    #[error("Illegal job run transition for {job}: {from} -> {to}")]
    InvalidTransition {
        job: String,
        from: String,
        to: String,
    },

    // Infrastructure errors
    #[error("Environment provisioning failed: {0}")]
    Provisioning(String),

    #[error("Environment teardown failed: {0}")]
    Teardown(String),

    #[error("Timed out after {seconds}s while {during}")]
    Timeout { during: String, seconds: u64 },

    #[error("Artifact not found: {name} (run {run})")]
    ArtifactNotFound { run: String, name: String },

    #[error("Artifact {name} is corrupted: expected sha256 {expected}, got {actual}")]
    ArtifactCorrupted {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Artifact store error: {0}")]
    ArtifactStore(String),

    // Release errors
    #[error("Release publishing failed: {0}")]
    Release(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the error stems from infrastructure rather than from the job
    /// itself. Only these are eligible for bounded retries.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Error::Provisioning(_)
                | Error::Teardown(_)
                | Error::Timeout { .. }
                | Error::ArtifactNotFound { .. }
                | Error::ArtifactCorrupted { .. }
                | Error::ArtifactStore(_)
                | Error::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
