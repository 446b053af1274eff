//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the engine and its adapters:
//! execution environments, artifact storage, release publication, and event
//! observers.

use crate::artifact::{ArtifactHandle, ArtifactScope};
use crate::environment::{EnvironmentHandle, ExecutionResult, PreparedStep, ProvisionRequest};
use crate::events::Event;
use crate::ids::InvocationId;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Prepares, drives, and releases isolated execution environments.
#[async_trait]
pub trait EnvironmentProvisioner: Send + Sync {
    /// Prepare an environment. On error, anything acquired must already be
    /// released.
    async fn provision(&self, request: &ProvisionRequest) -> Result<EnvironmentHandle>;

    /// Run steps in order, stopping at the first failure that does not
    /// continue on error. Step failures are reported in the result, not as
    /// an `Err`.
    async fn execute(
        &self,
        handle: &EnvironmentHandle,
        steps: &[PreparedStep],
    ) -> Result<ExecutionResult>;

    /// Release the environment.
    async fn teardown(&self, handle: EnvironmentHandle) -> Result<()>;

    /// Release whatever a `provision` call for `request` acquired before it
    /// was cancelled. No handle exists, so resources are found by the
    /// request's identity. Nothing left to release is not an error.
    async fn abandon(&self, request: &ProvisionRequest) -> Result<()>;
}

/// Storage for blobs exchanged between jobs of one invocation.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Publish an artifact. Re-publishing the same scope and name overwrites.
    async fn publish(
        &self,
        scope: ArtifactScope,
        name: &str,
        data: Vec<u8>,
    ) -> Result<ArtifactHandle>;

    /// Fetch the exact bytes published under `scope` and `name`.
    async fn fetch(&self, scope: ArtifactScope, name: &str) -> Result<Vec<u8>>;

    /// List artifacts published during an invocation.
    async fn list(&self, invocation: InvocationId) -> Result<Vec<ArtifactHandle>>;

    /// Drop every artifact of an invocation. Returns how many were removed.
    async fn expire(&self, invocation: InvocationId) -> Result<usize>;

    /// Drop every artifact published under one job run's scope. Returns how
    /// many were removed.
    async fn discard(&self, scope: ArtifactScope) -> Result<usize>;
}

/// A file attached to a release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseAsset {
    pub name: String,
    pub data: Vec<u8>,
    /// Hex sha256 as recorded when the artifact was published.
    pub checksum: String,
}

#[derive(Debug, Clone)]
pub struct ReleaseRequest {
    pub invocation: InvocationId,
    pub pipeline: String,
    pub tag: String,
    pub assets: Vec<ReleaseAsset>,
}

/// Where a published release can be found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseReference {
    pub reference: String,
}

/// External sink for a finished release.
#[async_trait]
pub trait ReleasePublisher: Send + Sync {
    /// Human-readable adapter name for logs.
    fn name(&self) -> &str;

    /// Publish the release. Called at most once per invocation.
    async fn publish(&self, request: &ReleaseRequest) -> Result<ReleaseReference>;
}

/// Observer of engine lifecycle events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: Event) -> Result<()>;
}
