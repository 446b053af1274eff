//! In-memory artifact store.

use crate::keys::checksum;
use async_trait::async_trait;
use chrono::Utc;
use gantry_core::artifact::{ArtifactHandle, ArtifactScope};
use gantry_core::ids::InvocationId;
use gantry_core::ports::ArtifactStore;
use gantry_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

type Key = (ArtifactScope, String);

/// Artifact store held entirely in process memory. Suitable for single-process
/// runs where artifacts never outlive the invocation.
#[derive(Debug, Clone, Default)]
pub struct InMemoryArtifactStore {
    blobs: Arc<RwLock<HashMap<Key, (ArtifactHandle, Arc<Vec<u8>>)>>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored artifacts across all invocations.
    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn publish(
        &self,
        scope: ArtifactScope,
        name: &str,
        data: Vec<u8>,
    ) -> Result<ArtifactHandle> {
        let handle = ArtifactHandle {
            scope,
            name: name.to_string(),
            size_bytes: data.len() as u64,
            checksum: checksum(&data),
            created_at: Utc::now(),
        };
        self.blobs
            .write()
            .await
            .insert((scope, name.to_string()), (handle.clone(), Arc::new(data)));
        Ok(handle)
    }

    async fn fetch(&self, scope: ArtifactScope, name: &str) -> Result<Vec<u8>> {
        self.blobs
            .read()
            .await
            .get(&(scope, name.to_string()))
            .map(|(_, data)| data.as_ref().clone())
            .ok_or_else(|| Error::ArtifactNotFound {
                run: scope.run.to_string(),
                name: name.to_string(),
            })
    }

    async fn list(&self, invocation: InvocationId) -> Result<Vec<ArtifactHandle>> {
        let mut handles: Vec<ArtifactHandle> = self
            .blobs
            .read()
            .await
            .values()
            .filter(|(handle, _)| handle.scope.invocation == invocation)
            .map(|(handle, _)| handle.clone())
            .collect();
        handles.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        Ok(handles)
    }

    async fn expire(&self, invocation: InvocationId) -> Result<usize> {
        let mut blobs = self.blobs.write().await;
        let before = blobs.len();
        blobs.retain(|(scope, _), _| scope.invocation != invocation);
        Ok(before - blobs.len())
    }

    async fn discard(&self, scope: ArtifactScope) -> Result<usize> {
        let mut blobs = self.blobs.write().await;
        let before = blobs.len();
        blobs.retain(|(stored, _), _| *stored != scope);
        Ok(before - blobs.len())
    }
}
