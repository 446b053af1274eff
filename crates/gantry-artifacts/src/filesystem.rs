//! Filesystem-backed artifact store.
//!
//! Layout: `<root>/<invocation>/<run>/<name>.blob` holds the compressed bytes
//! and `<name>.json` the metadata, including the sha256 of the original
//! bytes, which is verified on every fetch.

use crate::compression::{Compression, compress, decompress};
use crate::keys::{checksum, sanitize_name};
use async_trait::async_trait;
use chrono::Utc;
use gantry_core::artifact::{ArtifactHandle, ArtifactScope};
use gantry_core::ids::InvocationId;
use gantry_core::ports::ArtifactStore;
use gantry_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Serialize, Deserialize)]
struct StoredMetadata {
    handle: ArtifactHandle,
    compression: Compression,
    stored_bytes: u64,
}

pub struct FilesystemArtifactStore {
    root: PathBuf,
    compression: Compression,
}

impl FilesystemArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            compression: Compression::default(),
        }
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn invocation_dir(&self, invocation: InvocationId) -> PathBuf {
        self.root.join(invocation.to_string())
    }

    fn run_dir(&self, scope: ArtifactScope) -> PathBuf {
        self.invocation_dir(scope.invocation).join(scope.run.to_string())
    }

    fn paths(&self, scope: ArtifactScope, name: &str) -> (PathBuf, PathBuf) {
        let dir = self.run_dir(scope);
        let base = sanitize_name(name);
        (
            dir.join(format!("{base}.blob")),
            dir.join(format!("{base}.json")),
        )
    }
}

fn io_err(context: &str, path: &Path, e: std::io::Error) -> Error {
    Error::ArtifactStore(format!("{context} {}: {e}", path.display()))
}

/// Write through a sibling temp file so readers never see partial content.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, data)
        .await
        .map_err(|e| io_err("writing", &tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| io_err("renaming", &tmp, e))
}

/// Handles of every artifact stored in one run directory.
async fn read_run(run_dir: &Path) -> Result<Vec<ArtifactHandle>> {
    let mut entries = tokio::fs::read_dir(run_dir)
        .await
        .map_err(|e| io_err("listing", run_dir, e))?;
    let mut handles = vec![];
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| io_err("listing", run_dir, e))?
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let raw = tokio::fs::read(&path)
            .await
            .map_err(|e| io_err("reading", &path, e))?;
        match serde_json::from_slice::<StoredMetadata>(&raw) {
            Ok(meta) => handles.push(meta.handle),
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable artifact metadata"),
        }
    }
    Ok(handles)
}

#[async_trait]
impl ArtifactStore for FilesystemArtifactStore {
    async fn publish(
        &self,
        scope: ArtifactScope,
        name: &str,
        data: Vec<u8>,
    ) -> Result<ArtifactHandle> {
        let (blob_path, meta_path) = self.paths(scope, name);
        if let Some(parent) = blob_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_err("creating", parent, e))?;
        }

        let handle = ArtifactHandle {
            scope,
            name: name.to_string(),
            size_bytes: data.len() as u64,
            checksum: checksum(&data),
            created_at: Utc::now(),
        };

        let codec = self.compression;
        let stored = tokio::task::spawn_blocking(move || compress(&data, codec))
            .await
            .map_err(|e| Error::Internal(format!("compression task failed: {e}")))??;

        let metadata = StoredMetadata {
            handle: handle.clone(),
            compression: codec,
            stored_bytes: stored.len() as u64,
        };

        write_atomic(&blob_path, &stored).await?;
        write_atomic(&meta_path, &serde_json::to_vec_pretty(&metadata)?).await?;

        debug!(
            artifact = %name,
            size = handle.size_bytes,
            stored = metadata.stored_bytes,
            "Stored artifact"
        );
        Ok(handle)
    }

    async fn fetch(&self, scope: ArtifactScope, name: &str) -> Result<Vec<u8>> {
        let (blob_path, meta_path) = self.paths(scope, name);
        let not_found = || Error::ArtifactNotFound {
            run: scope.run.to_string(),
            name: name.to_string(),
        };

        let raw_meta = match tokio::fs::read(&meta_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(io_err("reading", &meta_path, e)),
        };
        let metadata: StoredMetadata = serde_json::from_slice(&raw_meta)?;

        let stored = match tokio::fs::read(&blob_path).await {
            Ok(stored) => stored,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(io_err("reading", &blob_path, e)),
        };

        let codec = metadata.compression;
        let data = tokio::task::spawn_blocking(move || decompress(&stored, codec))
            .await
            .map_err(|e| Error::Internal(format!("decompression task failed: {e}")))??;

        let actual = checksum(&data);
        if actual != metadata.handle.checksum {
            return Err(Error::ArtifactCorrupted {
                name: name.to_string(),
                expected: metadata.handle.checksum,
                actual,
            });
        }
        Ok(data)
    }

    async fn list(&self, invocation: InvocationId) -> Result<Vec<ArtifactHandle>> {
        let dir = self.invocation_dir(invocation);
        let mut runs = match tokio::fs::read_dir(&dir).await {
            Ok(runs) => runs,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(io_err("listing", &dir, e)),
        };

        let mut handles = vec![];
        while let Some(run) = runs
            .next_entry()
            .await
            .map_err(|e| io_err("listing", &dir, e))?
        {
            handles.extend(read_run(&run.path()).await?);
        }

        handles.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        Ok(handles)
    }

    async fn expire(&self, invocation: InvocationId) -> Result<usize> {
        let count = self.list(invocation).await?.len();
        let dir = self.invocation_dir(invocation);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(count),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(io_err("removing", &dir, e)),
        }
    }

    async fn discard(&self, scope: ArtifactScope) -> Result<usize> {
        let dir = self.run_dir(scope);
        let count = match tokio::fs::metadata(&dir).await {
            Ok(_) => read_run(&dir).await?.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(io_err("reading", &dir, e)),
        };
        tokio::fs::remove_dir_all(&dir)
            .await
            .map_err(|e| io_err("removing", &dir, e))?;
        debug!(run = %scope.run, removed = count, "Discarded run artifacts");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::ids::JobRunId;
    use tempfile::TempDir;

    fn scope() -> ArtifactScope {
        ArtifactScope {
            invocation: InvocationId::new(),
            run: JobRunId::new(),
        }
    }

    #[tokio::test]
    async fn test_publish_and_fetch() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemArtifactStore::new(dir.path());
        let scope = scope();
        let payload = b"binary\x00payload".repeat(100);

        let handle = store.publish(scope, "target/app", payload.clone()).await.unwrap();
        assert_eq!(handle.name, "target/app");
        assert_eq!(handle.size_bytes, payload.len() as u64);

        assert_eq!(store.fetch(scope, "target/app").await.unwrap(), payload);
        let listed = store.list(scope.invocation).await.unwrap();
        assert_eq!(listed, vec![handle]);
    }

    #[tokio::test]
    async fn test_missing_artifact_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemArtifactStore::new(dir.path());
        assert!(matches!(
            store.fetch(scope(), "nope").await,
            Err(Error::ArtifactNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_tampered_blob_is_detected() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemArtifactStore::new(dir.path()).with_compression(Compression::None);
        let scope = scope();
        store.publish(scope, "deb", b"original".to_vec()).await.unwrap();

        let (blob, _) = store.paths(scope, "deb");
        tokio::fs::write(&blob, b"tampered").await.unwrap();

        assert!(matches!(
            store.fetch(scope, "deb").await,
            Err(Error::ArtifactCorrupted { .. })
        ));
    }

    #[tokio::test]
    async fn test_expire_removes_invocation() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemArtifactStore::new(dir.path());
        let scope = scope();
        store.publish(scope, "a", b"1".to_vec()).await.unwrap();
        store.publish(scope, "b", b"2".to_vec()).await.unwrap();

        assert_eq!(store.expire(scope.invocation).await.unwrap(), 2);
        assert!(store.list(scope.invocation).await.unwrap().is_empty());
        assert_eq!(store.expire(scope.invocation).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_discard_removes_one_run() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemArtifactStore::new(dir.path());
        let failed = scope();
        let kept = ArtifactScope {
            invocation: failed.invocation,
            run: JobRunId::new(),
        };
        store.publish(failed, "a", b"1".to_vec()).await.unwrap();
        store.publish(failed, "b", b"2".to_vec()).await.unwrap();
        let survivor = store.publish(kept, "c", b"3".to_vec()).await.unwrap();

        assert_eq!(store.discard(failed).await.unwrap(), 2);
        assert!(matches!(
            store.fetch(failed, "a").await,
            Err(Error::ArtifactNotFound { .. })
        ));
        assert_eq!(store.list(failed.invocation).await.unwrap(), vec![survivor]);
        assert_eq!(store.discard(failed).await.unwrap(), 0);
    }
}
