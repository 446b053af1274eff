//! Publishes releases as a local directory bundle.
//!
//! Layout: `<root>/<tag>/<asset>` for every asset plus `<root>/<tag>/release.json`.
//! A tag directory is created exactly once; publishing the same tag again is
//! refused.

use crate::error::ReleaseError;
use crate::targets::ReleaseRecord;
use async_trait::async_trait;
use gantry_core::Result;
use gantry_core::ports::{ReleasePublisher, ReleaseReference, ReleaseRequest};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const RECORD_FILE: &str = "release.json";

pub struct DirectoryPublisher {
    root: PathBuf,
}

impl DirectoryPublisher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn write_bundle(
        &self,
        dir: &Path,
        request: &ReleaseRequest,
    ) -> std::result::Result<(), ReleaseError> {
        for asset in &request.assets {
            tokio::fs::write(dir.join(&asset.name), &asset.data).await?;
        }
        let record = ReleaseRecord::from_request(request, false);
        tokio::fs::write(dir.join(RECORD_FILE), serde_json::to_vec_pretty(&record)?).await?;
        Ok(())
    }

    async fn publish_bundle(
        &self,
        request: &ReleaseRequest,
    ) -> std::result::Result<PathBuf, ReleaseError> {
        check_component(&request.tag)?;
        for asset in &request.assets {
            check_component(&asset.name)?;
            if asset.name == RECORD_FILE {
                return Err(ReleaseError::InvalidAsset(asset.name.clone()));
            }
        }

        tokio::fs::create_dir_all(&self.root).await?;
        let dir = self.root.join(&request.tag);
        // create_dir fails if the tag already exists, which makes it the lock.
        match tokio::fs::create_dir(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(ReleaseError::AlreadyPublished(request.tag.clone()));
            }
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = self.write_bundle(&dir, request).await {
            if let Err(cleanup) = tokio::fs::remove_dir_all(&dir).await {
                warn!(dir = %dir.display(), error = %cleanup, "Failed to remove partial release");
            }
            return Err(e);
        }
        Ok(dir)
    }
}

/// Tags and asset names become single path components.
fn check_component(name: &str) -> std::result::Result<(), ReleaseError> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0']);
    if valid {
        Ok(())
    } else {
        Err(ReleaseError::InvalidAsset(name.to_string()))
    }
}

#[async_trait]
impl ReleasePublisher for DirectoryPublisher {
    fn name(&self) -> &str {
        "directory"
    }

    async fn publish(&self, request: &ReleaseRequest) -> Result<ReleaseReference> {
        let dir = self.publish_bundle(request).await?;
        info!(
            tag = %request.tag,
            dir = %dir.display(),
            assets = request.assets.len(),
            "Release bundle written"
        );
        Ok(ReleaseReference {
            reference: dir.display().to_string(),
        })
    }
}
