//! Release publishers for Gantry.
//!
//! Provides delivery of finished releases to a webhook or to a local
//! directory bundle.

pub mod directory;
pub mod error;
pub mod targets;
pub mod webhook;

use gantry_core::ports::ReleasePublisher;
use std::sync::Arc;

pub use directory::DirectoryPublisher;
pub use error::ReleaseError;
pub use targets::{AssetRecord, DirectoryConfig, ReleaseRecord, ReleaseTarget, WebhookConfig};
pub use webhook::WebhookPublisher;

/// Create a publisher for a target. `None` means releases are refused.
pub fn create_publisher(
    target: &ReleaseTarget,
) -> Result<Option<Arc<dyn ReleasePublisher>>, ReleaseError> {
    Ok(match target {
        ReleaseTarget::None => None,
        ReleaseTarget::Directory(c) => Some(Arc::new(DirectoryPublisher::new(c.root.clone()))),
        ReleaseTarget::Webhook(c) => Some(Arc::new(WebhookPublisher::from_config(c.clone())?)),
    })
}
