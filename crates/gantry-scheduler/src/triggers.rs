//! Trigger resolution.

use gantry_core::trigger::{EventKind, ToolchainChannel, TriggerEvent, TriggerParameters};
use tracing::{debug, warn};

/// Maps an inbound event to the parameters shared by every job run of an
/// invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerResolver;

impl TriggerResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve parameters for an event. Total: unknown events, and release
    /// events without a tag, behave like a push and carry no release tag.
    pub fn resolve(&self, event: &TriggerEvent) -> TriggerParameters {
        let (kind, release_tag) = match event {
            TriggerEvent::Push { .. } => (EventKind::Push, None),
            TriggerEvent::PullRequest { .. } => (EventKind::PullRequest, None),
            TriggerEvent::Schedule { .. } => (EventKind::Schedule, None),
            TriggerEvent::ReleasePublished { tag } => match tag.trim() {
                "" => {
                    warn!("Release event without a tag, treating as push");
                    (EventKind::Push, None)
                }
                tag => (EventKind::Release, Some(tag.to_string())),
            },
            TriggerEvent::Other { name } => {
                debug!(event = %name, "Unrecognized trigger event, treating as push");
                (EventKind::Push, None)
            }
        };

        let channel = if kind == EventKind::Schedule {
            ToolchainChannel::Nightly
        } else {
            ToolchainChannel::Stable
        };

        TriggerParameters {
            event: kind,
            channel,
            release_tag,
        }
    }
}
