//! Trigger events and the per-invocation parameters derived from them.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Inbound event that starts a pipeline invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerEvent {
    Push {
        #[serde(default)]
        branch: Option<String>,
    },
    PullRequest {
        #[serde(default)]
        number: Option<u64>,
    },
    /// Cron-triggered tick.
    Schedule {
        #[serde(default)]
        cron: Option<String>,
    },
    #[serde(rename = "release.published")]
    ReleasePublished { tag: String },
    /// Anything the engine does not recognize.
    Other { name: String },
}

impl TriggerEvent {
    /// Build an event from its wire kind, e.g. `release.published`.
    ///
    /// Unknown kinds become [`TriggerEvent::Other`].
    pub fn from_kind(kind: &str, tag: Option<String>) -> Self {
        match kind {
            "push" => TriggerEvent::Push { branch: None },
            "pull_request" => TriggerEvent::PullRequest { number: None },
            "schedule" => TriggerEvent::Schedule { cron: None },
            "release" | "release.published" => TriggerEvent::ReleasePublished {
                tag: tag.unwrap_or_default(),
            },
            other => TriggerEvent::Other {
                name: other.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Push,
    PullRequest,
    Schedule,
    Release,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Push => "push",
            EventKind::PullRequest => "pull_request",
            EventKind::Schedule => "schedule",
            EventKind::Release => "release",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ToolchainChannel {
    #[default]
    Stable,
    Nightly,
}

impl ToolchainChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolchainChannel::Stable => "stable",
            ToolchainChannel::Nightly => "nightly",
        }
    }
}

impl fmt::Display for ToolchainChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable values derived once per invocation from the inciting event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TriggerParameters {
    pub event: EventKind,
    pub channel: ToolchainChannel,
    /// Present only for release events.
    pub release_tag: Option<String>,
}

impl TriggerParameters {
    pub fn is_release(&self) -> bool {
        self.event == EventKind::Release
    }

    /// Look up a `trigger.*` field by name, as used by conditions and step
    /// templates. Returns `None` for unknown fields.
    pub fn field(&self, name: &str) -> Option<String> {
        match name {
            "event" => Some(self.event.as_str().to_string()),
            "channel" | "toolchain" => Some(self.channel.as_str().to_string()),
            "release_tag" | "tag" => Some(self.release_tag.clone().unwrap_or_default()),
            "is_release" => Some(self.is_release().to_string()),
            _ => None,
        }
    }
}
