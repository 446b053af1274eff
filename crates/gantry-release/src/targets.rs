//! Release target configuration and the wire record sent to targets.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use gantry_core::ports::ReleaseRequest;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Where releases go.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReleaseTarget {
    /// No publisher. Release events are refused.
    #[default]
    None,
    Directory(DirectoryConfig),
    Webhook(WebhookConfig),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryConfig {
    pub root: PathBuf,
}

/// Generic webhook configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    /// Environment variable holding a bearer token.
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u32,
}

fn default_timeout() -> u32 {
    30
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            token_env: None,
            headers: HashMap::new(),
            timeout_seconds: default_timeout(),
        }
    }
}

/// Release metadata as sent to webhooks and written to `release.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRecord {
    pub pipeline: String,
    pub tag: String,
    pub invocation_id: String,
    pub published_at: DateTime<Utc>,
    pub assets: Vec<AssetRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub name: String,
    pub size_bytes: u64,
    pub sha256: String,
    /// Base64 content. Omitted when the bytes travel separately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ReleaseRecord {
    pub fn from_request(request: &ReleaseRequest, embed_content: bool) -> Self {
        Self {
            pipeline: request.pipeline.clone(),
            tag: request.tag.clone(),
            invocation_id: request.invocation.to_string(),
            published_at: Utc::now(),
            assets: request
                .assets
                .iter()
                .map(|asset| AssetRecord {
                    name: asset.name.clone(),
                    size_bytes: asset.data.len() as u64,
                    sha256: asset.checksum.clone(),
                    content: embed_content.then(|| STANDARD.encode(&asset.data)),
                })
                .collect(),
        }
    }
}
