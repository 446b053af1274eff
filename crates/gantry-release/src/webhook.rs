//! Publishes releases by POSTing a JSON record to a webhook.

use crate::error::ReleaseError;
use crate::targets::{ReleaseRecord, WebhookConfig};
use async_trait::async_trait;
use gantry_core::Result;
use gantry_core::ports::{ReleasePublisher, ReleaseReference, ReleaseRequest};
use tracing::{debug, info};

/// Generic webhook publisher.
pub struct WebhookPublisher {
    config: WebhookConfig,
    token: Option<String>,
    client: reqwest::Client,
}

impl WebhookPublisher {
    pub fn new(config: WebhookConfig) -> Self {
        let timeout = config.timeout_seconds;
        Self {
            config,
            token: None,
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(u64::from(timeout)))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Build from configuration, reading the bearer token from `token_env`.
    pub fn from_config(config: WebhookConfig) -> std::result::Result<Self, ReleaseError> {
        let token = match &config.token_env {
            Some(var) => Some(
                std::env::var(var).map_err(|_| ReleaseError::MissingToken(var.clone()))?,
            ),
            None => None,
        };
        Ok(Self::new(config).with_token(token))
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    async fn send(&self, request: &ReleaseRequest) -> std::result::Result<String, ReleaseError> {
        debug!(url = %self.config.url, tag = %request.tag, "Sending release webhook");

        let record = ReleaseRecord::from_request(request, true);
        let mut http = self.client.post(&self.config.url);
        for (key, value) in &self.config.headers {
            http = http.header(key, value);
        }
        if let Some(token) = &self.token {
            http = http.bearer_auth(token);
        }

        let response = http.json(&record).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ReleaseError::DeliveryFailed(format!(
                "webhook returned {status}: {body}"
            )));
        }

        // Prefer a location reported by the receiver.
        let body: serde_json::Value = response.json().await.unwrap_or_default();
        let reference = ["reference", "url", "html_url"]
            .iter()
            .find_map(|key| body.get(key).and_then(|v| v.as_str()))
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}#{}", self.config.url, request.tag));
        Ok(reference)
    }
}

#[async_trait]
impl ReleasePublisher for WebhookPublisher {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn publish(&self, request: &ReleaseRequest) -> Result<ReleaseReference> {
        let reference = self.send(request).await?;
        info!(tag = %request.tag, reference = %reference, "Release webhook delivered");
        Ok(ReleaseReference { reference })
    }
}
