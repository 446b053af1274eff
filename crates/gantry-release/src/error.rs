use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Token variable {0} is not set")]
    MissingToken(String),
    #[error("Release {0} was already published")]
    AlreadyPublished(String),
    #[error("Invalid asset name: {0}")]
    InvalidAsset(String),
    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),
}

impl From<ReleaseError> for gantry_core::Error {
    fn from(err: ReleaseError) -> Self {
        gantry_core::Error::Release(err.to_string())
    }
}
