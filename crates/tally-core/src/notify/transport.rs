use std::io;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::WebhookPayload;

/// Why a delivery attempt failed.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("endpoint answered with HTTP {status}")]
    Status { status: u16 },

    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid endpoint URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to sign payload")]
    Signing,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Sends one payload somewhere. Implementations must bound their own
/// network waits; the retry queue adds a timeout on top.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, payload: &WebhookPayload) -> Result<(), DeliveryError>;
}
