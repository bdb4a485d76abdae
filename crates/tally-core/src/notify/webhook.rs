use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use url::Url;

use super::payload::sign;
use super::{DeliveryError, Transport, WebhookPayload};
use crate::storage::NotificationSettings;

pub const SIGNATURE_HEADER: &str = "X-Tally-Signature";
pub const EVENT_HEADER: &str = "X-Tally-Event";

/// Posts payloads as JSON to one HTTP endpoint.
pub struct WebhookTransport {
    client: reqwest::Client,
    url: Url,
    secret: Option<Vec<u8>>,
}

impl WebhookTransport {
    pub fn new(url: &str, secret: &str, timeout: Duration) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: Url::parse(url)?,
            secret: (!secret.is_empty()).then(|| secret.as_bytes().to_vec()),
        })
    }

    pub fn from_settings(settings: &NotificationSettings) -> Result<Self, DeliveryError> {
        Self::new(
            &settings.webhook_url,
            &settings.secret,
            Duration::from_secs(settings.delivery_timeout_secs),
        )
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Transport for WebhookTransport {
    async fn deliver(&self, payload: &WebhookPayload) -> Result<(), DeliveryError> {
        let body = payload.to_bytes()?;
        let mut request = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(EVENT_HEADER, payload.event_type.as_str());
        if let Some(secret) = &self.secret {
            request = request.header(SIGNATURE_HEADER, format!("sha256={}", sign(secret, &body)?));
        }

        let response = request.body(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Status {
                status: status.as_u16(),
            });
        }
        tracing::debug!(event_id = %payload.event_id, %status, "webhook delivered");
        Ok(())
    }
}
