//! SMS transport: outbound sends and inbound webhook signature validation.
//!
//! The provider is specified only by its interface: fire-and-forget sends
//! with per-send success reporting, and HMAC-signed inbound webhooks.
//! Delivery guarantees stay with the provider; nothing here retries.

pub mod signature;

use crate::config::SmsConfig;
use crate::error::RidepoolError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// An inbound SMS as posted by the provider's webhook.
///
/// Field names mirror the provider's form parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundSms {
    /// Provider-assigned message identifier
    #[serde(rename = "MessageSid")]
    pub message_sid: String,
    /// Sender phone number
    #[serde(rename = "From")]
    pub from: String,
    /// Recipient phone number (our number)
    #[serde(rename = "To")]
    pub to: String,
    /// Message text
    #[serde(rename = "Body")]
    pub body: String,
}

/// Outbound SMS sender.
#[async_trait]
pub trait SmsTransport: Send + Sync {
    /// Send `body` to `to`. Success means the provider accepted the message,
    /// not that it was delivered.
    async fn send(&self, to: &str, body: &str) -> Result<(), RidepoolError>;
}

/// SMS provider HTTP client.
///
/// Posts form-encoded message creation requests authenticated with the
/// account sid and shared secret.
pub struct HttpSmsClient {
    client: Client,
    config: SmsConfig,
}

impl HttpSmsClient {
    /// Creates a new SMS client.
    ///
    /// # Errors
    ///
    /// Returns `RidepoolError::Transport` if the HTTP client cannot be built.
    pub fn new(config: SmsConfig) -> Result<Self, RidepoolError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RidepoolError::Transport(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl SmsTransport for HttpSmsClient {
    async fn send(&self, to: &str, body: &str) -> Result<(), RidepoolError> {
        let url = format!(
            "{}/Accounts/{}/Messages.json",
            self.config.api_base, self.config.account_sid
        );
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&[
                ("To", to),
                ("From", self.config.from_number.as_str()),
                ("Body", body),
            ])
            .send()
            .await
            .map_err(|e| RidepoolError::Transport(format!("send failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            debug!(to, "sent message");
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(RidepoolError::Transport(format!(
                "send returned {}: {}",
                status, text
            )))
        }
    }
}
