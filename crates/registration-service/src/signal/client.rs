//! Signal CLI REST API client that delivers verification codes.

use async_trait::async_trait;
use registration_core::{GatewayError, MessagingGateway};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Request body for `/v2/send`.
#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    message: String,
    number: &'a str,
    recipients: Vec<&'a str>,
}

/// Sends one-time codes as Signal messages from a registered account.
#[derive(Clone)]
pub struct SignalGateway {
    client: Client,
    base_url: String,
    sender_number: String,
}

impl SignalGateway {
    /// Create a gateway that sends from `sender_number`.
    pub fn new(
        base_url: impl Into<String>,
        sender_number: impl Into<String>,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            sender_number: sender_number.into(),
        })
    }

    /// Check if the Signal API is healthy.
    pub async fn health_check(&self) -> bool {
        self.client
            .get(format!("{}/v1/health", self.base_url))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

#[async_trait]
impl MessagingGateway for SignalGateway {
    #[instrument(skip(self, code))]
    async fn send(&self, phone_number: &str, code: &SecretString) -> Result<(), GatewayError> {
        let request = SendMessageRequest {
            message: format!(
                "Your registration verification code is {}. Do not share it with anyone.",
                code.expose_secret()
            ),
            number: &self.sender_number,
            recipients: vec![phone_number],
        };

        let response = self
            .client
            .post(format!("{}/v2/send", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| GatewayError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Signal send failed");

            return Err(if status.is_server_error() {
                GatewayError::Unreachable(format!("{} - {}", status, body))
            } else {
                GatewayError::Rejected(format!("{} - {}", status, body))
            });
        }

        debug!(phone_number = %phone_number, "Verification code sent");
        Ok(())
    }
}
