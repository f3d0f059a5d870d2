//! Out-of-band delivery of one-time codes.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

/// Errors reported by a messaging gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The gateway could not be reached or timed out.
    #[error("Messaging gateway unreachable: {0}")]
    Unreachable(String),

    /// The gateway refused to deliver the message.
    #[error("Messaging gateway rejected delivery: {0}")]
    Rejected(String),
}

/// Delivers a literal one-time code to a contact number.
///
/// The code is only ever handed to the gateway; it never travels back
/// through the verifier's own result types.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Send `code` to `phone_number`.
    async fn send(&self, phone_number: &str, code: &SecretString) -> Result<(), GatewayError>;
}

/// Gateway double that records every code it is asked to deliver.
#[derive(Clone, Default)]
pub struct RecordingGateway {
    delivered: Arc<RwLock<HashMap<String, Vec<String>>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent deliveries fail with [`GatewayError::Unreachable`].
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Most recent code delivered to a number.
    pub async fn last_code(&self, phone_number: &str) -> Option<String> {
        self.delivered
            .read()
            .await
            .get(phone_number)
            .and_then(|codes| codes.last().cloned())
    }

    /// Number of codes delivered to a number.
    pub async fn delivered_count(&self, phone_number: &str) -> usize {
        self.delivered
            .read()
            .await
            .get(phone_number)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessagingGateway for RecordingGateway {
    async fn send(&self, phone_number: &str, code: &SecretString) -> Result<(), GatewayError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(GatewayError::Unreachable("recording gateway set to fail".into()));
        }

        self.delivered
            .write()
            .await
            .entry(phone_number.to_string())
            .or_default()
            .push(code.expose_secret().clone());

        debug!(phone_number = %phone_number, "Recorded code delivery");
        Ok(())
    }
}
