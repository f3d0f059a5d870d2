//! Persistence collaborator for finalized registrations.

use crate::aggregate::RegistrationAggregate;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Archive errors.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<std::io::Error> for ArchiveError {
    fn from(e: std::io::Error) -> Self {
        ArchiveError::Storage(e.to_string())
    }
}

/// Receives each submitted registration exactly once.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RegistrationArchive: Send + Sync {
    async fn store(&self, registration: &RegistrationAggregate) -> Result<(), ArchiveError>;
}

/// In-memory archive for tests or when persistence is disabled.
#[derive(Clone, Default)]
pub struct MemoryArchive {
    registrations: Arc<RwLock<Vec<RegistrationAggregate>>>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: Uuid) -> Option<RegistrationAggregate> {
        self.registrations
            .read()
            .await
            .iter()
            .find(|r| r.id() == id)
            .cloned()
    }

    pub async fn count(&self) -> usize {
        self.registrations.read().await.len()
    }
}

#[async_trait]
impl RegistrationArchive for MemoryArchive {
    async fn store(&self, registration: &RegistrationAggregate) -> Result<(), ArchiveError> {
        self.registrations.write().await.push(registration.clone());
        debug!(registration_id = %registration.id(), "Memory archive: stored registration");
        Ok(())
    }
}
