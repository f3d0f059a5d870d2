//! Identity-document capture and storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// Default ceiling for inline image payloads (10 MiB).
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// Longest accepted image reference.
pub const MAX_REFERENCE_LEN: usize = 2048;

/// Document store errors.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Document not found: {0}")]
    NotFound(Uuid),
}

/// An image handed over by the capture or picker layer. Never decoded.
#[derive(Clone, PartialEq, Eq)]
pub enum CapturedImage {
    /// Raw image bytes
    Inline(Vec<u8>),
    /// A URI owned by the capture layer
    Reference(String),
}

impl CapturedImage {
    /// SHA-256 of the payload, hex encoded.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        match self {
            CapturedImage::Inline(bytes) => hasher.update(bytes),
            CapturedImage::Reference(uri) => hasher.update(uri.as_bytes()),
        }
        hex::encode(hasher.finalize())
    }

    /// Size of an inline payload.
    pub fn size_bytes(&self) -> Option<usize> {
        match self {
            CapturedImage::Inline(bytes) => Some(bytes.len()),
            CapturedImage::Reference(_) => None,
        }
    }
}

// Keep image bytes out of logs.
impl fmt::Debug for CapturedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapturedImage::Inline(bytes) => write!(f, "Inline({} bytes)", bytes.len()),
            CapturedImage::Reference(uri) => f.debug_tuple("Reference").field(uri).finish(),
        }
    }
}

/// Immutable metadata for a captured identity document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentRecord {
    pub id: Uuid,
    pub captured_at: DateTime<Utc>,
    /// Payload size, for inline captures
    pub size_bytes: Option<usize>,
    /// SHA-256 of the payload
    pub digest: String,
}

/// A document record together with its payload.
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub record: DocumentRecord,
    pub image: CapturedImage,
}

/// Holds document payloads while a registration still needs them.
///
/// Owners release payloads with [`DocumentStore::remove`] once a document is
/// superseded or its registration is finished; the [`DocumentRecord`]
/// metadata lives on in the registration's history.
#[derive(Clone)]
pub struct DocumentStore {
    documents: Arc<RwLock<HashMap<Uuid, StoredDocument>>>,
    max_image_bytes: usize,
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IMAGE_BYTES)
    }
}

impl DocumentStore {
    pub fn new(max_image_bytes: usize) -> Self {
        Self {
            documents: Arc::new(RwLock::new(HashMap::new())),
            max_image_bytes,
        }
    }

    /// Reject empty or oversized payloads and blank references.
    pub fn validate_image(&self, image: &CapturedImage) -> Result<(), DocumentError> {
        match image {
            CapturedImage::Inline(bytes) if bytes.is_empty() => {
                Err(DocumentError::InvalidImage("image payload is empty".into()))
            }
            CapturedImage::Inline(bytes) if bytes.len() > self.max_image_bytes => {
                Err(DocumentError::InvalidImage(format!(
                    "image payload of {} bytes exceeds limit of {} bytes",
                    bytes.len(),
                    self.max_image_bytes
                )))
            }
            CapturedImage::Reference(uri) if uri.trim().is_empty() => {
                Err(DocumentError::InvalidImage("image reference is empty".into()))
            }
            CapturedImage::Reference(uri) if uri.len() > MAX_REFERENCE_LEN => {
                Err(DocumentError::InvalidImage(format!(
                    "image reference longer than {} characters",
                    MAX_REFERENCE_LEN
                )))
            }
            _ => Ok(()),
        }
    }

    /// Validate and store a captured document, returning its new record.
    pub async fn capture_document(
        &self,
        image: CapturedImage,
    ) -> Result<DocumentRecord, DocumentError> {
        self.validate_image(&image)?;

        let record = DocumentRecord {
            id: Uuid::new_v4(),
            captured_at: Utc::now(),
            size_bytes: image.size_bytes(),
            digest: image.digest(),
        };

        self.documents.write().await.insert(
            record.id,
            StoredDocument {
                record: record.clone(),
                image,
            },
        );

        info!(document_id = %record.id, size_bytes = ?record.size_bytes, "Identity document captured");
        Ok(record)
    }

    /// Fetch a stored document by id.
    pub async fn get(&self, id: Uuid) -> Result<StoredDocument, DocumentError> {
        let document = self
            .documents
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(DocumentError::NotFound(id))?;

        debug!(document_id = %id, "Loaded stored document");
        Ok(document)
    }

    /// Drop a stored payload. Returns whether it was present.
    pub async fn remove(&self, id: Uuid) -> bool {
        let removed = self.documents.write().await.remove(&id).is_some();
        if removed {
            debug!(document_id = %id, "Released stored document");
        }
        removed
    }

    pub async fn count(&self) -> usize {
        self.documents.read().await.len()
    }
}
