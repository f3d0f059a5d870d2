//! Encrypted file archive for submitted registrations.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use async_trait::async_trait;
use rand::RngCore;
use registration_core::{ArchiveError, RegistrationAggregate, RegistrationArchive};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Key derivation path for archive encryption.
const KEY_DERIVATION_PATH: &str = "registration-service/archive";

/// Nonce size for AES-GCM (96 bits = 12 bytes).
const NONCE_SIZE: usize = 12;

/// Writes each submitted registration to `<dir>/<id>.enc`.
///
/// File format: [12 bytes nonce][ciphertext with auth tag]
pub struct EncryptedArchive {
    directory: PathBuf,
    key: [u8; 32],
}

impl EncryptedArchive {
    /// Create an archive whose key is derived from `secret`.
    pub fn new(directory: impl Into<PathBuf>, secret: &SecretString) -> Self {
        Self::with_key(directory, derive_key(secret))
    }

    /// Create an archive with a pre-derived key.
    pub fn with_key(directory: impl Into<PathBuf>, key: [u8; 32]) -> Self {
        Self {
            directory: directory.into(),
            key,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.directory.join(format!("{}.enc", id))
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, ArchiveError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| ArchiveError::Encryption("AES-GCM encryption failed".into()))?;

        let mut data = nonce_bytes.to_vec();
        data.extend(ciphertext);
        Ok(data)
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, ArchiveError> {
        if data.len() < NONCE_SIZE {
            return Err(ArchiveError::Encryption("Archive file too short".into()));
        }

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let nonce = Nonce::from_slice(&data[..NONCE_SIZE]);

        cipher.decrypt(nonce, &data[NONCE_SIZE..]).map_err(|_| {
            ArchiveError::Encryption(
                "Failed to decrypt archive file. The archive secret may have changed.".into(),
            )
        })
    }

    /// Read back an archived registration.
    ///
    /// Returns `None` if nothing was archived under `id`.
    pub async fn load(&self, id: Uuid) -> Result<Option<RegistrationAggregate>, ArchiveError> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }

        let data = fs::read(&path).await?;
        let plaintext = self.decrypt(&data)?;
        Ok(Some(serde_json::from_slice(&plaintext)?))
    }

    /// Number of archived registrations on disk.
    pub async fn count(&self) -> Result<usize, ArchiveError> {
        if !self.directory.exists() {
            return Ok(0);
        }

        let mut entries = fs::read_dir(&self.directory).await?;
        let mut count = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().is_some_and(|ext| ext == "enc") {
                count += 1;
            }
        }
        Ok(count)
    }
}

/// SHA256(secret || key_derivation_path)
fn derive_key(secret: &SecretString) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(secret.expose_secret().as_bytes());
    hasher.update(KEY_DERIVATION_PATH.as_bytes());
    hasher.finalize().into()
}

#[async_trait]
impl RegistrationArchive for EncryptedArchive {
    #[instrument(skip_all, fields(registration_id = %registration.id()))]
    async fn store(&self, registration: &RegistrationAggregate) -> Result<(), ArchiveError> {
        let plaintext = serde_json::to_vec(registration)?;
        let data = self.encrypt(&plaintext)?;

        fs::create_dir_all(&self.directory).await?;

        // Write atomically using temp file + rename
        let path = self.path_for(registration.id());
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &data).await?;
        fs::rename(&temp_path, &path).await?;

        debug!("Archived encrypted registration ({} bytes) to {:?}", data.len(), path);
        info!("Registration archived");
        Ok(())
    }
}
