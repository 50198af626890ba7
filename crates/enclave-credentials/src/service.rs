//! Credential encryption service.
//!
//! Encrypted credential format, hex encoded:
//!
//! ```text
//! [16 bytes: IV][16 bytes: GCM tag][ciphertext]
//! ```
//!
//! The format carries no key version. Ciphertexts are only readable with the
//! DEK that produced them.

use std::sync::Arc;

use enclave_attestation::SevSnpProvider;
use enclave_crypto::{open_credential, seal_credential, sha256_hex, MasterKey, MasterKeyId};
use enclave_keys::{KeyManager, MigrationOutcome, RotationOutcome, SqliteKeyStore};
use tracing::{info, warn};

use crate::config::VaultConfig;
use crate::error::{CredentialError, Result};
use crate::key_source::{KeyMode, KeySource};

pub struct CredentialEncryption {
    source: KeySource,
}

impl CredentialEncryption {
    pub fn new(source: KeySource) -> Self {
        Self { source }
    }

    pub fn attested(manager: Arc<KeyManager>) -> Self {
        Self::new(KeySource::Attested(manager))
    }

    /// Wire up attestation, the key store, and the key manager from
    /// configuration.
    pub fn from_config(config: &VaultConfig) -> Result<Self> {
        if config.allow_insecure_dev_key {
            return Self::insecure_from_config(config);
        }
        let provider = SevSnpProvider::from_config(&config.attestation)?;
        let store = SqliteKeyStore::open(&config.database_path)?;
        info!(database = %config.database_path.display(), "credential vault configured");
        Ok(Self::attested(Arc::new(KeyManager::new(
            Arc::new(provider),
            Arc::new(store),
        ))))
    }

    #[cfg(feature = "insecure-dev-key")]
    fn insecure_from_config(config: &VaultConfig) -> Result<Self> {
        let passphrase = config.insecure_dev_passphrase.as_deref().ok_or_else(|| {
            CredentialError::Config(
                "allow_insecure_dev_key is set but no passphrase is configured".to_string(),
            )
        })?;
        Ok(Self::new(KeySource::insecure_development(passphrase)?))
    }

    #[cfg(not(feature = "insecure-dev-key"))]
    fn insecure_from_config(_config: &VaultConfig) -> Result<Self> {
        Err(CredentialError::Config(
            "allow_insecure_dev_key is set but this build excludes the insecure development key"
                .to_string(),
        ))
    }

    pub fn key_mode(&self) -> KeyMode {
        self.source.mode()
    }

    /// Encrypt with the current DEK and a fresh IV.
    pub async fn encrypt(&self, plaintext: &str) -> Result<String> {
        self.source
            .with_encryption_key(|dek| encrypt_with(dek.as_bytes(), plaintext))
            .await?
    }

    pub async fn decrypt(&self, encoded: &str) -> Result<String> {
        let dek = self.source.dek().await?;
        decrypt_with(dek.as_bytes(), encoded)
    }

    /// SHA-256 fingerprint, lowercase hex. Not keyed.
    pub fn hash(text: &str) -> String {
        sha256_hex(text)
    }

    /// Fingerprint of a credential set for duplicate detection.
    pub fn create_credentials_hash(
        api_key: &str,
        api_secret: &str,
        passphrase: Option<&str>,
    ) -> String {
        Self::hash(&format!(
            "{api_key}:{api_secret}:{}",
            passphrase.unwrap_or("")
        ))
    }

    /// Rotate the DEK and re-encrypt `ciphertexts` under the new one.
    ///
    /// Every ciphertext is decrypted and re-encrypted before the new key is
    /// committed; if any step fails, nothing is rotated. Encryptions started
    /// during the rotation wait for it and use the new key. Output order
    /// matches input order.
    pub async fn rotate_and_reencrypt(&self, ciphertexts: &[String]) -> Result<Vec<String>> {
        let manager = self.manager("rotation")?;
        let (outcome, reencrypted) = manager
            .rotate_dek_with(|old, new| -> Result<Vec<String>> {
                ciphertexts
                    .iter()
                    .map(|c| {
                        let plaintext = decrypt_with(old.as_bytes(), c)?;
                        encrypt_with(new.as_bytes(), &plaintext)
                    })
                    .collect()
            })
            .await?;

        info!(
            count = reencrypted.len(),
            new_version = %outcome.new_version,
            "credentials re-encrypted under rotated DEK"
        );
        Ok(reencrypted)
    }

    pub async fn is_hardware_key_available(&self) -> bool {
        match self.source.manager() {
            Some(manager) => manager.is_hardware_key_available().await,
            None => false,
        }
    }

    pub async fn current_master_key_id(&self) -> Result<MasterKeyId> {
        Ok(self
            .manager("master key id")?
            .current_master_key_id()
            .await?)
    }

    /// Replace the DEK. Existing ciphertexts become unreadable; see
    /// [`Self::rotate_and_reencrypt`].
    pub async fn rotate_dek(&self) -> Result<RotationOutcome> {
        warn!("rotating DEK without re-encryption");
        Ok(self.manager("rotation")?.rotate_dek().await?)
    }

    pub async fn migrate_dek_to_new_master_key(
        &self,
        old_master_key: &MasterKey,
    ) -> Result<MigrationOutcome> {
        Ok(self
            .manager("migration")?
            .migrate_dek_to_new_master_key(old_master_key)
            .await?)
    }

    fn manager(&self, operation: &'static str) -> Result<&Arc<KeyManager>> {
        self.source
            .manager()
            .ok_or(CredentialError::Unsupported(operation))
    }
}

fn encrypt_with(key: &[u8], plaintext: &str) -> Result<String> {
    Ok(hex::encode(seal_credential(key, plaintext.as_bytes())?))
}

fn decrypt_with(key: &[u8], encoded: &str) -> Result<String> {
    let blob = hex::decode(encoded.trim())
        .map_err(|e| CredentialError::MalformedCiphertext(format!("invalid hex: {e}")))?;
    let plaintext = open_credential(key, &blob)?;
    String::from_utf8(plaintext)
        .map_err(|_| CredentialError::MalformedCiphertext("plaintext is not UTF-8".to_string()))
}
