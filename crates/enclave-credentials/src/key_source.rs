//! Where the credential DEK comes from.

use std::sync::Arc;

use enclave_crypto::Dek;
use enclave_keys::KeyManager;
use serde::Serialize;

use crate::error::Result;

/// Reported by [`crate::CredentialEncryption::key_mode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyMode {
    Attested,
    InsecureDevelopment,
}

pub enum KeySource {
    /// DEK managed by the attestation-bound key manager.
    Attested(Arc<KeyManager>),
    /// Static DEK derived from a passphrase. Provides no hardware binding.
    #[cfg(feature = "insecure-dev-key")]
    InsecureDevelopment(Arc<Dek>),
}

#[cfg(feature = "insecure-dev-key")]
const DEV_DEK_SALT: &[u8] = b"insecure-dev-fallback";
#[cfg(feature = "insecure-dev-key")]
const DEV_DEK_INFO: &[u8] = b"track-record-enclave/dev-dek/v1";

impl KeySource {
    /// Passphrase-derived development key. Anyone who knows the passphrase
    /// can decrypt every credential.
    #[cfg(feature = "insecure-dev-key")]
    pub fn insecure_development(passphrase: &str) -> Result<Self> {
        use crate::error::CredentialError;

        if passphrase.is_empty() {
            return Err(CredentialError::Config(
                "insecure development key requires a passphrase".to_string(),
            ));
        }
        let okm = enclave_crypto::hkdf_derive(passphrase.as_bytes(), DEV_DEK_SALT, DEV_DEK_INFO)?;
        tracing::error!(
            "INSECURE DEVELOPMENT KEY IN USE: credentials are protected by a static \
             passphrase-derived key with no attestation binding"
        );
        Ok(KeySource::InsecureDevelopment(Arc::new(Dek::from_bytes(okm))))
    }

    pub fn mode(&self) -> KeyMode {
        match self {
            KeySource::Attested(_) => KeyMode::Attested,
            #[cfg(feature = "insecure-dev-key")]
            KeySource::InsecureDevelopment(_) => KeyMode::InsecureDevelopment,
        }
    }

    pub(crate) async fn dek(&self) -> Result<Arc<Dek>> {
        match self {
            KeySource::Attested(manager) => Ok(manager.get_current_dek().await?),
            #[cfg(feature = "insecure-dev-key")]
            KeySource::InsecureDevelopment(dek) => Ok(Arc::clone(dek)),
        }
    }

    /// Run `f` with the DEK new ciphertexts must use. Rotation cannot retire
    /// the key while `f` runs.
    pub(crate) async fn with_encryption_key<T>(&self, f: impl FnOnce(&Dek) -> T) -> Result<T> {
        match self {
            KeySource::Attested(manager) => {
                let lease = manager.lease_dek().await?;
                Ok(f(&*lease))
            }
            #[cfg(feature = "insecure-dev-key")]
            KeySource::InsecureDevelopment(dek) => Ok(f(dek.as_ref())),
        }
    }

    pub(crate) fn manager(&self) -> Option<&Arc<KeyManager>> {
        match self {
            KeySource::Attested(manager) => Some(manager),
            #[cfg(feature = "insecure-dev-key")]
            KeySource::InsecureDevelopment(_) => None,
        }
    }
}
