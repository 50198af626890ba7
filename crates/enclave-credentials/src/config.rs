//! Vault configuration.

use std::fmt;
use std::path::PathBuf;

use enclave_attestation::AttestationConfig;
use serde::Deserialize;

/// Default location of the key record database.
pub const DEFAULT_DATABASE_PATH: &str = "/var/lib/enclave/keys.db";

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub attestation: AttestationConfig,
    /// SQLite database holding key records.
    pub database_path: PathBuf,
    /// Use the passphrase-derived development key instead of attestation.
    /// Only honored by builds with the `insecure-dev-key` feature.
    pub allow_insecure_dev_key: bool,
    pub insecure_dev_passphrase: Option<String>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            attestation: AttestationConfig::default(),
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            allow_insecure_dev_key: false,
            insecure_dev_passphrase: None,
        }
    }
}

impl fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultConfig")
            .field("attestation", &self.attestation)
            .field("database_path", &self.database_path)
            .field("allow_insecure_dev_key", &self.allow_insecure_dev_key)
            .field(
                "insecure_dev_passphrase",
                &self.insecure_dev_passphrase.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl VaultConfig {
    /// Build from `ENCLAVE_*` variables plus the attestation variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self {
            attestation: AttestationConfig::from_lookup(&lookup),
            ..Self::default()
        };

        if let Some(path) = non_empty("ENCLAVE_DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }
        if let Some(flag) = non_empty("ENCLAVE_ALLOW_INSECURE_DEV_KEY") {
            config.allow_insecure_dev_key = matches!(
                flag.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes"
            );
        }
        config.insecure_dev_passphrase = non_empty("ENCLAVE_INSECURE_DEV_PASSPHRASE");
        config
    }
}
