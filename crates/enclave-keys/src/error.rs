use enclave_attestation::AttestationError;
use enclave_crypto::{CryptoError, MasterKeyId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("An active key record already exists")]
    ActiveRecordExists,

    #[error("Active key record changed: expected {expected}")]
    ActiveRecordChanged { expected: String },

    #[error("Key record {0} not found")]
    NotFound(String),

    #[error("Corrupt key record: {0}")]
    Corrupt(String),

    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Store task failed: {0}")]
    Task(String),
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error(transparent)]
    Attestation(#[from] AttestationError),

    #[error("Attestation report has not been verified")]
    UnverifiedReport,

    #[error(
        "Master key changed: active DEK is bound to {stored}, running code derives {current}; \
         run migrate_dek_to_new_master_key with the previous master key"
    )]
    MigrationRequired {
        stored: MasterKeyId,
        current: MasterKeyId,
    },

    #[error("Active DEK is already bound to the current master key")]
    MigrationNotRequired,

    #[error("No active key record")]
    NoActiveRecord,

    #[error("DEK unwrap failed: authentication tag mismatch")]
    UnwrapAuthenticationFailed,

    #[error("DEK wrap failed: {0}")]
    WrapFailed(String),

    #[error("Invalid key record: {0}")]
    InvalidRecord(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Crypto(CryptoError),
}

impl From<CryptoError> for KeyError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::UnwrapAuthenticationFailed => KeyError::UnwrapAuthenticationFailed,
            CryptoError::WrapFailed(reason) => KeyError::WrapFailed(reason),
            other => KeyError::Crypto(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, KeyError>;
