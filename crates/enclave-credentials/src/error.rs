use enclave_attestation::AttestationError;
use enclave_crypto::CryptoError;
use enclave_keys::{KeyError, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("Credential decryption failed: authentication tag mismatch")]
    DecryptionFailed,

    #[error("Malformed encrypted credential: {0}")]
    MalformedCiphertext(String),

    #[error(transparent)]
    Crypto(CryptoError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0} is not available in insecure development mode")]
    Unsupported(&'static str),
}

impl From<CryptoError> for CredentialError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::DecryptionFailed => CredentialError::DecryptionFailed,
            CryptoError::DataTooShort => {
                CredentialError::MalformedCiphertext("shorter than IV and tag".to_string())
            }
            other => CredentialError::Crypto(other),
        }
    }
}

impl From<AttestationError> for CredentialError {
    fn from(err: AttestationError) -> Self {
        CredentialError::Key(KeyError::Attestation(err))
    }
}

impl From<StoreError> for CredentialError {
    fn from(err: StoreError) -> Self {
        CredentialError::Key(KeyError::Store(err))
    }
}

pub type Result<T> = std::result::Result<T, CredentialError>;
