use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid key length: expected {expected} bytes, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("Invalid IV length: expected {expected} bytes, got {got}")]
    InvalidIvLength { expected: usize, got: usize },

    #[error("Invalid auth tag length: expected {expected} bytes, got {got}")]
    InvalidTagLength { expected: usize, got: usize },

    #[error("Invalid DEK length: expected {expected} bytes, got {got}")]
    InvalidDekLength { expected: usize, got: usize },

    #[error("Invalid master key id: {0}")]
    InvalidMasterKeyId(String),

    #[error("Encrypted data too short")]
    DataTooShort,

    #[error("Measurement must not be empty")]
    EmptyMeasurement,

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: authentication tag mismatch")]
    DecryptionFailed,

    #[error("DEK wrap failed: {0}")]
    WrapFailed(String),

    #[error("DEK unwrap failed: authentication tag mismatch")]
    UnwrapAuthenticationFailed,

    #[error("Key derivation failed: {0}")]
    DerivationFailed(String),

    #[error("Random number generation failed: {0}")]
    RngFailed(String),
}
