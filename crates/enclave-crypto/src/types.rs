/// AES-GCM IV length used for DEK wrapping (96 bits per NIST recommendation).
pub const WRAP_IV_LENGTH: usize = 12;

/// AES-GCM IV length used for credential ciphertexts.
///
/// Credentials at rest were written with a 128-bit IV; the length is part of
/// the stored format and must not change.
pub const CREDENTIAL_IV_LENGTH: usize = 16;

/// AES-GCM tag length in bytes (128 bits).
pub const AES_GCM_TAG_LENGTH: usize = 16;

/// AES key length in bytes (256 bits).
pub const AES_KEY_LENGTH: usize = 32;

/// Master key identifier length in bytes (truncated SHA-256).
pub const MASTER_KEY_ID_LENGTH: usize = 8;

/// SEV-SNP launch measurement length in bytes (SHA-384 digest).
pub const MEASUREMENT_LENGTH: usize = 48;
