//! HKDF-SHA256 key derivation.

use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::CryptoError;
use crate::types::AES_KEY_LENGTH;

/// Derive a 256-bit key using HKDF-SHA256.
///
/// # Arguments
/// * `ikm` - Input keying material
/// * `salt` - Salt (an empty salt is equivalent to the RFC 5869 default)
/// * `info` - Context and application-specific info
///
/// # Returns
/// 32-byte derived key
pub fn hkdf_derive(
    ikm: &[u8],
    salt: &[u8],
    info: &[u8],
) -> Result<[u8; AES_KEY_LENGTH], CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = [0u8; AES_KEY_LENGTH];
    hk.expand(info, &mut okm)
        .map_err(|e| CryptoError::DerivationFailed(format!("HKDF expand failed: {}", e)))?;
    Ok(okm)
}
