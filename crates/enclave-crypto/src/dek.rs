//! Data Encryption Key (DEK) primitives.
//!
//! One random 256-bit DEK encrypts every credential. The DEK is wrapped
//! (encrypted) with the measurement-derived master key using AES-256-GCM and
//! a fresh 12-byte IV per wrap. IV, tag and ciphertext are kept as separate
//! fields so they map onto the persisted key record.

use crate::aes_gcm::{open_detached, random_bytes, seal_detached};
use crate::error::CryptoError;
use crate::keys::{Dek, MasterKey, MasterKeyId};
use crate::types::{AES_GCM_TAG_LENGTH, AES_KEY_LENGTH, WRAP_IV_LENGTH};

/// A DEK encrypted under a master key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedDek {
    pub encrypted_dek: Vec<u8>,
    pub iv: [u8; WRAP_IV_LENGTH],
    pub auth_tag: [u8; AES_GCM_TAG_LENGTH],
}

/// Binds a wrapped DEK to the record metadata it is stored with.
///
/// Bound as AAD so that a wrapped DEK cannot be moved into a record with a
/// different master key id or version without failing authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapContext {
    pub master_key_id: MasterKeyId,
    pub key_version: String,
}

/// Build AAD from a wrap context.
/// Format: [8 bytes: master key id][4 bytes: version length (u32 BE)][version UTF-8]
fn build_aad(context: &WrapContext) -> Vec<u8> {
    let version = context.key_version.as_bytes();
    let mut aad = Vec::with_capacity(8 + 4 + version.len());
    aad.extend_from_slice(context.master_key_id.as_bytes());
    aad.extend_from_slice(&(version.len() as u32).to_be_bytes());
    aad.extend_from_slice(version);
    aad
}

/// Generate a random 256-bit Data Encryption Key.
pub fn generate_dek() -> Result<Dek, CryptoError> {
    random_bytes::<AES_KEY_LENGTH>().map(Dek::from_bytes)
}

/// Wrap a DEK with a master key.
///
/// # Arguments
/// * `dek` - Data Encryption Key
/// * `master_key` - Key Encryption Key derived from the measurement
/// * `context` - Optional record binding; `None` wraps without AAD
pub fn wrap_dek(
    dek: &Dek,
    master_key: &MasterKey,
    context: Option<&WrapContext>,
) -> Result<WrappedDek, CryptoError> {
    let iv = random_bytes::<WRAP_IV_LENGTH>()?;
    let aad = context.map(build_aad).unwrap_or_default();
    let sealed = seal_detached(master_key.as_bytes(), &iv, dek.as_bytes(), &aad)
        .map_err(|e| CryptoError::WrapFailed(e.to_string()))?;

    Ok(WrappedDek {
        encrypted_dek: sealed.ciphertext,
        iv,
        auth_tag: sealed.tag,
    })
}

/// Unwrap a DEK.
///
/// A tag mismatch means the master key (or bound context) is wrong, or the
/// record was tampered with. No plaintext is returned in that case.
pub fn unwrap_dek(
    wrapped: &WrappedDek,
    master_key: &MasterKey,
    context: Option<&WrapContext>,
) -> Result<Dek, CryptoError> {
    if wrapped.encrypted_dek.len() != AES_KEY_LENGTH {
        return Err(CryptoError::InvalidDekLength {
            expected: AES_KEY_LENGTH,
            got: wrapped.encrypted_dek.len(),
        });
    }
    let aad = context.map(build_aad).unwrap_or_default();
    let mut plaintext = open_detached(
        master_key.as_bytes(),
        &wrapped.iv,
        &wrapped.auth_tag,
        &wrapped.encrypted_dek,
        &aad,
    )
    .map_err(|e| match e {
        CryptoError::DecryptionFailed => CryptoError::UnwrapAuthenticationFailed,
        other => other,
    })?;

    let dek = Dek::from_slice(&plaintext);
    zeroize::Zeroize::zeroize(&mut plaintext);
    dek
}
