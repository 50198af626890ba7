//! Master key derivation from a launch measurement.
//!
//! master_key = HKDF-SHA256(ikm = measurement, salt = platform_version or "",
//!                          info = "track-record-enclave/master-key/v1")
//!
//! Deterministic: an unmodified enclave restarted on the same platform
//! recovers the same key. Any change to the measured code yields a new key.

use crate::error::CryptoError;
use crate::hkdf::hkdf_derive;
use crate::keys::{MasterKey, MasterKeyId};

const MASTER_KEY_INFO: &[u8] = b"track-record-enclave/master-key/v1";

/// Derive the master key for a measurement.
///
/// Callers holding an attestation report must go through the verified-report
/// path; this function is for measurements already known to be genuine (for
/// example, a previous binary's measurement recorded during a migration
/// window).
///
/// # Arguments
/// * `measurement` - Raw launch measurement bytes
/// * `platform_version` - Platform version string, or `None` for an empty salt
pub fn derive_master_key_from_measurement(
    measurement: &[u8],
    platform_version: Option<&str>,
) -> Result<MasterKey, CryptoError> {
    if measurement.is_empty() {
        return Err(CryptoError::EmptyMeasurement);
    }
    let salt = platform_version.map(str::as_bytes).unwrap_or_default();
    let okm = hkdf_derive(measurement, salt, MASTER_KEY_INFO)?;
    Ok(MasterKey::from_bytes(okm))
}

/// Identifier of a master key (see [`MasterKeyId`]).
pub fn master_key_id(key: &MasterKey) -> MasterKeyId {
    MasterKeyId::of(key)
}
