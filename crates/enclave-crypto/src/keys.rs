//! Secret key newtypes.
//!
//! `MasterKey` and `Dek` never print their bytes and are zeroized on drop.
//! `MasterKeyId` is public: it is safe to persist and to log.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;
use crate::types::{AES_KEY_LENGTH, MASTER_KEY_ID_LENGTH};

fn key_array(bytes: &[u8]) -> Result<[u8; AES_KEY_LENGTH], CryptoError> {
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength {
            expected: AES_KEY_LENGTH,
            got: bytes.len(),
        })
}

/// 256-bit key derived from the enclave's launch measurement.
///
/// Held only in process memory; recomputed from a fresh attestation whenever
/// it is needed.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; AES_KEY_LENGTH]);

impl MasterKey {
    pub fn from_bytes(bytes: [u8; AES_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        key_array(bytes).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; AES_KEY_LENGTH] {
        &self.0
    }

    /// Non-reversible identifier of this key.
    pub fn id(&self) -> MasterKeyId {
        MasterKeyId::of(self)
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MasterKey").field(&"<redacted>").finish()
    }
}

/// 256-bit Data Encryption Key. Underlies every credential ciphertext.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Dek([u8; AES_KEY_LENGTH]);

impl Dek {
    pub fn from_bytes(bytes: [u8; AES_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        bytes
            .try_into()
            .map(Self)
            .map_err(|_| CryptoError::InvalidDekLength {
                expected: AES_KEY_LENGTH,
                got: bytes.len(),
            })
    }

    pub fn as_bytes(&self) -> &[u8; AES_KEY_LENGTH] {
        &self.0
    }
}

impl fmt::Debug for Dek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Dek").field(&"<redacted>").finish()
    }
}

/// Truncated SHA-256 of a master key: `SHA-256(key)[..8]`, rendered as
/// 16 lowercase hex characters.
///
/// Only used to detect whether the running code's measurement changed since a
/// key record was wrapped. Two ids carry no structural relationship to each
/// other beyond equality.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MasterKeyId([u8; MASTER_KEY_ID_LENGTH]);

impl MasterKeyId {
    /// Compute the id of a master key. Always hashes the full key.
    pub fn of(key: &MasterKey) -> Self {
        let digest = Sha256::digest(key.as_bytes());
        let mut id = [0u8; MASTER_KEY_ID_LENGTH];
        id.copy_from_slice(&digest[..MASTER_KEY_ID_LENGTH]);
        Self(id)
    }

    pub fn as_bytes(&self) -> &[u8; MASTER_KEY_ID_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for MasterKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for MasterKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MasterKeyId({})", self.to_hex())
    }
}

impl FromStr for MasterKeyId {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != MASTER_KEY_ID_LENGTH * 2 {
            return Err(CryptoError::InvalidMasterKeyId(format!(
                "expected {} hex chars, got {}",
                MASTER_KEY_ID_LENGTH * 2,
                s.len()
            )));
        }
        let mut id = [0u8; MASTER_KEY_ID_LENGTH];
        hex::decode_to_slice(s, &mut id)
            .map_err(|e| CryptoError::InvalidMasterKeyId(e.to_string()))?;
        Ok(Self(id))
    }
}

impl Serialize for MasterKeyId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for MasterKeyId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_is_redacted() {
        let key = MasterKey::from_bytes([0xAB; 32]);
        let dek = Dek::from_bytes([0xCD; 32]);
        assert!(!format!("{:?}", key).contains("171"));
        assert!(!format!("{:?}", key).to_lowercase().contains("abab"));
        assert!(format!("{:?}", dek).contains("redacted"));
    }

    #[test]
    fn id_is_sixteen_hex_chars() {
        let id = MasterKey::from_bytes([1u8; 32]).id();
        let hex = id.to_hex();
        assert_eq!(hex.len(), 16);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn id_is_truncated_sha256() {
        let key = MasterKey::from_bytes([9u8; 32]);
        let digest = Sha256::digest([9u8; 32]);
        assert_eq!(key.id().as_bytes(), &digest[..8]);
    }

    #[test]
    fn id_is_deterministic() {
        let key = MasterKey::from_bytes([3u8; 32]);
        assert_eq!(key.id(), key.clone().id());
    }

    #[test]
    fn different_keys_different_ids() {
        let a = MasterKey::from_bytes([1u8; 32]);
        let b = MasterKey::from_bytes([2u8; 32]);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn id_parses_from_hex() {
        let id = MasterKey::from_bytes([5u8; 32]).id();
        let parsed: MasterKeyId = id.to_hex().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn id_rejects_bad_hex() {
        assert!("abc".parse::<MasterKeyId>().is_err());
        assert!("zzzzzzzzzzzzzzzz".parse::<MasterKeyId>().is_err());
    }

    #[test]
    fn id_serializes_as_hex_string() {
        let id = MasterKey::from_bytes([5u8; 32]).id();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.to_hex()));
        let back: MasterKeyId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn slice_constructors_check_length() {
        assert!(MasterKey::from_slice(&[0u8; 31]).is_err());
        assert!(Dek::from_slice(&[0u8; 33]).is_err());
        assert!(Dek::from_slice(&[0u8; 32]).is_ok());
    }
}
