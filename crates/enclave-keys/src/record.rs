//! Persisted key records.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use enclave_crypto::{
    MasterKeyId, WrapContext, WrappedDek, AES_GCM_TAG_LENGTH, WRAP_IV_LENGTH,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{KeyError, Result};

/// Version assigned to the first DEK.
pub const INITIAL_KEY_VERSION: &str = "v1";

/// A wrapped DEK as stored. Binary fields are base64; the master key id is
/// lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRecord {
    pub id: String,
    pub encrypted_dek: String,
    pub iv: String,
    pub auth_tag: String,
    pub key_version: String,
    pub master_key_id: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl KeyRecord {
    /// New active record for a freshly wrapped DEK.
    pub fn new(wrapped: &WrappedDek, master_key_id: MasterKeyId, key_version: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            encrypted_dek: BASE64.encode(&wrapped.encrypted_dek),
            iv: BASE64.encode(wrapped.iv),
            auth_tag: BASE64.encode(wrapped.auth_tag),
            key_version: key_version.to_string(),
            master_key_id: master_key_id.to_hex(),
            active: true,
            created_at: Utc::now(),
        }
    }

    pub fn master_key_id(&self) -> Result<MasterKeyId> {
        self.master_key_id
            .parse()
            .map_err(|e| KeyError::InvalidRecord(format!("{}: {e}", self.id)))
    }

    /// Decode the wrapped DEK fields.
    pub fn wrapped_dek(&self) -> Result<WrappedDek> {
        Ok(WrappedDek {
            encrypted_dek: self.decode("encryptedDek", &self.encrypted_dek)?,
            iv: self.decode_fixed::<WRAP_IV_LENGTH>("iv", &self.iv)?,
            auth_tag: self.decode_fixed::<AES_GCM_TAG_LENGTH>("authTag", &self.auth_tag)?,
        })
    }

    /// AAD context the DEK in this record was wrapped with.
    pub fn wrap_context(&self) -> Result<WrapContext> {
        Ok(WrapContext {
            master_key_id: self.master_key_id()?,
            key_version: self.key_version.clone(),
        })
    }

    fn decode(&self, field: &str, value: &str) -> Result<Vec<u8>> {
        BASE64
            .decode(value)
            .map_err(|e| KeyError::InvalidRecord(format!("{}: {field}: {e}", self.id)))
    }

    fn decode_fixed<const N: usize>(&self, field: &str, value: &str) -> Result<[u8; N]> {
        let bytes = self.decode(field, value)?;
        bytes.try_into().map_err(|b: Vec<u8>| {
            KeyError::InvalidRecord(format!(
                "{}: {field}: expected {N} bytes, got {}",
                self.id,
                b.len()
            ))
        })
    }
}

/// Next version label: `v1` → `v2`. Labels that do not follow the `vN`
/// scheme restart the sequence at `v2`.
pub fn next_key_version(current: &str) -> String {
    let n = current
        .strip_prefix('v')
        .and_then(|n| n.parse::<u64>().ok())
        .unwrap_or(1);
    format!("v{}", n.saturating_add(1))
}
