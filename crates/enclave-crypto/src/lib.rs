//! Cryptographic primitives for the credential vault: HKDF master-key
//! derivation, AES-256-GCM sealing, and DEK envelope wrapping.

pub mod aes_gcm;
pub mod dek;
pub mod error;
pub mod hash;
pub mod hkdf;
pub mod keys;
pub mod master_key;
pub mod types;

pub use aes_gcm::{
    open_credential, open_detached, random_bytes, seal_credential, seal_detached, Sealed,
};
pub use dek::{generate_dek, unwrap_dek, wrap_dek, WrapContext, WrappedDek};
pub use error::CryptoError;
pub use hash::sha256_hex;
pub use hkdf::hkdf_derive;
pub use keys::{Dek, MasterKey, MasterKeyId};
pub use master_key::{derive_master_key_from_measurement, master_key_id};
pub use types::{
    AES_GCM_TAG_LENGTH, AES_KEY_LENGTH, CREDENTIAL_IV_LENGTH, MASTER_KEY_ID_LENGTH,
    MEASUREMENT_LENGTH, WRAP_IV_LENGTH,
};
