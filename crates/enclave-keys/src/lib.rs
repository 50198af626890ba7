//! Attestation-bound key management.
//!
//! A single random DEK encrypts all credentials. It is persisted only wrapped
//! under a master key derived from the verified launch measurement, so only
//! the attested code can recover it.

pub mod cache;
pub mod derivation;
pub mod error;
pub mod manager;
pub mod record;
pub mod store;

pub use cache::DekCache;
pub use derivation::derive_master_key;
pub use error::{KeyError, Result, StoreError};
pub use manager::{DekLease, KeyManager, KeyState, MigrationOutcome, RotationOutcome};
pub use record::{next_key_version, KeyRecord, INITIAL_KEY_VERSION};
#[cfg(feature = "sqlite")]
pub use store::SqliteKeyStore;
pub use store::{KeyStore, MemoryKeyStore};
