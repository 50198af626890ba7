//! Credential vault: encrypts exchange API credentials with a DEK that only
//! attested code can unwrap.

pub mod config;
pub mod error;
pub mod key_source;
pub mod service;

pub use config::VaultConfig;
pub use error::{CredentialError, Result};
pub use key_source::{KeyMode, KeySource};
pub use service::CredentialEncryption;
