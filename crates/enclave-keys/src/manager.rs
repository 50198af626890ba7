//! DEK lifecycle management.
//!
//! The manager owns the transition from an empty store to a single active,
//! attestation-bound DEK, and the two operator transitions that replace the
//! active record: rotation (new DEK) and migration (same DEK, new master key).
//!
//! The warm path is a lock-free cache read. Everything that touches the store
//! runs under one async mutex, so a cold-path unwrap never observes a record
//! that rotation or migration is in the middle of replacing.
//!
//! Encryption goes through [`KeyManager::lease_dek`], which holds the rotation
//! gate for reading. Rotation takes it for writing, so nothing is encrypted
//! under a DEK that is being retired.

use std::ops::Deref;
use std::sync::Arc;

use enclave_attestation::AttestationProvider;
use enclave_crypto::{generate_dek, unwrap_dek, wrap_dek, Dek, MasterKey, MasterKeyId, WrapContext};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

use crate::cache::DekCache;
use crate::derivation::derive_master_key;
use crate::error::{KeyError, Result, StoreError};
use crate::record::{next_key_version, KeyRecord, INITIAL_KEY_VERSION};
use crate::store::KeyStore;

/// Where the key lifecycle currently stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum KeyState {
    Uninitialized,
    Active {
        master_key_id: MasterKeyId,
        key_version: String,
    },
    MigrationRequired {
        stored: MasterKeyId,
        current: MasterKeyId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RotationOutcome {
    pub previous_version: String,
    pub new_version: String,
    pub master_key_id: MasterKeyId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationOutcome {
    pub previous_master_key_id: MasterKeyId,
    pub new_master_key_id: MasterKeyId,
    pub key_version: String,
}

/// The current DEK, held for encryption. Rotation waits until every lease
/// is dropped.
pub struct DekLease<'a> {
    dek: Arc<Dek>,
    _gate: RwLockReadGuard<'a, ()>,
}

impl Deref for DekLease<'_> {
    type Target = Dek;

    fn deref(&self) -> &Dek {
        &self.dek
    }
}

pub struct KeyManager {
    attestation: Arc<dyn AttestationProvider>,
    store: Arc<dyn KeyStore>,
    cache: Arc<DekCache>,
    lifecycle: Mutex<()>,
    rotation_gate: RwLock<()>,
}

impl KeyManager {
    pub fn new(attestation: Arc<dyn AttestationProvider>, store: Arc<dyn KeyStore>) -> Self {
        Self::with_cache(attestation, store, Arc::new(DekCache::new()))
    }

    /// Use an externally owned cache.
    pub fn with_cache(
        attestation: Arc<dyn AttestationProvider>,
        store: Arc<dyn KeyStore>,
        cache: Arc<DekCache>,
    ) -> Self {
        Self {
            attestation,
            store,
            cache,
            lifecycle: Mutex::new(()),
            rotation_gate: RwLock::new(()),
        }
    }

    /// The active DEK, bootstrapping one if the store is empty.
    pub async fn get_current_dek(&self) -> Result<Arc<Dek>> {
        if let Some(dek) = self.cache.get() {
            return Ok(dek);
        }

        let _guard = self.lifecycle.lock().await;
        // Another caller may have filled the cache while we waited
        if let Some(dek) = self.cache.get() {
            return Ok(dek);
        }

        let master_key = self.current_master_key().await?;
        let dek = match self.store.get_active_record().await? {
            Some(record) => open_record(&record, &master_key)?,
            None => self.bootstrap(&master_key).await?,
        };
        let dek = Arc::new(dek);
        self.cache.set(Arc::clone(&dek));
        Ok(dek)
    }

    /// The current DEK, guaranteed not to be retired while the lease lives.
    pub async fn lease_dek(&self) -> Result<DekLease<'_>> {
        let gate = self.rotation_gate.read().await;
        let dek = self.get_current_dek().await?;
        Ok(DekLease { dek, _gate: gate })
    }

    /// Replace the DEK with a fresh random one.
    ///
    /// Ciphertexts produced under the previous DEK become undecryptable
    /// unless they are re-encrypted; see [`Self::rotate_dek_with`].
    pub async fn rotate_dek(&self) -> Result<RotationOutcome> {
        let (outcome, ()) = self.rotate_dek_with(|_, _| Ok::<_, KeyError>(())).await?;
        Ok(outcome)
    }

    /// Rotate the DEK, handing `reencrypt` the outgoing and incoming keys
    /// before the new record is committed.
    ///
    /// A single attestation covers the whole operation. If `reencrypt` or
    /// the commit fails, the store and cache are left untouched. On success
    /// the new DEK is cached directly, so no further attestation is needed
    /// to use it.
    pub async fn rotate_dek_with<T, E, F>(
        &self,
        reencrypt: F,
    ) -> std::result::Result<(RotationOutcome, T), E>
    where
        F: FnOnce(&Dek, &Dek) -> std::result::Result<T, E>,
        E: From<KeyError>,
    {
        let _gate = self.rotation_gate.write().await;
        let _guard = self.lifecycle.lock().await;
        let master_key = self.current_master_key().await?;
        let current = self
            .store
            .get_active_record()
            .await
            .map_err(KeyError::from)?
            .ok_or(KeyError::NoActiveRecord)?;
        let old = open_record(&current, &master_key)?;

        let new_version = next_key_version(&current.key_version);
        let dek = generate_dek().map_err(KeyError::from)?;
        let record = seal_record(&dek, &master_key, &new_version)?;
        let output = reencrypt(&old, &dek)?;

        self.store
            .rotate_to_new_record(&current.id, record)
            .await
            .map_err(KeyError::from)?;
        self.cache.set(Arc::new(dek));

        info!(
            previous_version = %current.key_version,
            new_version = %new_version,
            master_key_id = %master_key.id(),
            "DEK rotated"
        );
        let outcome = RotationOutcome {
            previous_version: current.key_version,
            new_version,
            master_key_id: master_key.id(),
        };
        Ok((outcome, output))
    }

    /// Re-wrap the active DEK under the running code's master key.
    ///
    /// `old_master_key` must be the key the active record was wrapped with.
    /// The DEK itself is unchanged, so existing ciphertexts stay readable.
    pub async fn migrate_dek_to_new_master_key(
        &self,
        old_master_key: &MasterKey,
    ) -> Result<MigrationOutcome> {
        let _guard = self.lifecycle.lock().await;
        let new_master_key = self.current_master_key().await?;
        let current = self
            .store
            .get_active_record()
            .await?
            .ok_or(KeyError::NoActiveRecord)?;

        let stored = current.master_key_id()?;
        if stored == new_master_key.id() {
            return Err(KeyError::MigrationNotRequired);
        }

        let dek = unwrap_dek(
            &current.wrapped_dek()?,
            old_master_key,
            Some(&current.wrap_context()?),
        )?;
        let record = seal_record(&dek, &new_master_key, &current.key_version)?;
        self.store.rotate_to_new_record(&current.id, record).await?;
        self.cache.clear();

        info!(
            previous_master_key_id = %stored,
            new_master_key_id = %new_master_key.id(),
            key_version = %current.key_version,
            "DEK migrated to new master key"
        );
        Ok(MigrationOutcome {
            previous_master_key_id: stored,
            new_master_key_id: new_master_key.id(),
            key_version: current.key_version,
        })
    }

    /// Whether a verified attestation report can be obtained right now.
    pub async fn is_hardware_key_available(&self) -> bool {
        match self.attestation.get_attestation_report().await {
            Ok(report) => report.is_verified(),
            Err(e) => {
                debug!(error = %e, "hardware key unavailable");
                false
            }
        }
    }

    /// Id of the master key the running code derives.
    pub async fn current_master_key_id(&self) -> Result<MasterKeyId> {
        Ok(self.current_master_key().await?.id())
    }

    /// Forget the cached DEK; the next call takes the cold path.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Classify the store against the running code without unwrapping.
    pub async fn state(&self) -> Result<KeyState> {
        let Some(record) = self.store.get_active_record().await? else {
            return Ok(KeyState::Uninitialized);
        };
        let stored = record.master_key_id()?;
        let current = self.current_master_key_id().await?;
        Ok(if stored == current {
            KeyState::Active {
                master_key_id: current,
                key_version: record.key_version,
            }
        } else {
            KeyState::MigrationRequired { stored, current }
        })
    }

    async fn current_master_key(&self) -> Result<MasterKey> {
        let report = self.attestation.get_attestation_report().await?;
        derive_master_key(&report)
    }

    async fn bootstrap(&self, master_key: &MasterKey) -> Result<Dek> {
        let dek = generate_dek()?;
        let record = seal_record(&dek, master_key, INITIAL_KEY_VERSION)?;
        match self.store.create_record(record).await {
            Ok(()) => {
                info!(
                    master_key_id = %master_key.id(),
                    key_version = INITIAL_KEY_VERSION,
                    "DEK initialized"
                );
                Ok(dek)
            }
            Err(StoreError::ActiveRecordExists) => {
                info!("DEK initialized concurrently elsewhere, adopting existing record");
                let record = self
                    .store
                    .get_active_record()
                    .await?
                    .ok_or(KeyError::NoActiveRecord)?;
                open_record(&record, master_key)
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn ensure_bound_to(record: &KeyRecord, master_key: &MasterKey) -> Result<()> {
    let stored = record.master_key_id()?;
    let current = master_key.id();
    if stored != current {
        warn!(%stored, %current, "active DEK is bound to a different master key");
        return Err(KeyError::MigrationRequired { stored, current });
    }
    Ok(())
}

fn open_record(record: &KeyRecord, master_key: &MasterKey) -> Result<Dek> {
    ensure_bound_to(record, master_key)?;
    Ok(unwrap_dek(
        &record.wrapped_dek()?,
        master_key,
        Some(&record.wrap_context()?),
    )?)
}

fn seal_record(dek: &Dek, master_key: &MasterKey, key_version: &str) -> Result<KeyRecord> {
    let context = WrapContext {
        master_key_id: master_key.id(),
        key_version: key_version.to_string(),
    };
    let wrapped = wrap_dek(dek, master_key, Some(&context))?;
    Ok(KeyRecord::new(&wrapped, context.master_key_id, key_version))
}
