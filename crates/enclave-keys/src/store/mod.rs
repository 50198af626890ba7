//! Key record persistence.
//!
//! Every backend guarantees at most one active record. `create_record` fails
//! with [`StoreError::ActiveRecordExists`] when another active record is
//! present, and `rotate_to_new_record` swaps the active record in a single
//! atomic step.

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryKeyStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteKeyStore;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::record::KeyRecord;

#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn get_active_record(&self) -> Result<Option<KeyRecord>, StoreError>;

    /// Insert `record` as the sole active record.
    async fn create_record(&self, record: KeyRecord) -> Result<(), StoreError>;

    /// Deactivate `previous_id` and insert `record` as active, atomically.
    /// Fails with [`StoreError::ActiveRecordChanged`] if `previous_id` is no
    /// longer the active record.
    async fn rotate_to_new_record(
        &self,
        previous_id: &str,
        record: KeyRecord,
    ) -> Result<(), StoreError>;

    async fn has_active_record(&self) -> Result<bool, StoreError> {
        Ok(self.get_active_record().await?.is_some())
    }

    /// All records, oldest first.
    async fn list_records(&self) -> Result<Vec<KeyRecord>, StoreError>;
}
