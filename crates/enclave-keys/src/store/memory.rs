use async_trait::async_trait;
use parking_lot::Mutex;

use super::KeyStore;
use crate::error::StoreError;
use crate::record::KeyRecord;

/// In-process store. Records live as long as the value.
#[derive(Default)]
pub struct MemoryKeyStore {
    records: Mutex<Vec<KeyRecord>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn get_active_record(&self) -> Result<Option<KeyRecord>, StoreError> {
        Ok(self.records.lock().iter().find(|r| r.active).cloned())
    }

    async fn create_record(&self, mut record: KeyRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        if records.iter().any(|r| r.active) {
            return Err(StoreError::ActiveRecordExists);
        }
        record.active = true;
        records.push(record);
        Ok(())
    }

    async fn rotate_to_new_record(
        &self,
        previous_id: &str,
        mut record: KeyRecord,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        let previous = records
            .iter_mut()
            .find(|r| r.active && r.id == previous_id)
            .ok_or_else(|| StoreError::ActiveRecordChanged {
                expected: previous_id.to_string(),
            })?;
        previous.active = false;
        record.active = true;
        records.push(record);
        Ok(())
    }

    async fn list_records(&self) -> Result<Vec<KeyRecord>, StoreError> {
        Ok(self.records.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::INITIAL_KEY_VERSION;
    use enclave_crypto::{MasterKey, WrappedDek};

    fn record(version: &str) -> KeyRecord {
        let wrapped = WrappedDek {
            encrypted_dek: vec![1; 32],
            iv: [2; 12],
            auth_tag: [3; 16],
        };
        KeyRecord::new(&wrapped, MasterKey::from_bytes([4; 32]).id(), version)
    }

    #[tokio::test]
    async fn single_active_record() {
        let store = MemoryKeyStore::new();
        assert!(!store.has_active_record().await.unwrap());

        let first = record(INITIAL_KEY_VERSION);
        store.create_record(first.clone()).await.unwrap();
        assert_eq!(store.get_active_record().await.unwrap(), Some(first));

        let err = store.create_record(record("v1")).await.unwrap_err();
        assert!(matches!(err, StoreError::ActiveRecordExists));
        assert_eq!(store.list_records().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rotation_swaps_active_record() {
        let store = MemoryKeyStore::new();
        let first = record("v1");
        store.create_record(first.clone()).await.unwrap();

        let second = record("v2");
        store
            .rotate_to_new_record(&first.id, second.clone())
            .await
            .unwrap();

        let active = store.get_active_record().await.unwrap().unwrap();
        assert_eq!(active.id, second.id);
        let all = store.list_records().await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(!all[0].active);

        let err = store
            .rotate_to_new_record(&first.id, record("v3"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ActiveRecordChanged { .. }));
        assert_eq!(store.list_records().await.unwrap().len(), 2);
    }
}
