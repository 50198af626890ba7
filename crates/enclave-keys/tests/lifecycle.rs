use std::sync::Arc;

use enclave_attestation::testing::SoftwareAttestor;
use enclave_crypto::derive_master_key_from_measurement;
use enclave_keys::{KeyError, KeyManager, KeyStore, MemoryKeyStore, SqliteKeyStore};

const X: [u8; 48] = [0xA1; 48];
const X2: [u8; 48] = [0xB2; 48];

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_bootstrap_yields_one_record() {
    let attestor = Arc::new(SoftwareAttestor::new(X));
    let store = Arc::new(MemoryKeyStore::new());
    let manager = Arc::new(KeyManager::new(attestor, store.clone()));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.get_current_dek().await.unwrap() })
        })
        .collect();

    let mut deks = Vec::new();
    for handle in handles {
        deks.push(handle.await.unwrap());
    }
    assert!(deks.iter().all(|d| d.as_bytes() == deks[0].as_bytes()));
    assert_eq!(store.list_records().await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn independent_managers_converge_on_shared_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keys.db");

    // Separate managers and connections stand in for separate processes
    let mut handles = Vec::new();
    for _ in 0..4 {
        let path = path.clone();
        handles.push(tokio::spawn(async move {
            let store = Arc::new(SqliteKeyStore::open(&path).unwrap());
            let manager = KeyManager::new(Arc::new(SoftwareAttestor::new(X)), store);
            manager.get_current_dek().await.unwrap()
        }));
    }
    let mut deks = Vec::new();
    for handle in handles {
        deks.push(handle.await.unwrap());
    }
    assert!(deks.iter().all(|d| d.as_bytes() == deks[0].as_bytes()));

    let store = SqliteKeyStore::open(&path).unwrap();
    let records = store.list_records().await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].active);
}

#[tokio::test]
async fn code_update_migration_on_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keys.db");
    let attestor = Arc::new(SoftwareAttestor::new(X));

    let before = {
        let store = Arc::new(SqliteKeyStore::open(&path).unwrap());
        let manager = KeyManager::new(attestor.clone(), store);
        manager.get_current_dek().await.unwrap()
    };

    // Restart with new code
    attestor.set_measurement(X2);
    let store = Arc::new(SqliteKeyStore::open(&path).unwrap());
    let manager = KeyManager::new(attestor.clone(), store.clone());
    assert!(matches!(
        manager.get_current_dek().await,
        Err(KeyError::MigrationRequired { .. })
    ));

    let old_key = derive_master_key_from_measurement(&X, Some("2")).unwrap();
    manager.migrate_dek_to_new_master_key(&old_key).await.unwrap();
    let after = manager.get_current_dek().await.unwrap();
    assert_eq!(before.as_bytes(), after.as_bytes());

    let records = store.list_records().await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].key_version, "v1");
    assert!(records[1].active);
    assert!(!records[0].active);
}
