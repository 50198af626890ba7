use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use tracing::debug;

use super::KeyStore;
use crate::error::StoreError;
use crate::record::KeyRecord;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const RECORD_COLUMNS: &str =
    "id, encrypted_dek, iv, auth_tag, key_version, master_key_id, active, created_at";

/// SQLite-backed store. Safe to share one database file between processes:
/// the unique partial index on `active` rejects a second active record.
pub struct SqliteKeyStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteKeyStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS key_records (
                id              TEXT PRIMARY KEY,
                encrypted_dek   TEXT NOT NULL,
                iv              TEXT NOT NULL,
                auth_tag        TEXT NOT NULL,
                key_version     TEXT NOT NULL,
                master_key_id   TEXT NOT NULL,
                active          INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_key_records_single_active
                ON key_records(active) WHERE active = 1;
            ",
        )?;
        debug!("key record schema ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || f(&mut *conn.lock()))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<(KeyRecord, String)> {
    let created_at: String = row.get(7)?;
    Ok((
        KeyRecord {
            id: row.get(0)?,
            encrypted_dek: row.get(1)?,
            iv: row.get(2)?,
            auth_tag: row.get(3)?,
            key_version: row.get(4)?,
            master_key_id: row.get(5)?,
            active: row.get(6)?,
            created_at: DateTime::<Utc>::MIN_UTC,
        },
        created_at,
    ))
}

fn finish_record((mut record, created_at): (KeyRecord, String)) -> Result<KeyRecord, StoreError> {
    record.created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| StoreError::Corrupt(format!("{}: created_at: {e}", record.id)))?
        .with_timezone(&Utc);
    Ok(record)
}

fn insert(conn: &Connection, record: &KeyRecord) -> Result<(), StoreError> {
    conn.execute(
        &format!(
            "INSERT INTO key_records ({RECORD_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)"
        ),
        params![
            record.id,
            record.encrypted_dek,
            record.iv,
            record.auth_tag,
            record.key_version,
            record.master_key_id,
            record.created_at.to_rfc3339(),
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(ref err, _)
            if err.code == ErrorCode::ConstraintViolation =>
        {
            StoreError::ActiveRecordExists
        }
        other => other.into(),
    })?;
    Ok(())
}

#[async_trait]
impl KeyStore for SqliteKeyStore {
    async fn get_active_record(&self) -> Result<Option<KeyRecord>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM key_records WHERE active = 1"),
                [],
                row_to_record,
            )
            .optional()?
            .map(finish_record)
            .transpose()
        })
        .await
    }

    async fn create_record(&self, record: KeyRecord) -> Result<(), StoreError> {
        self.with_conn(move |conn| insert(conn, &record)).await
    }

    async fn rotate_to_new_record(
        &self,
        previous_id: &str,
        record: KeyRecord,
    ) -> Result<(), StoreError> {
        let previous_id = previous_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let changed = tx.execute(
                "UPDATE key_records SET active = 0 WHERE id = ?1 AND active = 1",
                params![previous_id],
            )?;
            if changed != 1 {
                return Err(StoreError::ActiveRecordChanged {
                    expected: previous_id,
                });
            }
            insert(&tx, &record)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn list_records(&self) -> Result<Vec<KeyRecord>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM key_records ORDER BY rowid"
            ))?;
            let rows = stmt.query_map([], row_to_record)?;
            rows.map(|row| finish_record(row?)).collect()
        })
        .await
    }
}
