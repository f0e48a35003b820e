use std::sync::Mutex;

use memsvc_crypto::{DekRecord, DekStore};
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::Db;
use crate::error::{Result, StoreError};

impl DekStore for Db {
    fn load(&self) -> std::result::Result<Option<DekRecord>, memsvc_crypto::CryptoError> {
        load_impl(&self.conn).map_err(|e| memsvc_crypto::CryptoError::WrapFailure(e.to_string()))
    }

    fn insert_if_absent(
        &self,
        record: &DekRecord,
    ) -> std::result::Result<DekRecord, memsvc_crypto::CryptoError> {
        insert_if_absent_impl(&self.conn, record).map_err(|e| memsvc_crypto::CryptoError::WrapFailure(e.to_string()))
    }

    fn save(&self, record: &DekRecord) -> std::result::Result<(), memsvc_crypto::CryptoError> {
        save_impl(&self.conn, record).map_err(|e| memsvc_crypto::CryptoError::WrapFailure(e.to_string()))
    }
}

/// A `DekStore` over a bare connection, with no `Db`/`EncryptionService`
/// attached yet. Exists to break the bootstrap cycle: `Db::open` requires an
/// already-built `Arc<EncryptionService>`, and `EncryptionService` needs a
/// `DekStore` to load from — so the wiring layer opens one connection to
/// mint the encryption service, then hands the path to `Db::open` for the
/// connection the rest of the process actually uses. See
/// [`crate::db::bootstrap_encryption`].
pub struct ConnDekStore(Mutex<Connection>);

impl ConnDekStore {
    pub fn new(conn: Connection) -> Self {
        Self(Mutex::new(conn))
    }
}

impl DekStore for ConnDekStore {
    fn load(&self) -> std::result::Result<Option<DekRecord>, memsvc_crypto::CryptoError> {
        load_impl(&self.0).map_err(|e| memsvc_crypto::CryptoError::WrapFailure(e.to_string()))
    }

    fn insert_if_absent(
        &self,
        record: &DekRecord,
    ) -> std::result::Result<DekRecord, memsvc_crypto::CryptoError> {
        insert_if_absent_impl(&self.0, record).map_err(|e| memsvc_crypto::CryptoError::WrapFailure(e.to_string()))
    }

    fn save(&self, record: &DekRecord) -> std::result::Result<(), memsvc_crypto::CryptoError> {
        save_impl(&self.0, record).map_err(|e| memsvc_crypto::CryptoError::WrapFailure(e.to_string()))
    }
}

fn load_impl(conn: &Mutex<Connection>) -> Result<Option<DekRecord>> {
    let conn = conn.lock().unwrap();
    conn.query_row(
        "SELECT provider_id, primary_wrapped, legacy_wrapped FROM deks WHERE id = 1",
        [],
        row_to_record,
    )
    .optional()
    .map_err(Into::into)
}

/// Atomic relative to concurrent inserts: SQLite's `INSERT ... ON CONFLICT
/// DO NOTHING` is a single statement, so two replicas racing to bootstrap
/// converge on whichever insert SQLite's own locking lets through first.
fn insert_if_absent_impl(conn: &Mutex<Connection>, record: &DekRecord) -> Result<DekRecord> {
    let conn = conn.lock().unwrap();
    let legacy_json = serde_json::to_string(&record.legacy_wrapped)?;
    conn.execute(
        "INSERT INTO deks (id, provider_id, primary_wrapped, legacy_wrapped)
         VALUES (1, ?1, ?2, ?3)
         ON CONFLICT (id) DO NOTHING",
        params![record.provider_id, record.primary_wrapped, legacy_json],
    )?;
    conn.query_row(
        "SELECT provider_id, primary_wrapped, legacy_wrapped FROM deks WHERE id = 1",
        [],
        row_to_record,
    )
    .map_err(StoreError::Sql)
}

fn save_impl(conn: &Mutex<Connection>, record: &DekRecord) -> Result<()> {
    let conn = conn.lock().unwrap();
    let legacy_json = serde_json::to_string(&record.legacy_wrapped)?;
    conn.execute(
        "INSERT INTO deks (id, provider_id, primary_wrapped, legacy_wrapped)
         VALUES (1, ?1, ?2, ?3)
         ON CONFLICT (id) DO UPDATE SET
            provider_id = excluded.provider_id,
            primary_wrapped = excluded.primary_wrapped,
            legacy_wrapped = excluded.legacy_wrapped",
        params![record.provider_id, record.primary_wrapped, legacy_json],
    )?;
    Ok(())
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<DekRecord> {
    let legacy_json: String = row.get(2)?;
    let legacy_wrapped: Vec<Vec<u8>> = serde_json::from_str(&legacy_json).unwrap_or_default();
    Ok(DekRecord {
        provider_id: row.get(0)?,
        primary_wrapped: row.get(1)?,
        legacy_wrapped,
    })
}
