use std::sync::{Arc, Mutex};

use memsvc_crypto::EncryptionService;
use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::schema;

/// Single SQLite-backed implementation of every repository trait this crate
/// defines. One `Db` per process, wrapping the connection in a `Mutex` —
/// rusqlite's `Connection` is `!Sync`, and a single writer is exactly
/// SQLite's native concurrency model anyway.
pub struct Db {
    pub(crate) conn: Mutex<Connection>,
    pub(crate) crypto: Arc<EncryptionService>,
}

impl Db {
    pub fn open(path: &str, crypto: Arc<EncryptionService>) -> Result<Self> {
        let conn = Connection::open(path)?;
        schema::init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            crypto,
        })
    }

    #[cfg(test)]
    pub fn open_in_memory(crypto: Arc<EncryptionService>) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            crypto,
        })
    }

    pub(crate) fn now() -> String {
        chrono::Utc::now().to_rfc3339()
    }

    pub(crate) fn encrypt_opt(&self, plaintext: Option<&str>) -> Result<Option<Vec<u8>>> {
        plaintext
            .map(|s| self.crypto.encrypt(s.as_bytes()).map_err(StoreError::from))
            .transpose()
    }

    pub(crate) fn decrypt_opt(&self, ciphertext: Option<Vec<u8>>) -> Result<Option<String>> {
        ciphertext
            .map(|bytes| {
                let plain = self.crypto.decrypt(&bytes)?;
                String::from_utf8(plain).map_err(|e| StoreError::BadRequest(e.to_string()))
            })
            .transpose()
    }

    pub(crate) fn encrypt_blocks(&self, blocks: &[serde_json::Value]) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(blocks)?;
        Ok(self.crypto.encrypt(&json)?)
    }

    /// Public seam for callers outside this crate that need the same
    /// ciphertext this store would persist for a content payload — the
    /// memory-entries cache writes through with this rather than holding its
    /// own `EncryptionService` handle, so it only ever sees ciphertext.
    pub fn encrypt_content(&self, blocks: &[serde_json::Value]) -> Result<Vec<u8>> {
        self.encrypt_blocks(blocks)
    }

    pub(crate) fn decrypt_blocks(&self, ciphertext: &[u8]) -> Result<Vec<serde_json::Value>> {
        let plain = self.crypto.decrypt(ciphertext)?;
        Ok(serde_json::from_slice(&plain)?)
    }
}

/// Opens a throwaway connection to `path`, initializes the schema if needed,
/// and bootstraps an [`EncryptionService`] against the `deks` table through
/// it. The wiring layer calls this once at startup, then opens the real
/// [`Db`] (a second connection to the same file) with the returned service —
/// breaking the cycle where `Db::open` wants an `Arc<EncryptionService>`
/// that itself wants a `DekStore` only `Db` can provide.
pub fn bootstrap_encryption(
    path: &str,
    kms: Arc<dyn memsvc_crypto::KeyManagementProvider>,
) -> Result<Arc<EncryptionService>> {
    let conn = Connection::open(path)?;
    schema::init_db(&conn)?;
    let store = Arc::new(crate::dek_store::ConnDekStore::new(conn));
    let svc = EncryptionService::new(kms, store);
    svc.bootstrap()?;
    Ok(Arc::new(svc))
}
