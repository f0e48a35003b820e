use rusqlite::{params, OptionalExtension};

use crate::db::Db;
use crate::error::Result;
use crate::types::AttachmentRecord;

/// Owns `attachments` rows. The blob bytes themselves live behind a
/// `BlobStore` the caller supplies; this crate only tracks the record
/// (`storage_key`, checksum, expiry) that points at them.
pub trait AttachmentRepository {
    #[allow(clippy::too_many_arguments)]
    fn insert_attachment(
        &self,
        id: &str,
        conversation_id: &str,
        storage_key: &str,
        sha256: &str,
        size: i64,
        content_type: &str,
        expires_at: Option<&str>,
    ) -> Result<AttachmentRecord>;

    fn get_attachment(&self, id: &str) -> Result<Option<AttachmentRecord>>;
    fn delete_attachment(&self, id: &str) -> Result<()>;

    /// Atomically claims up to `batch_size` attachments whose `expires_at`
    /// is at or before `cutoff_rfc3339` and that no other cleanup tick has
    /// already claimed, tagging them with `marker` so a second, concurrent
    /// cleanup sweep skips them.
    fn claim_expired_attachments(
        &self,
        cutoff_rfc3339: &str,
        batch_size: usize,
        marker: &str,
    ) -> Result<Vec<AttachmentRecord>>;
}

impl AttachmentRepository for Db {
    fn insert_attachment(
        &self,
        id: &str,
        conversation_id: &str,
        storage_key: &str,
        sha256: &str,
        size: i64,
        content_type: &str,
        expires_at: Option<&str>,
    ) -> Result<AttachmentRecord> {
        let conn = self.conn.lock().unwrap();
        let created_at = Db::now();
        conn.execute(
            "INSERT INTO attachments
                (id, conversation_id, storage_key, sha256, size, content_type, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![id, conversation_id, storage_key, sha256, size, content_type, created_at, expires_at],
        )?;
        Ok(AttachmentRecord {
            id: id.to_string(),
            conversation_id: conversation_id.to_string(),
            storage_key: storage_key.to_string(),
            sha256: sha256.to_string(),
            size,
            content_type: content_type.to_string(),
            created_at,
            expires_at: expires_at.map(str::to_string),
        })
    }

    fn get_attachment(&self, id: &str) -> Result<Option<AttachmentRecord>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, conversation_id, storage_key, sha256, size, content_type, created_at, expires_at
             FROM attachments WHERE id = ?1",
            params![id],
            row_to_record,
        )
        .optional()
        .map_err(Into::into)
    }

    fn delete_attachment(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM attachments WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn claim_expired_attachments(
        &self,
        cutoff_rfc3339: &str,
        batch_size: usize,
        marker: &str,
    ) -> Result<Vec<AttachmentRecord>> {
        let conn = self.conn.lock().unwrap();
        let ids: Vec<String> = {
            let mut stmt = conn.prepare(
                "SELECT id FROM attachments
                 WHERE expires_at IS NOT NULL
                   AND expires_at <= ?1
                   AND cleanup_claimed_by IS NULL
                 ORDER BY expires_at ASC, id ASC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![cutoff_rfc3339, batch_size as i64], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            let updated = conn.execute(
                "UPDATE attachments SET cleanup_claimed_by = ?2
                 WHERE id = ?1 AND cleanup_claimed_by IS NULL",
                params![id, marker],
            )?;
            if updated > 0 {
                let record = conn
                    .query_row(
                        "SELECT id, conversation_id, storage_key, sha256, size, content_type, created_at, expires_at
                         FROM attachments WHERE id = ?1",
                        params![id],
                        row_to_record,
                    )
                    .optional()?;
                if let Some(record) = record {
                    claimed.push(record);
                }
            }
        }
        Ok(claimed)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<AttachmentRecord> {
    Ok(AttachmentRecord {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        storage_key: row.get(2)?,
        sha256: row.get(3)?,
        size: row.get(4)?,
        content_type: row.get(5)?,
        created_at: row.get(6)?,
        expires_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversations::ConversationRepository;
    use crate::groups::GroupRepository;
    use crate::memberships::MembershipRepository;
    use memsvc_core::types::{new_id, AccessLevel};
    use std::sync::Arc;

    #[derive(Default)]
    struct InMemoryDekStore(std::sync::Mutex<Option<memsvc_crypto::DekRecord>>);

    impl memsvc_crypto::DekStore for InMemoryDekStore {
        fn load(&self) -> std::result::Result<Option<memsvc_crypto::DekRecord>, memsvc_crypto::CryptoError> {
            Ok(self.0.lock().unwrap().clone())
        }
        fn insert_if_absent(
            &self,
            record: &memsvc_crypto::DekRecord,
        ) -> std::result::Result<memsvc_crypto::DekRecord, memsvc_crypto::CryptoError> {
            let mut g = self.0.lock().unwrap();
            if g.is_none() {
                *g = Some(record.clone());
            }
            Ok(g.clone().unwrap())
        }
        fn save(&self, record: &memsvc_crypto::DekRecord) -> std::result::Result<(), memsvc_crypto::CryptoError> {
            *self.0.lock().unwrap() = Some(record.clone());
            Ok(())
        }
    }

    fn crypto() -> Arc<memsvc_crypto::EncryptionService> {
        let svc = memsvc_crypto::EncryptionService::new(
            Arc::new(memsvc_crypto::NoopKmsProvider::new()),
            Arc::new(InMemoryDekStore::default()),
        );
        svc.bootstrap().unwrap();
        Arc::new(svc)
    }

    fn seed_conversation(db: &Db) -> String {
        let group_id = new_id();
        let conv_id = new_id();
        db.insert_group(&group_id, None, None).unwrap();
        db.insert_conversation(&conv_id, &group_id, "alice", None, None, None, None).unwrap();
        db.insert_membership(&group_id, "alice", AccessLevel::Owner).unwrap();
        conv_id
    }

    #[test]
    fn insert_then_get_roundtrips() {
        let db = Db::open_in_memory(crypto()).unwrap();
        let conv_id = seed_conversation(&db);
        let id = new_id();
        db.insert_attachment(&id, &conv_id, "blobs/a", "deadbeef", 1024, "image/png", None)
            .unwrap();

        let fetched = db.get_attachment(&id).unwrap().unwrap();
        assert_eq!(fetched.conversation_id, conv_id);
        assert_eq!(fetched.size, 1024);
        assert!(fetched.expires_at.is_none());
    }

    #[test]
    fn claim_marks_rows_so_second_claim_skips_them() {
        let db = Db::open_in_memory(crypto()).unwrap();
        let conv_id = seed_conversation(&db);
        let id = new_id();
        db.insert_attachment(&id, &conv_id, "blobs/a", "deadbeef", 10, "text/plain", Some("2000-01-01T00:00:00Z"))
            .unwrap();

        let first = db.claim_expired_attachments("2100-01-01T00:00:00Z", 10, "marker-a").unwrap();
        assert_eq!(first.len(), 1);

        let second = db.claim_expired_attachments("2100-01-01T00:00:00Z", 10, "marker-b").unwrap();
        assert!(second.is_empty(), "already-claimed row must not be claimed twice");
    }

    #[test]
    fn unexpired_attachment_is_never_claimed() {
        let db = Db::open_in_memory(crypto()).unwrap();
        let conv_id = seed_conversation(&db);
        let id = new_id();
        db.insert_attachment(&id, &conv_id, "blobs/a", "deadbeef", 10, "text/plain", None).unwrap();

        let claimed = db.claim_expired_attachments("2100-01-01T00:00:00Z", 10, "marker-a").unwrap();
        assert!(claimed.is_empty());
    }

    #[test]
    fn delete_removes_the_row() {
        let db = Db::open_in_memory(crypto()).unwrap();
        let conv_id = seed_conversation(&db);
        let id = new_id();
        db.insert_attachment(&id, &conv_id, "blobs/a", "deadbeef", 10, "text/plain", None).unwrap();
        db.delete_attachment(&id).unwrap();
        assert!(db.get_attachment(&id).unwrap().is_none());
    }
}
