use rusqlite::params;

use crate::db::Db;
use crate::error::Result;

/// One soft-deleted conversation past its retention cutoff, claimed for
/// hard deletion. `group_id` is returned alongside so the caller can enqueue
/// exactly one `vector_store_delete` task per group.
pub struct EvictableConversation {
    pub id: String,
    pub group_id: String,
}

/// Hard-delete support for `memsvc-eviction`. Kept on `Db` directly (rather
/// than a public trait) since nothing outside this workspace's eviction path
/// calls it, and the SQL here is inherently SQLite-shaped.
impl Db {
    /// Atomically claims up to `batch_size` soft-deleted conversations whose
    /// `deleted_at` is older than `cutoff_rfc3339`, marking them so a second,
    /// concurrent eviction call never claims the same row, guaranteeing
    /// exactly-once hard deletion. `marker` should be unique per caller/batch
    /// (e.g. a fresh UUID) so the claim is distinguishable from a plain
    /// soft-delete timestamp.
    pub fn claim_evictable_conversations(
        &self,
        cutoff_rfc3339: &str,
        batch_size: usize,
        marker: &str,
    ) -> Result<Vec<EvictableConversation>> {
        let conn = self.conn.lock().unwrap();
        let tag = format!("|evicting:{marker}");
        let ids: Vec<(String, String)> = {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_group_id FROM conversations
                 WHERE deleted_at IS NOT NULL
                   AND deleted_at NOT LIKE '%|evicting:%'
                   AND deleted_at <= ?1
                 ORDER BY deleted_at ASC, id ASC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![cutoff_rfc3339, batch_size as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut claimed = Vec::with_capacity(ids.len());
        for (id, group_id) in ids {
            let updated = conn.execute(
                "UPDATE conversations SET deleted_at = deleted_at || ?2
                 WHERE id = ?1 AND deleted_at IS NOT NULL AND deleted_at NOT LIKE '%|evicting:%'",
                params![id, tag],
            )?;
            // `updated == 0` means another concurrent caller won the race for
            // this row between the SELECT and this UPDATE; skip it.
            if updated > 0 {
                claimed.push(EvictableConversation { id, group_id });
            }
        }
        Ok(claimed)
    }

    /// Hard-deletes a claimed conversation's entries, memberships, pending
    /// transfers, and the conversation row itself in one transaction.
    /// Memberships/transfers belong to the group, so
    /// they are only deleted once no sibling (fork) conversation remains in
    /// the group — see [`Db::hard_delete_group_if_empty`].
    pub fn hard_delete_conversation_cascade(&self, conversation_id: &str) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM entries WHERE conversation_id = ?1", params![conversation_id])?;
        tx.execute(
            "DELETE FROM entries_fts WHERE conversation_id = ?1",
            params![conversation_id],
        )?;
        tx.execute("DELETE FROM conversations WHERE id = ?1", params![conversation_id])?;
        tx.commit()?;
        Ok(())
    }

    /// Once a group has no remaining conversation rows, hard-deletes its
    /// memberships, any pending transfers, and the group row itself.
    pub fn hard_delete_group_if_empty(&self, group_id: &str) -> Result<bool> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let remaining: i64 = tx.query_row(
            "SELECT COUNT(*) FROM conversations WHERE conversation_group_id = ?1",
            params![group_id],
            |row| row.get(0),
        )?;
        if remaining > 0 {
            tx.commit()?;
            return Ok(false);
        }
        tx.execute(
            "DELETE FROM memberships WHERE conversation_group_id = ?1",
            params![group_id],
        )?;
        tx.execute(
            "DELETE FROM transfers WHERE conversation_group_id = ?1",
            params![group_id],
        )?;
        tx.execute("DELETE FROM conversation_groups WHERE id = ?1", params![group_id])?;
        tx.commit()?;
        Ok(true)
    }

    /// Count of soft-deleted conversations still older than `cutoff`,
    /// used to compute the `{done, total}` progress fraction.
    pub fn count_evictable_conversations(&self, cutoff_rfc3339: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM conversations
             WHERE deleted_at IS NOT NULL AND deleted_at <= ?1",
            params![cutoff_rfc3339],
            |row| row.get(0),
        )
        .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memsvc_core::types::AccessLevel;
    use std::sync::Arc;

    fn crypto() -> Arc<memsvc_crypto::EncryptionService> {
        let svc = memsvc_crypto::EncryptionService::new(
            Arc::new(memsvc_crypto::NoopKmsProvider::new()),
            Arc::new(InMemoryDekStore::default()),
        );
        svc.bootstrap().unwrap();
        Arc::new(svc)
    }

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

    fn seed_deleted_conversation(db: &Db, deleted_at: &str) -> (String, String) {
        use crate::conversations::ConversationRepository;
        use crate::groups::GroupRepository;
        use crate::memberships::MembershipRepository;

        let group_id = memsvc_core::types::new_id();
        let conv_id = memsvc_core::types::new_id();
        db.insert_group(&group_id, None, None).unwrap();
        db.insert_conversation(&conv_id, &group_id, "alice", Some("t"), None, None, None)
            .unwrap();
        db.insert_membership(&group_id, "alice", AccessLevel::Owner).unwrap();
        db.conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE conversations SET deleted_at = ?2 WHERE id = ?1",
                params![conv_id, deleted_at],
            )
            .unwrap();
        (conv_id, group_id)
    }

    #[test]
    fn claim_marks_rows_so_second_claim_skips_them() {
        let db = Db::open_in_memory(crypto()).unwrap();
        seed_deleted_conversation(&db, "2000-01-01T00:00:00Z");

        let first = db.claim_evictable_conversations("2100-01-01T00:00:00Z", 10, "batch-a").unwrap();
        assert_eq!(first.len(), 1);

        let second = db.claim_evictable_conversations("2100-01-01T00:00:00Z", 10, "batch-b").unwrap();
        assert!(second.is_empty(), "already-claimed row must not be claimed twice");
    }

    #[test]
    fn cascade_then_group_cleanup_removes_everything() {
        let db = Db::open_in_memory(crypto()).unwrap();
        let (conv_id, group_id) = seed_deleted_conversation(&db, "2000-01-01T00:00:00Z");

        db.hard_delete_conversation_cascade(&conv_id).unwrap();
        let emptied = db.hard_delete_group_if_empty(&group_id).unwrap();
        assert!(emptied);

        use crate::groups::GroupRepository;
        assert!(db.get_group(&group_id).unwrap().is_none());
    }
}
