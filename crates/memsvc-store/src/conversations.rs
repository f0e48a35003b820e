use memsvc_core::cursor::Cursor;
use memsvc_core::types::ListMode;
use rusqlite::{params, OptionalExtension};

use crate::db::Db;
use crate::error::{Result, StoreError};
use crate::types::{Conversation, ForkSummary, Page};

pub trait ConversationRepository {
    #[allow(clippy::too_many_arguments)]
    fn insert_conversation(
        &self,
        id: &str,
        group_id: &str,
        owner_user_id: &str,
        title: Option<&str>,
        metadata: Option<&serde_json::Value>,
        forked_at_conversation_id: Option<&str>,
        forked_at_entry_id: Option<&str>,
    ) -> Result<Conversation>;

    fn get_conversation(&self, id: &str) -> Result<Option<Conversation>>;

    fn list_conversations(
        &self,
        user_id: &str,
        mode: ListMode,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Page<Conversation>>;

    fn list_forks(&self, conversation_id: &str) -> Result<Vec<ForkSummary>>;

    fn set_title_if_absent(&self, id: &str, title: &str) -> Result<()>;
    fn touch_updated_at(&self, id: &str) -> Result<()>;
    fn soft_delete_conversation(&self, id: &str) -> Result<()>;
}

impl ConversationRepository for Db {
    fn insert_conversation(
        &self,
        id: &str,
        group_id: &str,
        owner_user_id: &str,
        title: Option<&str>,
        metadata: Option<&serde_json::Value>,
        forked_at_conversation_id: Option<&str>,
        forked_at_entry_id: Option<&str>,
    ) -> Result<Conversation> {
        let now = Db::now();
        let title_ct = self.encrypt_opt(title)?;
        let metadata_json = metadata.map(serde_json::to_string).transpose()?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO conversations
                (id, conversation_group_id, owner_user_id, title, metadata,
                 created_at, updated_at, forked_at_conversation_id, forked_at_entry_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7, ?8)",
            params![
                id,
                group_id,
                owner_user_id,
                title_ct,
                metadata_json,
                now,
                forked_at_conversation_id,
                forked_at_entry_id,
            ],
        )?;

        Ok(Conversation {
            id: id.to_string(),
            conversation_group_id: group_id.to_string(),
            owner_user_id: owner_user_id.to_string(),
            title: title.map(str::to_string),
            metadata: metadata.cloned(),
            created_at: now.clone(),
            updated_at: now,
            forked_at_conversation_id: forked_at_conversation_id.map(str::to_string),
            forked_at_entry_id: forked_at_entry_id.map(str::to_string),
            vectorized_at: None,
            deleted_at: None,
        })
    }

    fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let conn = self.conn.lock().unwrap();
        let raw = conn
            .query_row(
                "SELECT id, conversation_group_id, owner_user_id, title, metadata,
                        created_at, updated_at, forked_at_conversation_id, forked_at_entry_id,
                        vectorized_at, deleted_at
                 FROM conversations WHERE id = ?1 AND deleted_at IS NULL",
                params![id],
                row_to_raw,
            )
            .optional()?;
        drop(conn);
        raw.map(|r| self.finish_conversation(r)).transpose()
    }

    fn list_conversations(
        &self,
        user_id: &str,
        mode: ListMode,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Page<Conversation>> {
        let cursor = after.map(Cursor::decode).transpose().map_err(StoreError::BadRequest)?;
        let (cursor_at, cursor_id) = match &cursor {
            Some(c) => (Some(c.updated_at.clone()), Some(c.id.clone())),
            None => (None, None),
        };

        let mode_predicate = match mode {
            ListMode::All => "1=1",
            ListMode::Roots => "c.forked_at_conversation_id IS NULL",
            // Most-recently-updated conversation per group.
            ListMode::LatestFork => {
                "c.updated_at = (SELECT MAX(c2.updated_at) FROM conversations c2
                                  WHERE c2.conversation_group_id = c.conversation_group_id
                                    AND c2.deleted_at IS NULL)"
            }
        };

        let sql = format!(
            "SELECT c.id, c.conversation_group_id, c.owner_user_id, c.title, c.metadata,
                    c.created_at, c.updated_at, c.forked_at_conversation_id, c.forked_at_entry_id,
                    c.vectorized_at, c.deleted_at
             FROM conversations c
             JOIN memberships m ON m.conversation_group_id = c.conversation_group_id
             WHERE m.user_id = ?1 AND c.deleted_at IS NULL AND {mode_predicate}
               AND (?2 IS NULL OR (c.updated_at, c.id) > (?2, ?3))
             ORDER BY c.updated_at DESC, c.id DESC
             LIMIT ?4"
        );

        let raw_rows: Vec<RawConversationRow> = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![user_id, cursor_at, cursor_id, limit as i64], row_to_raw)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut data = Vec::with_capacity(raw_rows.len());
        for raw in raw_rows {
            data.push(self.finish_conversation(raw)?);
        }

        let next_cursor = if data.len() == limit {
            data.last().map(|c: &Conversation| {
                Cursor {
                    updated_at: c.updated_at.clone(),
                    id: c.id.clone(),
                }
                .encode()
            })
        } else {
            None
        };

        Ok(Page { data, next_cursor })
    }

    fn list_forks(&self, conversation_id: &str) -> Result<Vec<ForkSummary>> {
        let group_id = {
            let conn = self.conn.lock().unwrap();
            conn.query_row(
                "SELECT conversation_group_id FROM conversations WHERE id = ?1",
                params![conversation_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?
        };
        let Some(group_id) = group_id else {
            return Ok(Vec::new());
        };

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, title, forked_at_conversation_id, forked_at_entry_id, created_at, updated_at
             FROM conversations
             WHERE conversation_group_id = ?1 AND deleted_at IS NULL
             ORDER BY updated_at DESC",
        )?;
        let rows = stmt.query_map(params![group_id], |row| {
            let title_ct: Option<Vec<u8>> = row.get(1)?;
            Ok((
                row.get::<_, String>(0)?,
                title_ct,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, title_ct, forked_conv, forked_entry, created_at, updated_at) = row?;
            out.push(ForkSummary {
                conversation_id: id,
                title: self.decrypt_opt(title_ct)?,
                forked_at_conversation_id: forked_conv,
                forked_at_entry_id: forked_entry,
                created_at,
                updated_at,
            });
        }
        Ok(out)
    }

    fn set_title_if_absent(&self, id: &str, title: &str) -> Result<()> {
        let title_ct = self.crypto.encrypt(title.as_bytes())?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE conversations SET title = ?2 WHERE id = ?1 AND title IS NULL",
            params![id, title_ct],
        )?;
        Ok(())
    }

    fn touch_updated_at(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE conversations SET updated_at = ?2 WHERE id = ?1",
            params![id, Db::now()],
        )?;
        Ok(())
    }

    fn soft_delete_conversation(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE conversations SET deleted_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
            params![id, Db::now()],
        )?;
        Ok(())
    }
}

struct RawConversationRow {
    id: String,
    conversation_group_id: String,
    owner_user_id: String,
    title: Option<Vec<u8>>,
    metadata: Option<String>,
    created_at: String,
    updated_at: String,
    forked_at_conversation_id: Option<String>,
    forked_at_entry_id: Option<String>,
    vectorized_at: Option<String>,
    deleted_at: Option<String>,
}

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawConversationRow> {
    Ok(RawConversationRow {
        id: row.get(0)?,
        conversation_group_id: row.get(1)?,
        owner_user_id: row.get(2)?,
        title: row.get(3)?,
        metadata: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        forked_at_conversation_id: row.get(7)?,
        forked_at_entry_id: row.get(8)?,
        vectorized_at: row.get(9)?,
        deleted_at: row.get(10)?,
    })
}

impl Db {
    fn finish_conversation(&self, raw: RawConversationRow) -> Result<Conversation> {
        Ok(Conversation {
            id: raw.id,
            conversation_group_id: raw.conversation_group_id,
            owner_user_id: raw.owner_user_id,
            title: self.decrypt_opt(raw.title)?,
            metadata: raw.metadata.map(|s| serde_json::from_str(&s)).transpose()?,
            created_at: raw.created_at,
            updated_at: raw.updated_at,
            forked_at_conversation_id: raw.forked_at_conversation_id,
            forked_at_entry_id: raw.forked_at_entry_id,
            vectorized_at: raw.vectorized_at,
            deleted_at: raw.deleted_at,
        })
    }
}
