use memsvc_core::cursor::Cursor;
use memsvc_core::types::{new_id, Channel};
use rusqlite::{params, OptionalExtension};

use crate::db::Db;
use crate::error::{Result, StoreError};
use crate::types::{ContentBlock, CreateEntryRequest, Entry, Page};

pub trait EntryRepository {
    #[allow(clippy::too_many_arguments)]
    fn insert_entry(
        &self,
        conversation_id: &str,
        conversation_group_id: &str,
        user_id: Option<&str>,
        client_id: Option<&str>,
        request: &CreateEntryRequest,
    ) -> Result<Entry>;

    /// Entries for one conversation and channel, compound-cursor paginated
    /// on `(created_at, id)` so the page stays stable under concurrent
    /// insertions. Does not account for fork inheritance — callers
    /// assembling `HISTORY` for a fork walk ancestors themselves.
    fn list_channel_entries(
        &self,
        conversation_id: &str,
        channel: Channel,
        client_id: Option<&str>,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Page<Entry>>;

    fn entries_for_epoch(
        &self,
        conversation_id: &str,
        client_id: &str,
        epoch: i64,
    ) -> Result<Vec<Entry>>;

    fn latest_memory_epoch(&self, conversation_id: &str, client_id: &str) -> Result<Option<i64>>;

    /// The `HISTORY` entry immediately preceding `entry_id` in the same
    /// conversation, if any — the fork-anchor lookup.
    fn previous_history_entry(&self, conversation_id: &str, entry_id: &str) -> Result<Option<Entry>>;

    fn get_entry(&self, id: &str) -> Result<Option<Entry>>;
}

/// Un-decrypted row shape; decryption happens outside the `rusqlite` row
/// callback so a crypto failure surfaces as a `StoreError`, not forced
/// through `rusqlite::Error`.
struct RawEntryRow {
    id: String,
    conversation_id: String,
    conversation_group_id: String,
    user_id: Option<String>,
    client_id: Option<String>,
    channel: String,
    memory_epoch: Option<i64>,
    content: Vec<u8>,
    created_at: String,
}

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEntryRow> {
    Ok(RawEntryRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        conversation_group_id: row.get(2)?,
        user_id: row.get(3)?,
        client_id: row.get(4)?,
        channel: row.get(5)?,
        memory_epoch: row.get(6)?,
        content: row.get(7)?,
        created_at: row.get(8)?,
    })
}

impl Db {
    fn finish_entry(&self, raw: RawEntryRow) -> Result<Entry> {
        Ok(Entry {
            id: raw.id,
            conversation_id: raw.conversation_id,
            conversation_group_id: raw.conversation_group_id,
            user_id: raw.user_id,
            client_id: raw.client_id,
            channel: raw.channel.parse().map_err(StoreError::BadRequest)?,
            memory_epoch: raw.memory_epoch,
            content: self.decrypt_blocks(&raw.content)?,
            created_at: raw.created_at,
        })
    }
}

const ENTRY_COLUMNS: &str = "id, conversation_id, conversation_group_id, user_id, client_id,
                    channel, memory_epoch, content, created_at";

impl EntryRepository for Db {
    fn insert_entry(
        &self,
        conversation_id: &str,
        conversation_group_id: &str,
        user_id: Option<&str>,
        client_id: Option<&str>,
        request: &CreateEntryRequest,
    ) -> Result<Entry> {
        let id = new_id();
        let created_at = Db::now();
        let content_bytes = self.encrypt_blocks(&request.content)?;

        {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO entries
                    (id, conversation_id, conversation_group_id, user_id, client_id,
                     channel, memory_epoch, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    id,
                    conversation_id,
                    conversation_group_id,
                    user_id,
                    client_id,
                    request.channel.to_string(),
                    request.memory_epoch,
                    content_bytes,
                    created_at,
                ],
            )?;

            if matches!(request.channel, Channel::History | Channel::Summary) {
                sync_fts(&conn, &id, conversation_id, &request.content)?;
            }
        }

        Ok(Entry {
            id,
            conversation_id: conversation_id.to_string(),
            conversation_group_id: conversation_group_id.to_string(),
            user_id: user_id.map(str::to_string),
            client_id: client_id.map(str::to_string),
            channel: request.channel,
            memory_epoch: request.memory_epoch,
            content: request.content.clone(),
            created_at,
        })
    }

    fn list_channel_entries(
        &self,
        conversation_id: &str,
        channel: Channel,
        client_id: Option<&str>,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Page<Entry>> {
        let cursor = after.map(Cursor::decode).transpose().map_err(StoreError::BadRequest)?;
        let (cursor_at, cursor_id) = match &cursor {
            Some(c) => (Some(c.updated_at.clone()), Some(c.id.clone())),
            None => (None, None),
        };

        let raw_rows: Vec<RawEntryRow> = {
            let conn = self.conn.lock().unwrap();
            let sql = format!(
                "SELECT {ENTRY_COLUMNS}
                 FROM entries
                 WHERE conversation_id = ?1 AND channel = ?2
                   AND (?3 IS NULL OR client_id = ?3)
                   AND (?4 IS NULL OR (created_at, id) > (?4, ?5))
                 ORDER BY created_at ASC, id ASC
                 LIMIT ?6"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                params![
                    conversation_id,
                    channel.to_string(),
                    client_id,
                    cursor_at,
                    cursor_id,
                    limit as i64
                ],
                row_to_raw,
            )?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut data = Vec::with_capacity(raw_rows.len());
        for raw in raw_rows {
            data.push(self.finish_entry(raw)?);
        }

        let next_cursor = if data.len() == limit {
            data.last().map(|e: &Entry| {
                Cursor {
                    updated_at: e.created_at.clone(),
                    id: e.id.clone(),
                }
                .encode()
            })
        } else {
            None
        };

        Ok(Page { data, next_cursor })
    }

    fn entries_for_epoch(
        &self,
        conversation_id: &str,
        client_id: &str,
        epoch: i64,
    ) -> Result<Vec<Entry>> {
        let raw_rows: Vec<RawEntryRow> = {
            let conn = self.conn.lock().unwrap();
            let sql = format!(
                "SELECT {ENTRY_COLUMNS}
                 FROM entries
                 WHERE conversation_id = ?1 AND client_id = ?2 AND channel = 'MEMORY' AND memory_epoch = ?3
                 ORDER BY created_at ASC, id ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![conversation_id, client_id, epoch], row_to_raw)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        raw_rows.into_iter().map(|raw| self.finish_entry(raw)).collect()
    }

    fn latest_memory_epoch(&self, conversation_id: &str, client_id: &str) -> Result<Option<i64>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT MAX(memory_epoch) FROM entries
             WHERE conversation_id = ?1 AND client_id = ?2 AND channel = 'MEMORY'",
            params![conversation_id, client_id],
            |row| row.get(0),
        )
        .map_err(Into::into)
    }

    fn previous_history_entry(&self, conversation_id: &str, entry_id: &str) -> Result<Option<Entry>> {
        let raw = {
            let conn = self.conn.lock().unwrap();
            let anchor: Option<(String, String)> = conn
                .query_row(
                    "SELECT created_at, id FROM entries WHERE id = ?1 AND conversation_id = ?2",
                    params![entry_id, conversation_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let Some((created_at, id)) = anchor else {
                return Ok(None);
            };

            let sql = format!(
                "SELECT {ENTRY_COLUMNS}
                 FROM entries
                 WHERE conversation_id = ?1 AND channel = 'HISTORY'
                   AND (created_at, id) < (?2, ?3)
                 ORDER BY created_at DESC, id DESC
                 LIMIT 1"
            );
            conn.query_row(&sql, params![conversation_id, created_at, id], row_to_raw)
                .optional()?
        };
        raw.map(|r| self.finish_entry(r)).transpose()
    }

    fn get_entry(&self, id: &str) -> Result<Option<Entry>> {
        let raw = {
            let conn = self.conn.lock().unwrap();
            let sql = format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE id = ?1");
            conn.query_row(&sql, params![id], row_to_raw).optional()?
        };
        raw.map(|r| self.finish_entry(r)).transpose()
    }
}

fn sync_fts(
    conn: &rusqlite::Connection,
    entry_id: &str,
    conversation_id: &str,
    content: &[ContentBlock],
) -> rusqlite::Result<()> {
    let body = extract_text(content);
    if body.trim().is_empty() {
        return Ok(());
    }
    conn.execute(
        "INSERT INTO entries_fts (entry_id, conversation_id, body) VALUES (?1, ?2, ?3)",
        params![entry_id, conversation_id, body],
    )?;
    Ok(())
}

fn extract_text(content: &[ContentBlock]) -> String {
    content
        .iter()
        .filter_map(|block| block.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join("\n")
}
