use rusqlite::{params, OptionalExtension};

use crate::db::Db;
use crate::error::Result;
use crate::types::ConversationGroup;

/// Owns `ConversationGroup` rows. Groups are created implicitly by
/// `ConversationRepository::create_conversation`/`fork`; this trait exposes
/// the reads and the hard-delete used by eviction.
pub trait GroupRepository {
    fn insert_group(
        &self,
        id: &str,
        organization_id: Option<&str>,
        team_id: Option<&str>,
    ) -> Result<ConversationGroup>;
    fn get_group(&self, id: &str) -> Result<Option<ConversationGroup>>;
    fn soft_delete_group_if_empty(&self, id: &str) -> Result<()>;
    fn hard_delete_group(&self, id: &str) -> Result<()>;
}

impl GroupRepository for Db {
    fn insert_group(
        &self,
        id: &str,
        organization_id: Option<&str>,
        team_id: Option<&str>,
    ) -> Result<ConversationGroup> {
        let conn = self.conn.lock().unwrap();
        let created_at = Db::now();
        conn.execute(
            "INSERT INTO conversation_groups (id, organization_id, team_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![id, organization_id, team_id, created_at],
        )?;
        Ok(ConversationGroup {
            id: id.to_string(),
            organization_id: organization_id.map(str::to_string),
            team_id: team_id.map(str::to_string),
            created_at,
            deleted_at: None,
        })
    }

    fn get_group(&self, id: &str) -> Result<Option<ConversationGroup>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, organization_id, team_id, created_at, deleted_at
             FROM conversation_groups WHERE id = ?1",
            params![id],
            |row| {
                Ok(ConversationGroup {
                    id: row.get(0)?,
                    organization_id: row.get(1)?,
                    team_id: row.get(2)?,
                    created_at: row.get(3)?,
                    deleted_at: row.get(4)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    /// Called after a conversation's last row in the group is removed; a
    /// group with no remaining conversations is cleaned up eagerly rather
    /// than waiting for the next eviction pass.
    fn soft_delete_group_if_empty(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let remaining: i64 = conn.query_row(
            "SELECT COUNT(*) FROM conversations WHERE conversation_group_id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        if remaining == 0 {
            conn.execute(
                "UPDATE conversation_groups SET deleted_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
                params![id, Db::now()],
            )?;
        }
        Ok(())
    }

    fn hard_delete_group(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM conversation_groups WHERE id = ?1", params![id])?;
        Ok(())
    }
}
