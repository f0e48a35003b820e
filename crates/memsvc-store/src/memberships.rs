use memsvc_core::types::AccessLevel;
use rusqlite::{params, OptionalExtension};

use crate::db::Db;
use crate::error::{Result, StoreError};
use crate::types::Membership;

/// Memberships belong to the group, not any single conversation, so forks
/// automatically share them.
pub trait MembershipRepository {
    fn insert_membership(&self, group_id: &str, user_id: &str, level: AccessLevel) -> Result<()>;
    fn get_membership(&self, group_id: &str, user_id: &str) -> Result<Option<AccessLevel>>;
    fn list_memberships(&self, group_id: &str) -> Result<Vec<Membership>>;
    fn update_membership(&self, group_id: &str, user_id: &str, level: AccessLevel) -> Result<()>;
    /// Removes the membership and cascades to hard-delete any pending
    /// transfer targeting that user.
    fn delete_membership(&self, group_id: &str, user_id: &str) -> Result<()>;
    fn owner_of(&self, group_id: &str) -> Result<Option<String>>;
}

impl MembershipRepository for Db {
    fn insert_membership(&self, group_id: &str, user_id: &str, level: AccessLevel) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO memberships (conversation_group_id, user_id, access_level)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(conversation_group_id, user_id) DO UPDATE SET access_level = excluded.access_level",
            params![group_id, user_id, level.to_string()],
        )?;
        Ok(())
    }

    fn get_membership(&self, group_id: &str, user_id: &str) -> Result<Option<AccessLevel>> {
        let conn = self.conn.lock().unwrap();
        let level: Option<String> = conn
            .query_row(
                "SELECT access_level FROM memberships WHERE conversation_group_id = ?1 AND user_id = ?2",
                params![group_id, user_id],
                |row| row.get(0),
            )
            .optional()?;
        level
            .map(|s| s.parse().map_err(StoreError::BadRequest))
            .transpose()
    }

    fn list_memberships(&self, group_id: &str) -> Result<Vec<Membership>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT conversation_group_id, user_id, access_level
             FROM memberships WHERE conversation_group_id = ?1",
        )?;
        let rows = stmt.query_map(params![group_id], |row| {
            let level: String = row.get(2)?;
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, level))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (group_id, user_id, level) = row?;
            out.push(Membership {
                conversation_group_id: group_id,
                user_id,
                access_level: level.parse().map_err(StoreError::BadRequest)?,
            });
        }
        Ok(out)
    }

    fn update_membership(&self, group_id: &str, user_id: &str, level: AccessLevel) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE memberships SET access_level = ?3
             WHERE conversation_group_id = ?1 AND user_id = ?2",
            params![group_id, user_id, level.to_string()],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!(
                "no membership for user {user_id} in group {group_id}"
            )));
        }
        Ok(())
    }

    fn delete_membership(&self, group_id: &str, user_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM transfers WHERE conversation_group_id = ?1 AND to_user_id = ?2 AND status = 'PENDING'",
            params![group_id, user_id],
        )?;
        conn.execute(
            "DELETE FROM memberships WHERE conversation_group_id = ?1 AND user_id = ?2",
            params![group_id, user_id],
        )?;
        Ok(())
    }

    fn owner_of(&self, group_id: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT user_id FROM memberships WHERE conversation_group_id = ?1 AND access_level = 'OWNER'",
            params![group_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(Into::into)
    }
}
