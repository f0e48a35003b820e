use memsvc_core::types::new_id;
use rusqlite::{params, OptionalExtension};

use crate::db::Db;
use crate::error::{Result, StoreError};
use crate::types::{OwnershipTransfer, TransferStatus};

pub trait TransferRepository {
    /// Fails with a `Conflict` carrying the existing transfer's id if one is
    /// already `PENDING` for the group.
    fn insert_pending_transfer(
        &self,
        group_id: &str,
        from_user_id: &str,
        to_user_id: &str,
    ) -> Result<OwnershipTransfer>;
    fn get_transfer(&self, id: &str) -> Result<Option<OwnershipTransfer>>;
    fn delete_transfer(&self, id: &str) -> Result<()>;
    fn pending_transfer_for_group(&self, group_id: &str) -> Result<Option<OwnershipTransfer>>;
}

impl TransferRepository for Db {
    fn insert_pending_transfer(
        &self,
        group_id: &str,
        from_user_id: &str,
        to_user_id: &str,
    ) -> Result<OwnershipTransfer> {
        let conn = self.conn.lock().unwrap();
        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM transfers WHERE conversation_group_id = ?1 AND status = 'PENDING'",
                params![group_id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(existing_id) = existing {
            return Err(StoreError::Conflict {
                message: format!("a transfer is already pending for this group: {existing_id}"),
                code: "TRANSFER_ALREADY_PENDING",
                details: serde_json::json!({ "transferId": existing_id }),
            });
        }

        let id = new_id();
        let now = Db::now();
        conn.execute(
            "INSERT INTO transfers
                (id, conversation_group_id, from_user_id, to_user_id, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'PENDING', ?5, ?5)",
            params![id, group_id, from_user_id, to_user_id, now],
        )?;
        Ok(OwnershipTransfer {
            id,
            conversation_group_id: group_id.to_string(),
            from_user_id: from_user_id.to_string(),
            to_user_id: to_user_id.to_string(),
            status: TransferStatus::Pending,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    fn get_transfer(&self, id: &str) -> Result<Option<OwnershipTransfer>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, conversation_group_id, from_user_id, to_user_id, status, created_at, updated_at
             FROM transfers WHERE id = ?1",
            params![id],
            row_to_transfer,
        )
        .optional()
        .map_err(Into::into)
    }

    fn delete_transfer(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM transfers WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn pending_transfer_for_group(&self, group_id: &str) -> Result<Option<OwnershipTransfer>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, conversation_group_id, from_user_id, to_user_id, status, created_at, updated_at
             FROM transfers WHERE conversation_group_id = ?1 AND status = 'PENDING'",
            params![group_id],
            row_to_transfer,
        )
        .optional()
        .map_err(Into::into)
    }
}

fn row_to_transfer(row: &rusqlite::Row<'_>) -> rusqlite::Result<OwnershipTransfer> {
    Ok(OwnershipTransfer {
        id: row.get(0)?,
        conversation_group_id: row.get(1)?,
        from_user_id: row.get(2)?,
        to_user_id: row.get(3)?,
        status: TransferStatus::Pending,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}
