use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, Row};

use crate::error::Result;
use crate::schema;
use crate::types::{NewTask, Task};

fn row_to_task(row: &Row) -> rusqlite::Result<(Task, String)> {
    let body_json: String = row.get(3)?;
    Ok((
        Task {
            id: row.get(0)?,
            task_name: row.get(1)?,
            task_type: row.get(2)?,
            task_body: serde_json::Value::Null, // filled in by caller after parsing body_json
            created_at: row.get(4)?,
            retry_at: row.get(5)?,
            processing_at: row.get(6)?,
            last_error: row.get(7)?,
            retry_count: row.get(8)?,
        },
        body_json,
    ))
}

const SELECT_COLUMNS: &str =
    "id, task_name, task_type, task_body, created_at, retry_at, processing_at, last_error, retry_count";

/// SQLite-backed task store. One connection per process, guarded by a mutex
/// — the same single-writer discipline `memsvc-store::Db` uses, and for the
/// same reason: `rusqlite::Connection` isn't `Sync` and SQLite only really
/// supports one writer at a time regardless.
pub struct TaskQueue {
    conn: Mutex<Connection>,
}

impl TaskQueue {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        schema::init_db(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::init_db(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Enqueues `task`. Returns `Ok(None)` when `task.task_name` is set and a
    /// row with that name already exists — the singleton no-op contract.
    pub fn enqueue(&self, task: NewTask) -> Result<Option<Task>> {
        let conn = self.conn.lock().expect("task queue connection poisoned");
        let id = memsvc_core::types::new_id();
        let now = Utc::now().to_rfc3339();
        let body = serde_json::to_string(&task.task_body)?;

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO tasks (id, task_name, task_type, task_body, created_at, retry_at, retry_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5, 0)",
            params![id, task.task_name, task.task_type, body, now],
        )?;
        if inserted == 0 {
            return Ok(None);
        }
        Ok(Some(Task {
            id,
            task_name: task.task_name,
            task_type: task.task_type,
            task_body: task.task_body,
            created_at: now.clone(),
            retry_at: now,
            processing_at: None,
            last_error: None,
            retry_count: 0,
        }))
    }

    /// Atomically claims up to `batch_size` due tasks: `retry_at` has
    /// arrived and the task isn't already claimed by a still-live worker
    /// (`processing_at` null or older than `stale_cutoff`).
    pub fn claim(&self, now: &str, stale_cutoff: &str, batch_size: usize) -> Result<Vec<Task>> {
        let conn = self.conn.lock().expect("task queue connection poisoned");
        let sql = format!(
            "UPDATE tasks SET processing_at = ?1
             WHERE id IN (
                SELECT id FROM tasks
                WHERE retry_at <= ?2 AND (processing_at IS NULL OR processing_at < ?3)
                ORDER BY retry_at
                LIMIT ?4
             )
             RETURNING {SELECT_COLUMNS}"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![now, now, stale_cutoff, batch_size as i64], |row| row_to_task(row))?;
        let mut out = Vec::new();
        for row in rows {
            let (mut task, body_json) = row?;
            task.task_body = serde_json::from_str(&body_json)?;
            out.push(task);
        }
        out.sort_by(|a, b| a.retry_at.cmp(&b.retry_at));
        Ok(out)
    }

    pub fn mark_success(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().expect("task queue connection poisoned");
        conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn mark_failure(&self, id: &str, error: &str, retry_at: &str) -> Result<()> {
        let conn = self.conn.lock().expect("task queue connection poisoned");
        conn.execute(
            "UPDATE tasks SET last_error = ?2, retry_count = retry_count + 1, retry_at = ?3, processing_at = NULL
             WHERE id = ?1",
            params![id, error, retry_at],
        )?;
        Ok(())
    }

    /// Diagnostics only — the full task list, unfiltered. Used by `/health`.
    pub fn list(&self) -> Result<Vec<Task>> {
        let conn = self.conn.lock().expect("task queue connection poisoned");
        let sql = format!("SELECT {SELECT_COLUMNS} FROM tasks ORDER BY retry_at");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| row_to_task(row))?;
        let mut out = Vec::new();
        for row in rows {
            let (mut task, body_json) = row?;
            task.task_body = serde_json::from_str(&body_json)?;
            out.push(task);
        }
        Ok(out)
    }

    pub fn count_pending(&self) -> Result<i64> {
        let conn = self.conn.lock().expect("task queue connection poisoned");
        conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0)).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn singleton_second_enqueue_is_a_noop() {
        let q = TaskQueue::open_in_memory().unwrap();
        let first = q.enqueue(NewTask::singleton("vector_store_index_retry", json!({}), "index-retry")).unwrap();
        assert!(first.is_some());
        let second = q.enqueue(NewTask::singleton("vector_store_index_retry", json!({}), "index-retry")).unwrap();
        assert!(second.is_none());
        assert_eq!(q.count_pending().unwrap(), 1);
    }

    #[test]
    fn claim_is_exclusive_until_stale() {
        let q = TaskQueue::open_in_memory().unwrap();
        q.enqueue(NewTask::new("vector_store_delete", json!({"conversation_group_id": "g1"}))).unwrap();

        let now = "2026-01-01T00:00:10Z";
        let stale_cutoff = "2026-01-01T00:00:00Z";
        let claimed = q.claim(now, stale_cutoff, 10).unwrap();
        assert_eq!(claimed.len(), 1);

        // Second claim with the same "now": the row is processing and not
        // stale yet, so nothing new is claimed.
        let second = q.claim(now, stale_cutoff, 10).unwrap();
        assert!(second.is_empty());

        // Advance the stale cutoff past the claim: it's re-claimable.
        let later_cutoff = "2026-01-01T00:00:20Z";
        let reclaimed = q.claim(now, later_cutoff, 10).unwrap();
        assert_eq!(reclaimed.len(), 1);
    }

    #[test]
    fn failure_reschedules_and_records_error() {
        let q = TaskQueue::open_in_memory().unwrap();
        let task = q.enqueue(NewTask::new("vector_store_delete", json!({}))).unwrap().unwrap();
        q.claim("2026-01-01T00:00:00Z", "2000-01-01T00:00:00Z", 10).unwrap();
        q.mark_failure(&task.id, "boom", "2026-01-01T00:01:00Z").unwrap();

        let tasks = q.list().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].retry_count, 1);
        assert_eq!(tasks[0].last_error.as_deref(), Some("boom"));
        assert!(tasks[0].processing_at.is_none());
    }

    #[test]
    fn success_deletes_the_row() {
        let q = TaskQueue::open_in_memory().unwrap();
        let task = q.enqueue(NewTask::new("vector_store_delete", json!({}))).unwrap().unwrap();
        q.mark_success(&task.id).unwrap();
        assert_eq!(q.count_pending().unwrap(), 0);
    }
}
