use rusqlite::Connection;

use crate::error::Result;

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=3000;")?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            task_name TEXT UNIQUE,
            task_type TEXT NOT NULL,
            task_body TEXT NOT NULL,
            created_at TEXT NOT NULL,
            retry_at TEXT NOT NULL,
            processing_at TEXT,
            last_error TEXT,
            retry_count INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_retry_at ON tasks(retry_at);",
    )?;
    Ok(())
}
