use rusqlite::{Connection, Result};

/// Creates every table this crate owns. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    create_groups_table(conn)?;
    create_conversations_table(conn)?;
    create_entries_table(conn)?;
    create_entries_fts(conn)?;
    create_memberships_table(conn)?;
    create_transfers_table(conn)?;
    create_dek_table(conn)?;
    create_attachments_table(conn)?;
    Ok(())
}

fn create_groups_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversation_groups (
            id              TEXT PRIMARY KEY,
            organization_id TEXT,
            team_id         TEXT,
            created_at      TEXT NOT NULL,
            deleted_at      TEXT
        );",
    )
}

fn create_conversations_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversations (
            id                          TEXT PRIMARY KEY,
            conversation_group_id       TEXT NOT NULL REFERENCES conversation_groups(id),
            owner_user_id               TEXT NOT NULL,
            title                       BLOB,
            metadata                    TEXT,
            created_at                  TEXT NOT NULL,
            updated_at                  TEXT NOT NULL,
            forked_at_conversation_id   TEXT,
            forked_at_entry_id          TEXT,
            vectorized_at               TEXT,
            deleted_at                  TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_conversations_group
            ON conversations(conversation_group_id);
        CREATE INDEX IF NOT EXISTS idx_conversations_cursor
            ON conversations(updated_at, id);
        CREATE INDEX IF NOT EXISTS idx_conversations_deleted_at
            ON conversations(deleted_at);",
    )
}

fn create_entries_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS entries (
            id                      TEXT PRIMARY KEY,
            conversation_id         TEXT NOT NULL REFERENCES conversations(id),
            conversation_group_id   TEXT NOT NULL,
            user_id                 TEXT,
            client_id               TEXT,
            channel                 TEXT NOT NULL,
            memory_epoch            INTEGER,
            content                 BLOB NOT NULL,
            created_at              TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_entries_conv_channel
            ON entries(conversation_id, channel, created_at, id);
        CREATE INDEX IF NOT EXISTS idx_entries_memory_scope
            ON entries(conversation_id, client_id, memory_epoch);",
    )
}

/// Plaintext shadow index backing `searchConversations`'s full-text search.
/// `entries.content` is ciphertext, so this table carries the decrypted text
/// blocks alongside, synced manually at write time.
/// `MEMORY`-channel entries are never inserted here, by construction.
fn create_entries_fts(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS entries_fts
            USING fts5(entry_id UNINDEXED, conversation_id UNINDEXED, body);",
    )
}

fn create_memberships_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS memberships (
            conversation_group_id   TEXT NOT NULL REFERENCES conversation_groups(id),
            user_id                 TEXT NOT NULL,
            access_level            TEXT NOT NULL,
            PRIMARY KEY (conversation_group_id, user_id)
        );",
    )
}

fn create_transfers_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS transfers (
            id                      TEXT PRIMARY KEY,
            conversation_group_id   TEXT NOT NULL REFERENCES conversation_groups(id),
            from_user_id            TEXT NOT NULL,
            to_user_id              TEXT NOT NULL,
            status                  TEXT NOT NULL,
            created_at              TEXT NOT NULL,
            updated_at              TEXT NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_transfers_one_pending_per_group
            ON transfers(conversation_group_id) WHERE status = 'PENDING';",
    )
}

/// Singleton row (`id` pinned to 1) holding the wrapped DEK set.
fn create_dek_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS deks (
            id              INTEGER PRIMARY KEY CHECK (id = 1),
            provider_id     INTEGER NOT NULL,
            primary_wrapped BLOB NOT NULL,
            legacy_wrapped  TEXT NOT NULL
        );",
    )
}

/// `cleanup_claimed_by` mirrors the conversation-eviction claim marker: a
/// scheduled cleanup tags a row before deleting its blob, so two concurrent
/// cleanup ticks never both try to delete (and double-enqueue-delete) the
/// same attachment.
fn create_attachments_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS attachments (
            id                  TEXT PRIMARY KEY,
            conversation_id     TEXT NOT NULL REFERENCES conversations(id),
            storage_key         TEXT NOT NULL,
            sha256              TEXT NOT NULL,
            size                INTEGER NOT NULL,
            content_type        TEXT NOT NULL,
            created_at          TEXT NOT NULL,
            expires_at          TEXT,
            cleanup_claimed_by  TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_attachments_conversation
            ON attachments(conversation_id);
        CREATE INDEX IF NOT EXISTS idx_attachments_expires_at
            ON attachments(expires_at) WHERE expires_at IS NOT NULL;",
    )
}
