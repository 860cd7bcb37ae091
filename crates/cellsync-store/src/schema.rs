//! Database schema management.

use rusqlite::Connection;
use tokio_rusqlite::Error;

/// Initialize the database schema.
pub fn init_schema(conn: &Connection) -> Result<(), Error> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

const SCHEMA: &str = r#"
-- Latest encoded state of each document
CREATE TABLE IF NOT EXISTS snapshots (
    document_id TEXT PRIMARY KEY,
    state BLOB NOT NULL,
    updated_at INTEGER NOT NULL
);

-- Provisioned kernels, timestamps in unix milliseconds
CREATE TABLE IF NOT EXISTS kernels (
    document_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    owner TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    recycle_deadline INTEGER NOT NULL,
    PRIMARY KEY (document_id, kind)
);

CREATE TABLE IF NOT EXISTS document_access (
    document_id TEXT PRIMARY KEY,
    owner TEXT NOT NULL,
    collaborators TEXT NOT NULL DEFAULT '[]',
    public INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS sessions (
    token TEXT PRIMARY KEY,
    user_id TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_kernels_created ON kernels(created_at);
"#;
