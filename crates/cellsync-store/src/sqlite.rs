//! SQLite metadata store.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Row, params};
use tokio_rusqlite::Connection;
use tracing::debug;

use cellsync_protocols::{
    DocumentAccess, DocumentId, KernelKey, KernelKind, KernelRecord, MetadataStore, StoreError,
    UserId,
};

use crate::schema::init_schema;

#[cfg(test)]
#[path = "sqlite_tests.rs"]
mod tests;

/// SQLite-based metadata store.
pub struct SqliteMetadataStore {
    conn: Connection,
}

impl SqliteMetadataStore {
    /// Create a new in-memory database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Self::init(conn).await
    }

    /// Open (or create) a file-backed database.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StoreError::Connection(e.to_string()))?;
            }
        }
        debug!("Opening metadata store at {:?}", path);
        let conn = Connection::open(path)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|conn| Ok(init_schema(conn)?))
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(Self { conn })
    }
}

fn conversion_error(
    column: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err))
}

fn timestamp(column: usize, millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or(rusqlite::Error::IntegralValueOutOfRange(
        column, millis,
    ))
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<KernelRecord> {
    let document: String = row.get(0)?;
    let kind: String = row.get(1)?;
    let owner: String = row.get(2)?;
    let created_at: i64 = row.get(3)?;
    let recycle_deadline: i64 = row.get(4)?;

    Ok(KernelRecord {
        document: DocumentId::parse(document).map_err(|e| conversion_error(0, e))?,
        kind: kind.parse::<KernelKind>().map_err(|e| conversion_error(1, e))?,
        owner: UserId::parse(owner).map_err(|e| conversion_error(2, e))?,
        created_at: timestamp(3, created_at)?,
        recycle_deadline: timestamp(4, recycle_deadline)?,
    })
}

const KERNEL_COLUMNS: &str = "document_id, kind, owner, created_at, recycle_deadline";

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn load_snapshot(&self, document: &DocumentId) -> Result<Option<Vec<u8>>, StoreError> {
        let document = document.to_string();
        self.conn
            .call(move |conn| {
                let state = conn
                    .query_row(
                        "SELECT state FROM snapshots WHERE document_id = ?1",
                        [&document],
                        |row| row.get::<_, Vec<u8>>(0),
                    )
                    .optional()?;
                Ok(state)
            })
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))
    }

    async fn save_snapshot(&self, document: &DocumentId, snapshot: &[u8]) -> Result<(), StoreError> {
        let document = document.to_string();
        let snapshot = snapshot.to_vec();
        let now = Utc::now().timestamp_millis();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO snapshots (document_id, state, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(document_id) DO UPDATE SET state = excluded.state, updated_at = excluded.updated_at",
                    params![document, snapshot, now],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))
    }

    async fn put_kernel(&self, record: &KernelRecord) -> Result<(), StoreError> {
        let record = record.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO kernels (document_id, kind, owner, created_at, recycle_deadline)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        record.document.as_str(),
                        record.kind.as_str(),
                        record.owner.as_str(),
                        record.created_at.timestamp_millis(),
                        record.recycle_deadline.timestamp_millis(),
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))
    }

    async fn get_kernel(&self, key: &KernelKey) -> Result<Option<KernelRecord>, StoreError> {
        let document = key.document.to_string();
        let kind = key.kind.as_str();
        self.conn
            .call(move |conn| {
                let record = conn
                    .query_row(
                        &format!("SELECT {KERNEL_COLUMNS} FROM kernels WHERE document_id = ?1 AND kind = ?2"),
                        params![document, kind],
                        row_to_record,
                    )
                    .optional()?;
                Ok(record)
            })
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))
    }

    async fn delete_kernel(&self, key: &KernelKey) -> Result<(), StoreError> {
        let document = key.document.to_string();
        let kind = key.kind.as_str();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM kernels WHERE document_id = ?1 AND kind = ?2",
                    params![document, kind],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))
    }

    async fn kernels_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<KernelRecord>, StoreError> {
        let cutoff = cutoff.timestamp_millis();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {KERNEL_COLUMNS} FROM kernels WHERE created_at < ?1 ORDER BY created_at"
                ))?;
                let records = stmt
                    .query_map([cutoff], row_to_record)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(records)
            })
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))
    }

    async fn list_kernels(&self) -> Result<Vec<KernelRecord>, StoreError> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {KERNEL_COLUMNS} FROM kernels ORDER BY created_at"
                ))?;
                let records = stmt
                    .query_map([], row_to_record)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(records)
            })
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))
    }

    async fn document_access(&self, document: &DocumentId) -> Result<Option<DocumentAccess>, StoreError> {
        let document = document.to_string();
        let row = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT owner, collaborators, public FROM document_access WHERE document_id = ?1",
                        [&document],
                        |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, bool>(2)?,
                            ))
                        },
                    )
                    .optional()?;
                Ok(row)
            })
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        let Some((owner, collaborators, public)) = row else {
            return Ok(None);
        };
        let owner = UserId::parse(owner).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let collaborators: Vec<UserId> = serde_json::from_str(&collaborators)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(Some(DocumentAccess {
            owner,
            collaborators,
            public,
        }))
    }

    async fn put_document_access(
        &self,
        document: &DocumentId,
        access: &DocumentAccess,
    ) -> Result<(), StoreError> {
        let document = document.to_string();
        let owner = access.owner.to_string();
        let collaborators = serde_json::to_string(&access.collaborators)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let public = access.public;
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO document_access (document_id, owner, collaborators, public)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![document, owner, collaborators, public],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))
    }

    async fn session_user(&self, token: &str) -> Result<Option<UserId>, StoreError> {
        let token = token.to_string();
        let user = self
            .conn
            .call(move |conn| {
                let user = conn
                    .query_row(
                        "SELECT user_id FROM sessions WHERE token = ?1",
                        [&token],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                Ok(user)
            })
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        user.map(|id| UserId::parse(id).map_err(|e| StoreError::Serialization(e.to_string())))
            .transpose()
    }

    async fn put_session(&self, token: &str, user: &UserId) -> Result<(), StoreError> {
        let token = token.to_string();
        let user = user.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO sessions (token, user_id) VALUES (?1, ?2)",
                    params![token, user],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))
    }
}
