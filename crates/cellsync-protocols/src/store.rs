//! Metadata store trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::ids::{DocumentId, KernelKey, UserId};
use crate::record::{DocumentAccess, KernelRecord};

/// Keyed read/write access to the relational metadata store.
///
/// Snapshots are opaque encoded document states; kernel records drive the
/// recycler; access records and sessions drive permission resolution.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Latest snapshot of a document, if one was ever written.
    async fn load_snapshot(&self, document: &DocumentId) -> Result<Option<Vec<u8>>, StoreError>;

    /// Replace the stored snapshot of a document.
    async fn save_snapshot(&self, document: &DocumentId, snapshot: &[u8]) -> Result<(), StoreError>;

    /// Insert or replace a kernel record.
    async fn put_kernel(&self, record: &KernelRecord) -> Result<(), StoreError>;

    async fn get_kernel(&self, key: &KernelKey) -> Result<Option<KernelRecord>, StoreError>;

    /// Delete a kernel record. Deleting a missing record is not an error.
    async fn delete_kernel(&self, key: &KernelKey) -> Result<(), StoreError>;

    /// Kernel records created strictly before `cutoff`.
    async fn kernels_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<KernelRecord>, StoreError>;

    async fn list_kernels(&self) -> Result<Vec<KernelRecord>, StoreError>;

    async fn document_access(&self, document: &DocumentId) -> Result<Option<DocumentAccess>, StoreError>;

    async fn put_document_access(
        &self,
        document: &DocumentId,
        access: &DocumentAccess,
    ) -> Result<(), StoreError>;

    /// User owning an access token, if the token is known.
    async fn session_user(&self, token: &str) -> Result<Option<UserId>, StoreError>;

    async fn put_session(&self, token: &str, user: &UserId) -> Result<(), StoreError>;
}
