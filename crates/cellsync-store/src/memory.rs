//! In-memory metadata store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use cellsync_protocols::{
    DocumentAccess, DocumentId, KernelKey, KernelRecord, MetadataStore, StoreError, UserId,
};

/// Metadata store backed by process memory.
#[derive(Default)]
pub struct MemoryMetadataStore {
    snapshots: RwLock<HashMap<DocumentId, Vec<u8>>>,
    kernels: RwLock<HashMap<KernelKey, KernelRecord>>,
    access: RwLock<HashMap<DocumentId, DocumentAccess>>,
    sessions: RwLock<HashMap<String, UserId>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn load_snapshot(&self, document: &DocumentId) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.snapshots.read().await.get(document).cloned())
    }

    async fn save_snapshot(&self, document: &DocumentId, snapshot: &[u8]) -> Result<(), StoreError> {
        self.snapshots
            .write()
            .await
            .insert(document.clone(), snapshot.to_vec());
        Ok(())
    }

    async fn put_kernel(&self, record: &KernelRecord) -> Result<(), StoreError> {
        self.kernels
            .write()
            .await
            .insert(record.key(), record.clone());
        Ok(())
    }

    async fn get_kernel(&self, key: &KernelKey) -> Result<Option<KernelRecord>, StoreError> {
        Ok(self.kernels.read().await.get(key).cloned())
    }

    async fn delete_kernel(&self, key: &KernelKey) -> Result<(), StoreError> {
        self.kernels.write().await.remove(key);
        Ok(())
    }

    async fn kernels_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<KernelRecord>, StoreError> {
        let kernels = self.kernels.read().await;
        let mut expired: Vec<KernelRecord> = kernels
            .values()
            .filter(|record| record.created_at < cutoff)
            .cloned()
            .collect();
        expired.sort_by_key(|record| record.created_at);
        Ok(expired)
    }

    async fn list_kernels(&self) -> Result<Vec<KernelRecord>, StoreError> {
        let mut records: Vec<KernelRecord> = self.kernels.read().await.values().cloned().collect();
        records.sort_by_key(|record| record.created_at);
        Ok(records)
    }

    async fn document_access(&self, document: &DocumentId) -> Result<Option<DocumentAccess>, StoreError> {
        Ok(self.access.read().await.get(document).cloned())
    }

    async fn put_document_access(
        &self,
        document: &DocumentId,
        access: &DocumentAccess,
    ) -> Result<(), StoreError> {
        self.access
            .write()
            .await
            .insert(document.clone(), access.clone());
        Ok(())
    }

    async fn session_user(&self, token: &str) -> Result<Option<UserId>, StoreError> {
        Ok(self.sessions.read().await.get(token).cloned())
    }

    async fn put_session(&self, token: &str, user: &UserId) -> Result<(), StoreError> {
        self.sessions
            .write()
            .await
            .insert(token.to_string(), user.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellsync_protocols::KernelKind;
    use chrono::Duration;

    fn doc(id: &str) -> DocumentId {
        DocumentId::parse(id).unwrap()
    }

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip() {
        let store = MemoryMetadataStore::new();
        assert!(store.load_snapshot(&doc("d1")).await.unwrap().is_none());

        store.save_snapshot(&doc("d1"), &[1, 2, 3]).await.unwrap();
        store.save_snapshot(&doc("d1"), &[4]).await.unwrap();
        assert_eq!(store.load_snapshot(&doc("d1")).await.unwrap(), Some(vec![4]));
    }

    #[tokio::test]
    async fn test_kernels_created_before() {
        let store = MemoryMetadataStore::new();
        let now = Utc::now();
        let old = KernelRecord::new(
            &KernelKey::new(doc("old"), KernelKind::Python),
            user("alice"),
            now - Duration::minutes(61),
            Duration::hours(1),
        );
        let young = KernelRecord::new(
            &KernelKey::new(doc("young"), KernelKind::Python),
            user("alice"),
            now - Duration::minutes(30),
            Duration::hours(1),
        );
        store.put_kernel(&old).await.unwrap();
        store.put_kernel(&young).await.unwrap();

        let expired = store
            .kernels_created_before(now - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(expired, vec![old.clone()]);
        assert_eq!(store.list_kernels().await.unwrap().len(), 2);

        store.delete_kernel(&old.key()).await.unwrap();
        store.delete_kernel(&old.key()).await.unwrap();
        assert!(store.get_kernel(&old.key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_access_and_sessions() {
        let store = MemoryMetadataStore::new();
        let access = DocumentAccess::private(user("alice")).with_public(true);
        store.put_document_access(&doc("d1"), &access).await.unwrap();
        store.put_session("tok", &user("alice")).await.unwrap();

        assert_eq!(store.document_access(&doc("d1")).await.unwrap(), Some(access));
        assert_eq!(store.session_user("tok").await.unwrap(), Some(user("alice")));
        assert!(store.session_user("other").await.unwrap().is_none());
    }
}
