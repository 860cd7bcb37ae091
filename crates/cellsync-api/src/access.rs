//! Access control backed by the metadata store.

use std::sync::Arc;

use async_trait::async_trait;
use cellsync_protocols::{AccessControl, DocumentId, MetadataStore, Permission, UserId};
use tracing::{debug, warn};

/// Resolves permissions from session tokens and document sharing records.
pub struct MetadataAccessControl {
    store: Arc<dyn MetadataStore>,
    read_only: bool,
}

impl MetadataAccessControl {
    pub fn new(store: Arc<dyn MetadataStore>, read_only: bool) -> Self {
        Self { store, read_only }
    }
}

#[async_trait]
impl AccessControl for MetadataAccessControl {
    async fn permission(&self, document: &DocumentId, token: &str) -> Permission {
        let Some(user) = self.user(token).await else {
            return Permission::None;
        };
        let access = match self.store.document_access(document).await {
            Ok(Some(access)) => access,
            Ok(None) => {
                debug!("No access record for {}", document);
                return Permission::None;
            }
            Err(e) => {
                warn!("Failed to read access of {}: {}", document, e);
                return Permission::None;
            }
        };

        let permission = if access.can_edit(&user) {
            Permission::Write
        } else if access.public {
            Permission::Read
        } else {
            Permission::None
        };
        permission.restrict(self.read_only)
    }

    async fn user(&self, token: &str) -> Option<UserId> {
        if token.is_empty() {
            return None;
        }
        match self.store.session_user(token).await {
            Ok(user) => user,
            Err(e) => {
                warn!("Failed to resolve session token: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellsync_protocols::DocumentAccess;
    use cellsync_store::MemoryMetadataStore;

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    async fn store() -> Arc<dyn MetadataStore> {
        let store: Arc<dyn MetadataStore> = Arc::new(MemoryMetadataStore::new());
        store.put_session("alice-token", &user("alice")).await.unwrap();
        store.put_session("bob-token", &user("bob")).await.unwrap();
        store.put_session("carol-token", &user("carol")).await.unwrap();

        let shared = DocumentAccess::private(user("alice")).with_collaborator(user("bob"));
        store
            .put_document_access(&DocumentId::parse("shared").unwrap(), &shared)
            .await
            .unwrap();
        let public = DocumentAccess::private(user("alice")).with_public(true);
        store
            .put_document_access(&DocumentId::parse("public").unwrap(), &public)
            .await
            .unwrap();
        store
    }

    fn doc(id: &str) -> DocumentId {
        DocumentId::parse(id).unwrap()
    }

    #[tokio::test]
    async fn test_owner_and_collaborator_write() {
        let access = MetadataAccessControl::new(store().await, false);
        assert_eq!(access.permission(&doc("shared"), "alice-token").await, Permission::Write);
        assert_eq!(access.permission(&doc("shared"), "bob-token").await, Permission::Write);
        assert_eq!(access.permission(&doc("shared"), "carol-token").await, Permission::None);
    }

    #[tokio::test]
    async fn test_public_documents_are_readable() {
        let access = MetadataAccessControl::new(store().await, false);
        assert_eq!(access.permission(&doc("public"), "carol-token").await, Permission::Read);
        assert_eq!(access.permission(&doc("public"), "alice-token").await, Permission::Write);
    }

    #[tokio::test]
    async fn test_unknown_token_or_document() {
        let access = MetadataAccessControl::new(store().await, false);
        assert_eq!(access.permission(&doc("shared"), "nobody").await, Permission::None);
        assert_eq!(access.permission(&doc("shared"), "").await, Permission::None);
        assert_eq!(access.permission(&doc("missing"), "alice-token").await, Permission::None);
    }

    #[tokio::test]
    async fn test_read_only_downgrades_write() {
        let access = MetadataAccessControl::new(store().await, true);
        assert_eq!(access.permission(&doc("shared"), "alice-token").await, Permission::Read);
        assert_eq!(access.permission(&doc("public"), "carol-token").await, Permission::Read);
    }

    #[tokio::test]
    async fn test_user_lookup() {
        let access = MetadataAccessControl::new(store().await, false);
        assert_eq!(access.user("bob-token").await, Some(user("bob")));
        assert_eq!(access.user("nobody").await, None);
    }
}
