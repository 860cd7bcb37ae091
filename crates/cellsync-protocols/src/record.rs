//! Records kept in the metadata store.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{DocumentId, KernelKey, KernelKind, UserId};

/// Lifecycle metadata of one provisioned kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelRecord {
    pub document: DocumentId,
    pub kind: KernelKind,
    pub owner: UserId,
    pub created_at: DateTime<Utc>,
    pub recycle_deadline: DateTime<Utc>,
}

impl KernelRecord {
    pub fn new(key: &KernelKey, owner: UserId, created_at: DateTime<Utc>, max_lifetime: Duration) -> Self {
        Self {
            document: key.document.clone(),
            kind: key.kind,
            owner,
            created_at,
            recycle_deadline: created_at + max_lifetime,
        }
    }

    pub fn key(&self) -> KernelKey {
        KernelKey::new(self.document.clone(), self.kind)
    }
}

/// Ownership and sharing state of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentAccess {
    pub owner: UserId,
    #[serde(default)]
    pub collaborators: Vec<UserId>,
    #[serde(default)]
    pub public: bool,
}

impl DocumentAccess {
    pub fn private(owner: UserId) -> Self {
        Self {
            owner,
            collaborators: Vec::new(),
            public: false,
        }
    }

    pub fn with_collaborator(mut self, user: UserId) -> Self {
        self.collaborators.push(user);
        self
    }

    pub fn with_public(mut self, public: bool) -> Self {
        self.public = public;
        self
    }

    pub fn can_edit(&self, user: &UserId) -> bool {
        &self.owner == user || self.collaborators.contains(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    #[test]
    fn test_kernel_record_deadline() {
        let key = KernelKey::new(DocumentId::parse("doc").unwrap(), KernelKind::Python);
        let now = Utc::now();
        let record = KernelRecord::new(&key, user("alice"), now, Duration::hours(1));
        assert_eq!(record.recycle_deadline - record.created_at, Duration::hours(1));
        assert_eq!(record.key(), key);
    }

    #[test]
    fn test_document_access_can_edit() {
        let access = DocumentAccess::private(user("alice")).with_collaborator(user("bob"));
        assert!(access.can_edit(&user("alice")));
        assert!(access.can_edit(&user("bob")));
        assert!(!access.can_edit(&user("carol")));
        assert!(!access.public);
    }
}
