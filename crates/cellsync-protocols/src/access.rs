//! Access control trait.

use async_trait::async_trait;

use crate::ids::{DocumentId, UserId};
use crate::permission::Permission;

/// Resolves what the holder of an access token may do with a document.
#[async_trait]
pub trait AccessControl: Send + Sync {
    /// Permission of `token` on `document`. Failures resolve to `Permission::None`.
    async fn permission(&self, document: &DocumentId, token: &str) -> Permission;

    /// User behind a token, used to attribute kernels to their owner.
    async fn user(&self, token: &str) -> Option<UserId>;
}
