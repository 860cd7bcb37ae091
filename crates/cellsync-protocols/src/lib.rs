//! # cellsync Protocols
//!
//! Shared vocabulary for the cellsync workspace:
//!
//! - **Identifiers**: documents, users, kernel kinds and kernel keys
//! - **Records**: runtime status, execution results, kernel metadata
//! - **Collaborators**: the metadata store and access control traits
//! - **Slots**: a keyed map of async slots used for per-key serialization

pub mod access;
pub mod error;
pub mod ids;
pub mod permission;
pub mod record;
pub mod slots;
pub mod status;
pub mod store;

pub use access::AccessControl;
pub use error::{IdError, StoreError};
pub use ids::{DocumentId, KernelKey, KernelKind, UserId};
pub use permission::Permission;
pub use record::{DocumentAccess, KernelRecord};
pub use slots::{KeyedSlots, SlotGuard};
pub use status::{ExecutionFailure, ExecutionResult, KernelRuntime, OutputFragment, RuntimeStatus};
pub use store::MetadataStore;
