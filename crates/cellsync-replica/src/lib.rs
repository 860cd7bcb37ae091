//! # cellsync Replica
//!
//! In-memory replicated documents and everything that keeps them alive:
//!
//! - [`Replica`]: one replicated document and its update fan-out
//! - [`protocol`]: the client sync frame codec
//! - [`PresenceTable`]: ephemeral per-client presence state
//! - [`PersistenceWriter`]: snapshot load and debounced flushes
//! - [`DocumentRegistry`]: one resident replica per document id, with eviction
//! - [`SyncSession`]: the per-connection side of the sync protocol

mod any;
pub mod error;
pub mod persistence;
pub mod presence;
pub mod protocol;
pub mod registry;
pub mod replica;
pub mod session;

pub use error::{ProtocolError, ReplicaError};
pub use persistence::{FlushHandle, PersistenceSettings, PersistenceWriter};
pub use presence::{PresenceChange, PresenceTable, PresenceUpdate};
pub use protocol::{Frame, SyncMessage};
pub use registry::{Document, DocumentRegistry};
pub use replica::{ConnectionId, Replica, ReplicaUpdate, UpdateOrigin};
pub use session::SyncSession;
