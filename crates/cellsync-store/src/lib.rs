//! # cellsync Store
//!
//! Implementations of [`MetadataStore`](cellsync_protocols::MetadataStore):
//!
//! - [`MemoryMetadataStore`]: process-local maps, for tests and throwaway servers
//! - [`SqliteMetadataStore`]: durable SQLite database

mod memory;
mod schema;
mod sqlite;

pub use memory::MemoryMetadataStore;
pub use sqlite::SqliteMetadataStore;
