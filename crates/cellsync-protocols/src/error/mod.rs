//! Error types shared across the cellsync crates.

mod id;
mod store;

pub use id::*;
pub use store::*;
