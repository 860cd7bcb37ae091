//! Application state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use cellsync_kernel::KernelOrchestrator;
use cellsync_protocols::{AccessControl, MetadataStore};
use cellsync_replica::DocumentRegistry;

/// Application state shared across handlers.
pub struct AppState {
    pub registry: Arc<DocumentRegistry>,
    pub orchestrator: Arc<KernelOrchestrator>,
    pub access: Arc<dyn AccessControl>,
    pub store: Arc<dyn MetadataStore>,
    start_time: Instant,
    open_connections: AtomicU64,
}

impl AppState {
    pub fn new(
        registry: Arc<DocumentRegistry>,
        orchestrator: Arc<KernelOrchestrator>,
        access: Arc<dyn AccessControl>,
        store: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            registry,
            orchestrator,
            access,
            store,
            start_time: Instant::now(),
            open_connections: AtomicU64::new(0),
        }
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    /// Number of sync connections currently open.
    pub fn open_connections(&self) -> u64 {
        self.open_connections.load(Ordering::Relaxed)
    }

    pub(crate) fn connection_opened(&self) {
        self.open_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_closed(&self) {
        self.open_connections.fetch_sub(1, Ordering::Relaxed);
    }
}
