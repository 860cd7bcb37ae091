//! Process-wide registry of resident documents.
//!
//! Every operation on a document id runs under that id's slot lock, so
//! creating, connecting, evicting and destroying one document are strictly
//! ordered while other documents proceed independently.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use cellsync_protocols::{DocumentId, KernelKind, KeyedSlots, Permission, SlotGuard};

use crate::error::{ProtocolError, ReplicaError};
use crate::persistence::{FlushHandle, PersistenceWriter};
use crate::presence::{PresenceChange, PresenceTable, PresenceUpdate};
use crate::replica::{ConnectionId, Replica};
use crate::session::SyncSession;

const PRESENCE_CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
struct Residency {
    connections: HashSet<ConnectionId>,
    /// Kernel kinds whose bridge writes into this document.
    pins: HashSet<KernelKind>,
    eviction: Option<PendingEviction>,
}

struct PendingEviction {
    generation: u64,
    cancel: CancellationToken,
}

impl Residency {
    fn is_idle(&self) -> bool {
        self.connections.is_empty() && self.pins.is_empty()
    }

    fn cancel_eviction(&mut self) -> bool {
        match self.eviction.take() {
            Some(pending) => {
                pending.cancel.cancel();
                true
            }
            None => false,
        }
    }
}

/// A resident document: its replica, flush task, presence and connections.
pub struct Document {
    id: DocumentId,
    replica: Arc<Replica>,
    flush: FlushHandle,
    presence: Mutex<PresenceTable>,
    presence_tx: broadcast::Sender<PresenceUpdate>,
    residency: Mutex<Residency>,
}

impl Document {
    fn new(replica: Arc<Replica>, flush: FlushHandle) -> Self {
        let (presence_tx, _) = broadcast::channel(PRESENCE_CHANNEL_CAPACITY);
        Self {
            id: replica.document().clone(),
            replica,
            flush,
            presence: Mutex::new(PresenceTable::new()),
            presence_tx,
            residency: Mutex::new(Residency::default()),
        }
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    pub fn replica(&self) -> &Arc<Replica> {
        &self.replica
    }

    pub fn flush(&self) -> &FlushHandle {
        &self.flush
    }

    pub fn connection_count(&self) -> usize {
        self.residency.lock().connections.len()
    }

    pub fn is_pinned(&self) -> bool {
        !self.residency.lock().pins.is_empty()
    }

    pub(crate) fn subscribe_presence(&self) -> broadcast::Receiver<PresenceUpdate> {
        self.presence_tx.subscribe()
    }

    pub(crate) fn presence_snapshot(&self) -> Option<Vec<u8>> {
        self.presence.lock().snapshot()
    }

    /// Apply a client's presence update and fan out what changed.
    pub(crate) fn apply_presence(
        &self,
        origin: ConnectionId,
        payload: &[u8],
    ) -> Result<PresenceChange, ProtocolError> {
        let mut presence = self.presence.lock();
        let change = presence.apply(payload)?;
        if !change.is_empty() {
            let clients: Vec<u64> = change.changed().copied().collect();
            let _ = self.presence_tx.send(PresenceUpdate {
                origin: Some(origin),
                payload: presence.encode(&clients).into(),
            });
        }
        Ok(change)
    }

    fn remove_presence(&self, clients: &HashSet<u64>) {
        let mut presence = self.presence.lock();
        if let Some(payload) = presence.remove(clients) {
            let _ = self.presence_tx.send(PresenceUpdate {
                origin: None,
                payload: payload.into(),
            });
        }
    }

    /// Flush pending changes and stop the flush task.
    async fn destroy(&self) {
        if let Err(e) = self.flush.close().await {
            error!("Final flush of {} failed: {}", self.id, e);
        }
        info!("Destroyed replica of {}", self.id);
    }
}

/// One resident [`Document`] per document id.
pub struct DocumentRegistry {
    slots: KeyedSlots<DocumentId, Arc<Document>>,
    writer: PersistenceWriter,
    eviction_grace: Duration,
    next_connection: AtomicU64,
    next_eviction: AtomicU64,
}

impl DocumentRegistry {
    pub fn new(writer: PersistenceWriter, eviction_grace: Duration) -> Self {
        Self {
            slots: KeyedSlots::new(),
            writer,
            eviction_grace,
            next_connection: AtomicU64::new(1),
            next_eviction: AtomicU64::new(1),
        }
    }

    pub fn writer(&self) -> &PersistenceWriter {
        &self.writer
    }

    /// Resident document of a locked slot, loading it first if needed.
    async fn resident(
        &self,
        guard: &mut SlotGuard<DocumentId, Arc<Document>>,
    ) -> Result<Arc<Document>, ReplicaError> {
        if let Some(document) = guard.get() {
            return Ok(document.clone());
        }
        let replica = Arc::new(self.writer.load(guard.key()).await?);
        let flush = self.writer.attach(replica.clone());
        let document = Arc::new(Document::new(replica, flush));
        guard.insert(document.clone());
        info!("Replica of {} is now resident", guard.key());
        Ok(document)
    }

    /// Open a connection, creating the replica on first use.
    pub async fn connect(
        &self,
        id: &DocumentId,
        permission: Permission,
    ) -> Result<SyncSession, ReplicaError> {
        let mut guard = self.slots.lock(id).await;
        let document = self.resident(&mut guard).await?;

        let connection = ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed));
        {
            let mut residency = document.residency.lock();
            if residency.cancel_eviction() {
                debug!("Cancelled eviction of {}", id);
            }
            residency.connections.insert(connection);
        }
        debug!("{} connected to {} with {:?}", connection, id, permission);
        Ok(SyncSession::new(connection, document, permission))
    }

    /// Close a connection.
    ///
    /// Its presence entries are removed. When it was the last connection the
    /// replica is flushed right away and, unless a kernel pins it, evicted
    /// after the grace window.
    pub async fn disconnect(self: &Arc<Self>, session: SyncSession) {
        let (connection, document, presence_clients) = session.into_parts();
        let id = document.id().clone();
        drop(document);

        let Some(guard) = self.slots.lock_existing(&id).await else {
            return;
        };
        let Some(document) = guard.get().cloned() else {
            return;
        };

        document.remove_presence(&presence_clients);
        let last = {
            let mut residency = document.residency.lock();
            residency.connections.remove(&connection);
            residency.connections.is_empty()
        };
        debug!("{} disconnected from {}", connection, id);
        if !last {
            return;
        }

        if let Err(e) = document.flush.flush_now().await {
            error!("Flush of {} after last disconnect failed: {}", id, e);
        }

        let generation = self.next_eviction.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        {
            let mut residency = document.residency.lock();
            if !residency.is_idle() {
                return;
            }
            residency.cancel_eviction();
            residency.eviction = Some(PendingEviction {
                generation,
                cancel: cancel.clone(),
            });
        }
        drop(guard);

        let registry = Arc::clone(self);
        let grace = self.eviction_grace;
        debug!("Eviction of {} scheduled in {:?}", id, grace);
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(grace) => registry.evict(&id, generation).await,
            }
        });
    }

    /// Destroy a replica whose eviction timer fired, unless it was revived.
    async fn evict(&self, id: &DocumentId, generation: u64) {
        let Some(mut guard) = self.slots.lock_existing(id).await else {
            return;
        };
        let Some(document) = guard.get().cloned() else {
            return;
        };
        {
            let mut residency = document.residency.lock();
            let current = residency
                .eviction
                .as_ref()
                .is_some_and(|pending| pending.generation == generation);
            if !current || !residency.is_idle() {
                return;
            }
            residency.eviction = None;
        }
        guard.take();
        // The slot stays locked until the final flush completes.
        document.destroy().await;
        drop(guard);
    }

    /// Keep a document resident on behalf of a running kernel.
    pub async fn pin(&self, id: &DocumentId, kind: KernelKind) -> Result<Arc<Replica>, ReplicaError> {
        let mut guard = self.slots.lock(id).await;
        let document = self.resident(&mut guard).await?;
        {
            let mut residency = document.residency.lock();
            residency.cancel_eviction();
            residency.pins.insert(kind);
        }
        debug!("{} pinned by {} kernel", id, kind);
        Ok(document.replica.clone())
    }

    /// Release a kernel pin. An unpinned document without connections is
    /// destroyed immediately. Returns `false` when `kind` held no pin.
    pub async fn unpin(&self, id: &DocumentId, kind: KernelKind) -> bool {
        let Some(mut guard) = self.slots.lock_existing(id).await else {
            return false;
        };
        let Some(document) = guard.get().cloned() else {
            return false;
        };
        let idle = {
            let mut residency = document.residency.lock();
            if !residency.pins.remove(&kind) {
                return false;
            }
            let idle = residency.is_idle();
            if idle {
                residency.cancel_eviction();
            }
            idle
        };
        debug!("{} unpinned by {} kernel", id, kind);
        if idle {
            guard.take();
            document.destroy().await;
        }
        true
    }

    /// Replica of a resident document.
    pub async fn replica(&self, id: &DocumentId) -> Option<Arc<Replica>> {
        let guard = self.slots.lock_existing(id).await?;
        guard.get().map(|document| document.replica.clone())
    }

    pub async fn is_resident(&self, id: &DocumentId) -> bool {
        match self.slots.lock_existing(id).await {
            Some(guard) => guard.is_occupied(),
            None => false,
        }
    }

    pub async fn connection_count(&self, id: &DocumentId) -> usize {
        match self.slots.lock_existing(id).await {
            Some(guard) => guard.get().map_or(0, |document| document.connection_count()),
            None => 0,
        }
    }

    /// Flush a resident document now. Returns `false` when it is not resident.
    pub async fn flush_now(&self, id: &DocumentId) -> Result<bool, ReplicaError> {
        let Some(guard) = self.slots.lock_existing(id).await else {
            return Ok(false);
        };
        match guard.get() {
            Some(document) => {
                document.flush.flush_now().await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn resident_documents(&self) -> Vec<DocumentId> {
        self.slots.keys()
    }

    /// Flush and drop every resident document.
    pub async fn shutdown(&self) {
        for id in self.slots.keys() {
            let Some(mut guard) = self.slots.lock_existing(&id).await else {
                continue;
            };
            if let Some(document) = guard.take() {
                document.residency.lock().cancel_eviction();
                document.destroy().await;
            }
        }
        info!("Document registry shut down");
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
