//! Kernel orchestrator.
//!
//! Owns at most one kernel per (document, kind). Start and stop of one key are
//! serialized by its slot; different keys proceed independently. A running
//! kernel pins its document so the replica its bridge writes to stays resident.

use std::sync::Arc;

use cellsync_config::Config;
use cellsync_protocols::{
    DocumentId, ExecutionResult, KernelKey, KernelKind, KernelRecord, KernelRuntime, KeyedSlots,
    MetadataStore, RuntimeStatus, SlotGuard, UserId,
};
use cellsync_replica::{DocumentRegistry, Replica};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bridge::Bridge;
use crate::error::{KernelError, TransportError};
use crate::provisioner::Provisioner;
use crate::socket::SocketConnector;
use crate::transport::{KernelTransport, Subscription};
use crate::wire::WireCodec;

/// Code executed once after a kernel comes up.
const WARMUP_CODE: &str = "3+4";

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub max_lifetime: Duration,
    /// Reject every mutating operation.
    pub read_only: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_lifetime: Duration::hours(1),
            read_only: false,
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_lifetime: Duration::milliseconds(
                i64::try_from(config.kernels.max_lifetime_ms).unwrap_or(i64::MAX),
            ),
            read_only: config.read_only,
        }
    }
}

/// Public view of a running kernel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KernelDescriptor {
    pub document: DocumentId,
    pub kind: KernelKind,
    pub owner: UserId,
    pub created_at: DateTime<Utc>,
    pub recycle_deadline: DateTime<Utc>,
    pub host: String,
}

impl KernelDescriptor {
    pub fn key(&self) -> KernelKey {
        KernelKey::new(self.document.clone(), self.kind)
    }
}

struct KernelHandle {
    descriptor: KernelDescriptor,
    transport: KernelTransport,
    replica: Arc<Replica>,
    _subscriptions: Vec<Subscription>,
}

impl KernelHandle {
    fn close(self) {
        self.transport.close();
    }
}

/// A start in progress, holding the kernel slot.
///
/// Dropped without `finish` or `abort` (the caller went away mid-start), it
/// clears the `starting` status and releases the pin from a background task
/// that keeps the slot locked until the rollback is done.
struct PendingStart {
    slot: Option<SlotGuard<KernelKey, KernelHandle>>,
    key: KernelKey,
    replica: Arc<Replica>,
    registry: Arc<DocumentRegistry>,
}

impl PendingStart {
    fn finish(mut self, handle: KernelHandle) {
        if let Some(mut slot) = self.slot.take() {
            slot.insert(handle);
        }
    }

    async fn abort(mut self) {
        if let Some(slot) = self.slot.take() {
            rollback_start(&self.registry, &self.replica, &self.key).await;
            drop(slot);
        }
    }
}

impl Drop for PendingStart {
    fn drop(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        warn!("Start of kernel {} was cancelled, rolling back", self.key);
        let key = self.key.clone();
        let replica = self.replica.clone();
        let registry = self.registry.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    rollback_start(&registry, &replica, &key).await;
                    drop(slot);
                });
            }
            Err(_) => {
                replica.clear_runtime(key.kind);
            }
        }
    }
}

async fn rollback_start(registry: &DocumentRegistry, replica: &Replica, key: &KernelKey) {
    replica.clear_runtime(key.kind);
    registry.unpin(&key.document, key.kind).await;
}

pub struct KernelOrchestrator {
    kernels: KeyedSlots<KernelKey, KernelHandle>,
    registry: Arc<DocumentRegistry>,
    provisioner: Arc<dyn Provisioner>,
    connector: Arc<dyn SocketConnector>,
    store: Arc<dyn MetadataStore>,
    codec: WireCodec,
    settings: OrchestratorSettings,
    cancel: CancellationToken,
}

impl KernelOrchestrator {
    pub fn new(
        registry: Arc<DocumentRegistry>,
        provisioner: Arc<dyn Provisioner>,
        connector: Arc<dyn SocketConnector>,
        store: Arc<dyn MetadataStore>,
        codec: WireCodec,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            kernels: KeyedSlots::new(),
            registry,
            provisioner,
            connector,
            store,
            codec,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    fn ensure_writable(&self) -> Result<(), KernelError> {
        if self.settings.read_only {
            Err(KernelError::ReadOnly)
        } else {
            Ok(())
        }
    }

    /// Start a kernel. Returns `false` when one is already running for the key.
    ///
    /// On failure nothing is recorded and the runtime status is cleared. A
    /// readiness failure leaves the infrastructure for a retry or an explicit
    /// stop; a failure once the kernel is reachable tears it down. Dropping
    /// the returned future mid-start rolls back the same way.
    pub async fn start(&self, key: &KernelKey, owner: &UserId) -> Result<bool, KernelError> {
        self.ensure_writable()?;
        let guard = self.kernels.lock(key).await;
        if guard.is_occupied() {
            debug!("Kernel {} already running", key);
            return Ok(false);
        }

        let replica = self.registry.pin(&key.document, key.kind).await?;
        let pending = PendingStart {
            slot: Some(guard),
            key: key.clone(),
            replica: replica.clone(),
            registry: self.registry.clone(),
        };
        replica.set_runtime(key.kind, &KernelRuntime::with_status(RuntimeStatus::Starting));
        info!("Starting kernel {} for {}", key, owner);

        match self.launch(key, owner, &replica).await {
            Ok(handle) => {
                pending.finish(handle);
                info!("Kernel {} is running", key);
                Ok(true)
            }
            Err(e) => {
                error!("Failed to start kernel {}: {}", key, e);
                pending.abort().await;
                Err(e)
            }
        }
    }

    async fn launch(
        &self,
        key: &KernelKey,
        owner: &UserId,
        replica: &Arc<Replica>,
    ) -> Result<KernelHandle, KernelError> {
        let endpoint = self.provisioner.ensure(key, owner).await?;
        self.provisioner.wait_ready(&endpoint, &self.cancel).await?;

        let transport =
            KernelTransport::connect(self.connector.as_ref(), &endpoint, self.codec.clone())
                .await?;
        let bridge = Arc::new(Bridge::new(key.clone(), replica.clone()));
        let subscriptions = bridge.attach(&transport);

        match self.warm_up(key, owner, replica, &transport).await {
            Ok(record) => Ok(KernelHandle {
                descriptor: KernelDescriptor {
                    document: record.document,
                    kind: record.kind,
                    owner: record.owner,
                    created_at: record.created_at,
                    recycle_deadline: record.recycle_deadline,
                    host: endpoint.host,
                },
                transport,
                replica: replica.clone(),
                _subscriptions: subscriptions,
            }),
            Err(e) => {
                transport.close();
                drop(subscriptions);
                if let Err(teardown) = self.provisioner.teardown(key).await {
                    warn!("Teardown of unstarted kernel {} failed: {}", key, teardown);
                }
                if let Err(delete) = self.store.delete_kernel(key).await {
                    warn!("Failed to drop record of unstarted kernel {}: {}", key, delete);
                }
                Err(e)
            }
        }
    }

    /// Probe a freshly connected kernel, send the warm-up, then record it.
    async fn warm_up(
        &self,
        key: &KernelKey,
        owner: &UserId,
        replica: &Replica,
        transport: &KernelTransport,
    ) -> Result<KernelRecord, KernelError> {
        replica.update_runtime(key.kind, |runtime| runtime.status = RuntimeStatus::Refreshing);
        transport.kernel_info()?;
        let warmup_id = uuid::Uuid::new_v4().to_string();
        transport.run_code(WARMUP_CODE, &warmup_id)?;

        let record = KernelRecord::new(key, owner.clone(), Utc::now(), self.settings.max_lifetime);
        self.store.put_kernel(&record).await?;
        Ok(record)
    }

    /// Stop a kernel and delete its infrastructure.
    ///
    /// Returns `false` when no kernel is known for the key. A kernel that is
    /// only recorded in the store (after a restart) is torn down too. A pin
    /// or status left behind by an interrupted start is released either way.
    pub async fn stop(&self, key: &KernelKey) -> Result<bool, KernelError> {
        self.ensure_writable()?;
        let mut guard = self.kernels.lock(key).await;

        let Some(handle) = guard.take() else {
            self.release_leftovers(key).await;
            if self.store.get_kernel(key).await?.is_none() {
                return Ok(false);
            }
            self.provisioner.teardown(key).await?;
            self.store.delete_kernel(key).await?;
            info!("Stopped orphaned kernel {}", key);
            return Ok(true);
        };

        let replica = handle.replica.clone();
        handle.close();
        replica.clear_runtime(key.kind);

        let removed = match self.provisioner.teardown(key).await {
            Ok(()) => self.store.delete_kernel(key).await.map_err(KernelError::from),
            Err(e) => {
                warn!("Teardown of {} failed, leaving it to the recycler: {}", key, e);
                Err(e)
            }
        };
        self.registry.unpin(&key.document, key.kind).await;
        removed?;

        info!("Stopped kernel {}", key);
        Ok(true)
    }

    /// Clear the runtime entry and pin of a key with no resident kernel.
    async fn release_leftovers(&self, key: &KernelKey) {
        if let Some(replica) = self.registry.replica(&key.document).await {
            if replica.clear_runtime(key.kind) {
                debug!("Cleared stale runtime status of {}", key);
            }
        }
        if self.registry.unpin(&key.document, key.kind).await {
            info!("Released stale pin of {}", key);
        }
    }

    /// Ask a kernel for its status. The answer arrives as a broadcast.
    pub async fn status(&self, key: &KernelKey) -> Result<bool, KernelError> {
        let guard = self.kernels.lock_existing(key).await;
        let handle = guard.as_ref().and_then(|guard| guard.get());
        match handle {
            Some(handle) if !handle.transport.is_closed() => {
                handle
                    .replica
                    .update_runtime(key.kind, |runtime| runtime.status = RuntimeStatus::Refreshing);
                match handle.transport.kernel_info() {
                    Ok(()) => Ok(true),
                    Err(TransportError::Closed) => {
                        handle.replica.clear_runtime(key.kind);
                        Ok(false)
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Some(handle) => {
                handle.replica.clear_runtime(key.kind);
                Ok(false)
            }
            None => {
                if let Some(replica) = self.registry.replica(&key.document).await {
                    replica.clear_runtime(key.kind);
                }
                Ok(false)
            }
        }
    }

    /// Signal a kernel to interrupt its current execution.
    pub async fn interrupt(&self, key: &KernelKey) -> Result<bool, KernelError> {
        let Some(guard) = self.kernels.lock_existing(key).await else {
            return Ok(false);
        };
        let Some(handle) = guard.get() else {
            return Ok(false);
        };
        match handle.transport.interrupt() {
            Ok(()) => {
                debug!("Interrupted kernel {}", key);
                Ok(true)
            }
            Err(TransportError::Closed) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Write the kernel's current resource usage into the runtime status.
    pub async fn usage_status(&self, key: &KernelKey) -> Result<bool, KernelError> {
        let Some(guard) = self.kernels.lock_existing(key).await else {
            return Ok(false);
        };
        let Some(handle) = guard.get() else {
            return Ok(false);
        };
        let Some(usage) = self.provisioner.usage(key).await? else {
            debug!("No usage metrics for {}", key);
            return Ok(false);
        };
        handle.replica.update_runtime(key.kind, |runtime| {
            runtime.cpu = Some(usage.cpu);
            runtime.memory = Some(usage.memory);
        });
        Ok(true)
    }

    /// Run code on a kernel, resetting the result entry of `request_id`.
    pub async fn execute(
        &self,
        key: &KernelKey,
        code: &str,
        request_id: &str,
    ) -> Result<bool, KernelError> {
        self.ensure_writable()?;
        let Some(guard) = self.kernels.lock_existing(key).await else {
            return Ok(false);
        };
        let Some(handle) = guard.get() else {
            return Ok(false);
        };
        handle.replica.set_result(request_id, &ExecutionResult::started());
        match handle.transport.run_code(code, request_id) {
            Ok(()) => Ok(true),
            Err(e) => {
                handle.replica.update_result(request_id, |result| {
                    result.finish(Utc::now().timestamp_millis(), None);
                });
                match e {
                    TransportError::Closed => Ok(false),
                    e => Err(e.into()),
                }
            }
        }
    }

    /// Remove an execution result from a resident document.
    pub async fn clear_result(
        &self,
        document: &DocumentId,
        request_id: &str,
    ) -> Result<bool, KernelError> {
        self.ensure_writable()?;
        match self.registry.replica(document).await {
            Some(replica) => Ok(replica.clear_result(request_id)),
            None => Ok(false),
        }
    }

    pub async fn is_running(&self, key: &KernelKey) -> bool {
        match self.kernels.lock_existing(key).await {
            Some(guard) => guard.is_occupied(),
            None => false,
        }
    }

    /// Descriptors of every running kernel, ordered by key.
    pub async fn descriptors(&self) -> Vec<KernelDescriptor> {
        let mut keys = self.kernels.keys();
        keys.sort();
        let mut descriptors = Vec::with_capacity(keys.len());
        for key in keys {
            // Busy slots are skipped; a start in progress is not running yet.
            if let Some(guard) = self.kernels.try_lock_existing(&key) {
                if let Some(handle) = guard.get() {
                    descriptors.push(handle.descriptor.clone());
                }
            }
        }
        descriptors
    }

    /// Remove an expired kernel found by a recycler sweep.
    ///
    /// A record that no longer matches the store (the kernel was restarted
    /// since the sweep read it) is skipped.
    pub async fn recycle(&self, record: &KernelRecord) -> Result<bool, KernelError> {
        let key = record.key();
        let mut guard = self.kernels.lock(&key).await;
        match self.store.get_kernel(&key).await? {
            Some(current) if current.created_at == record.created_at => {}
            _ => {
                debug!("Skipping recycle of {}, record changed", key);
                return Ok(false);
            }
        }

        self.provisioner.teardown(&key).await?;
        if let Some(handle) = guard.take() {
            let replica = handle.replica.clone();
            handle.close();
            replica.clear_runtime(key.kind);
            self.registry.unpin(&key.document, key.kind).await;
        }
        self.store.delete_kernel(&key).await?;
        drop(guard);

        info!("Recycled kernel {} created at {}", key, record.created_at);
        Ok(true)
    }

    /// Cancel pending provisioning and close every kernel connection.
    ///
    /// Kernels keep running; their records let a later process stop or
    /// recycle them.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        for key in self.kernels.keys() {
            if let Some(mut guard) = self.kernels.lock_existing(&key).await {
                if let Some(handle) = guard.take() {
                    handle.close();
                }
            }
        }
        info!("Kernel orchestrator shut down");
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
