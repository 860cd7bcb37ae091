//! One replicated document and its ordered update fan-out.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use yrs::types::ToJson;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{
    Doc, Map, MapRef, ReadTxn, StateVector, TextPrelim, Transact, Transaction, TransactionMut,
    Update,
};

use cellsync_protocols::{DocumentId, ExecutionResult, KernelKind, KernelRuntime};

use crate::any::{any_to_json, json_to_any};
use crate::error::ReplicaError;

/// Root map names shared with every client.
pub const NODES: &str = "nodes";
pub const CODE: &str = "code";
pub const RICH_TEXT: &str = "richText";
pub const RESULTS: &str = "results";
pub const RUNTIME: &str = "runtime";

/// Capacity of the per-replica update channel. Slower receivers lag.
const UPDATE_CHANNEL_CAPACITY: usize = 1024;

/// A v1 update carrying no changes.
const EMPTY_UPDATE: &[u8] = &[0, 0];

/// Identifier of one client connection, unique per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Who produced an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOrigin {
    Connection(ConnectionId),
    /// Server-side writers such as the kernel bridge.
    Local,
}

/// An update applied to a replica, in application order.
#[derive(Debug, Clone)]
pub struct ReplicaUpdate {
    pub origin: UpdateOrigin,
    pub update: Arc<[u8]>,
}

/// The five root structures of a document.
pub struct Collections {
    pub nodes: MapRef,
    pub code: MapRef,
    pub rich_text: MapRef,
    pub results: MapRef,
    pub runtime: MapRef,
}

struct Inner {
    doc: Doc,
    collections: Collections,
}

/// An in-memory replicated document.
///
/// Every change, whatever its origin, is applied under one lock and published
/// on the update channel before the lock is released, so subscribers observe
/// updates in exactly the order they were applied.
pub struct Replica {
    document: DocumentId,
    inner: Mutex<Inner>,
    updates: broadcast::Sender<ReplicaUpdate>,
}

impl Replica {
    /// An empty replica.
    pub fn new(document: DocumentId) -> Self {
        let doc = Doc::new();
        let collections = Collections {
            nodes: doc.get_or_insert_map(NODES),
            code: doc.get_or_insert_map(CODE),
            rich_text: doc.get_or_insert_map(RICH_TEXT),
            results: doc.get_or_insert_map(RESULTS),
            runtime: doc.get_or_insert_map(RUNTIME),
        };
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            document,
            inner: Mutex::new(Inner { doc, collections }),
            updates,
        }
    }

    pub fn document(&self) -> &DocumentId {
        &self.document
    }

    /// Subscribe to every update applied from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ReplicaUpdate> {
        self.updates.subscribe()
    }

    /// Encoded state vector, the payload of a sync step 1.
    pub fn state_vector(&self) -> Vec<u8> {
        let inner = self.inner.lock();
        inner.doc.transact().state_vector().encode_v1()
    }

    /// Changes a peer with `state_vector` has not seen yet.
    pub fn encode_diff(&self, state_vector: &[u8]) -> Result<Vec<u8>, ReplicaError> {
        let sv = StateVector::decode_v1(state_vector)
            .map_err(|e| ReplicaError::Decode(e.to_string()))?;
        let inner = self.inner.lock();
        let txn = inner.doc.transact();
        Ok(txn.encode_state_as_update_v1(&sv))
    }

    /// The whole document as a single update.
    pub fn snapshot(&self) -> Vec<u8> {
        let inner = self.inner.lock();
        let txn = inner.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    /// Apply an encoded update and publish it to subscribers.
    pub fn apply_update(&self, origin: UpdateOrigin, update: &[u8]) -> Result<(), ReplicaError> {
        let decoded = Update::decode_v1(update).map_err(|e| ReplicaError::Decode(e.to_string()))?;
        let inner = self.inner.lock();
        {
            let mut txn = inner.doc.transact_mut();
            txn.apply_update(decoded)
                .map_err(|e| ReplicaError::Apply(e.to_string()))?;
        }
        if update != EMPTY_UPDATE {
            self.publish(origin, Arc::from(update));
        }
        Ok(())
    }

    /// Merge a stored snapshot without publishing it.
    pub(crate) fn load_snapshot(&self, snapshot: &[u8]) -> Result<(), ReplicaError> {
        let decoded =
            Update::decode_v1(snapshot).map_err(|e| ReplicaError::Decode(e.to_string()))?;
        let inner = self.inner.lock();
        let mut txn = inner.doc.transact_mut();
        txn.apply_update(decoded)
            .map_err(|e| ReplicaError::Apply(e.to_string()))
    }

    /// Run a server-side change in one transaction and publish its update.
    pub fn mutate<R>(&self, f: impl FnOnce(&mut TransactionMut<'_>, &Collections) -> R) -> R {
        let inner = self.inner.lock();
        let (result, update) = {
            let mut txn = inner.doc.transact_mut();
            let result = f(&mut txn, &inner.collections);
            (result, txn.encode_update_v1())
        };
        if update != EMPTY_UPDATE {
            self.publish(UpdateOrigin::Local, update.into());
        }
        result
    }

    pub fn read<R>(&self, f: impl FnOnce(&Transaction<'_>, &Collections) -> R) -> R {
        let inner = self.inner.lock();
        let txn = inner.doc.transact();
        f(&txn, &inner.collections)
    }

    fn publish(&self, origin: UpdateOrigin, update: Arc<[u8]>) {
        // No receivers is fine: nobody is connected and persistence is detached.
        let _ = self.updates.send(ReplicaUpdate { origin, update });
    }

    /// Populate a document that has never been stored.
    pub(crate) fn seed_default(&self) {
        self.mutate(|txn, c| {
            c.nodes.insert(
                txn,
                "ROOT",
                json_to_any(&json!({ "id": "ROOT", "type": "ROOT", "children": ["welcome"] })),
            );
            c.nodes.insert(
                txn,
                "welcome",
                json_to_any(&json!({
                    "id": "welcome",
                    "type": "CODE",
                    "parent": "ROOT",
                    "lang": "python",
                    "position": { "x": 0, "y": 0 }
                })),
            );
            c.code
                .insert(txn, "welcome", TextPrelim::new("print(\"Hello, world!\")"));
        });
        debug!("Seeded default content for {}", self.document);
    }

    /// JSON view of the whole document.
    pub fn to_json(&self) -> Value {
        self.read(|txn, c| {
            json!({
                NODES: any_to_json(&c.nodes.to_json(txn)),
                CODE: any_to_json(&c.code.to_json(txn)),
                RICH_TEXT: any_to_json(&c.rich_text.to_json(txn)),
                RESULTS: any_to_json(&c.results.to_json(txn)),
                RUNTIME: any_to_json(&c.runtime.to_json(txn)),
            })
        })
    }

    pub fn runtime(&self, kind: KernelKind) -> Option<KernelRuntime> {
        self.read(|txn, c| read_entry(&c.runtime, txn, kind.as_str()))
    }

    pub fn set_runtime(&self, kind: KernelKind, runtime: &KernelRuntime) {
        self.mutate(|txn, c| write_entry(&c.runtime, txn, kind.as_str(), runtime));
    }

    /// Read-modify-write of a runtime entry, starting from the default.
    pub fn update_runtime(&self, kind: KernelKind, f: impl FnOnce(&mut KernelRuntime)) {
        self.mutate(|txn, c| {
            let mut runtime: KernelRuntime =
                read_entry(&c.runtime, &*txn, kind.as_str()).unwrap_or_default();
            f(&mut runtime);
            write_entry(&c.runtime, txn, kind.as_str(), &runtime);
        });
    }

    /// Remove a runtime entry. Returns whether one existed.
    pub fn clear_runtime(&self, kind: KernelKind) -> bool {
        self.mutate(|txn, c| c.runtime.remove(txn, kind.as_str()).is_some())
    }

    pub fn result(&self, request_id: &str) -> Option<ExecutionResult> {
        self.read(|txn, c| read_entry(&c.results, txn, request_id))
    }

    pub fn set_result(&self, request_id: &str, result: &ExecutionResult) {
        self.mutate(|txn, c| write_entry(&c.results, txn, request_id, result));
    }

    /// Read-modify-write of a result entry, starting from the default.
    pub fn update_result(&self, request_id: &str, f: impl FnOnce(&mut ExecutionResult)) {
        self.mutate(|txn, c| {
            let mut result: ExecutionResult =
                read_entry(&c.results, &*txn, request_id).unwrap_or_default();
            f(&mut result);
            write_entry(&c.results, txn, request_id, &result);
        });
    }

    /// Remove a result entry. Returns whether one existed.
    pub fn clear_result(&self, request_id: &str) -> bool {
        self.mutate(|txn, c| c.results.remove(txn, request_id).is_some())
    }
}

fn read_entry<T: DeserializeOwned>(map: &MapRef, txn: &impl ReadTxn, key: &str) -> Option<T> {
    let entry = any_to_json(&map.get(txn, key)?.to_json(txn));
    match serde_json::from_value(entry) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring malformed entry {}: {}", key, e);
            None
        }
    }
}

fn write_entry<T: Serialize>(map: &MapRef, txn: &mut TransactionMut<'_>, key: &str, value: &T) {
    match serde_json::to_value(value) {
        Ok(json) => {
            map.insert(txn, key, json_to_any(&json));
        }
        Err(e) => warn!("Failed to serialize entry {}: {}", key, e),
    }
}

#[cfg(test)]
#[path = "replica_tests.rs"]
mod tests;
