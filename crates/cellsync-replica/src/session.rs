//! Per-connection side of the sync protocol.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use cellsync_protocols::{DocumentId, Permission};

use crate::error::ProtocolError;
use crate::presence::PresenceUpdate;
use crate::protocol::{Frame, SyncMessage};
use crate::registry::Document;
use crate::replica::{ConnectionId, ReplicaUpdate, UpdateOrigin};

/// One client connection bound to one resident document.
///
/// Created by [`DocumentRegistry::connect`](crate::DocumentRegistry::connect)
/// and handed back to `disconnect` when the transport closes.
pub struct SyncSession {
    id: ConnectionId,
    document: Arc<Document>,
    permission: Permission,
    presence_clients: HashSet<u64>,
    updates: broadcast::Receiver<ReplicaUpdate>,
    presence: broadcast::Receiver<PresenceUpdate>,
}

impl SyncSession {
    pub(crate) fn new(id: ConnectionId, document: Arc<Document>, permission: Permission) -> Self {
        let updates = document.replica().subscribe();
        let presence = document.subscribe_presence();
        Self {
            id,
            document,
            permission,
            presence_clients: HashSet::new(),
            updates,
            presence,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn document_id(&self) -> &DocumentId {
        self.document.id()
    }

    pub fn document(&self) -> &Arc<Document> {
        &self.document
    }

    pub fn permission(&self) -> Permission {
        self.permission
    }

    /// Frames sent as soon as the connection opens.
    pub fn opening_frames(&self) -> Vec<Frame> {
        let mut frames = vec![Frame::Sync(SyncMessage::Step1(
            self.document.replica().state_vector(),
        ))];
        if let Some(snapshot) = self.document.presence_snapshot() {
            frames.push(Frame::Presence(snapshot));
        }
        frames
    }

    /// Handle one client frame, returning the replies.
    ///
    /// Only transport-level problems are errors. Updates that fail to apply
    /// and writes without permission are logged and skipped.
    pub fn handle(&mut self, bytes: &[u8]) -> Result<Vec<Frame>, ProtocolError> {
        match Frame::decode(bytes)? {
            Frame::Sync(SyncMessage::Step1(state_vector)) => {
                match self.document.replica().encode_diff(&state_vector) {
                    Ok(diff) => Ok(vec![Frame::Sync(SyncMessage::Step2(diff))]),
                    Err(e) => {
                        warn!("{} on {}: bad state vector: {}", self.id, self.document_id(), e);
                        Ok(Vec::new())
                    }
                }
            }
            Frame::Sync(SyncMessage::Step2(update)) | Frame::Sync(SyncMessage::Update(update)) => {
                if !self.permission.can_write() {
                    debug!(
                        "{} on {}: write skipped, permission is {:?}",
                        self.id,
                        self.document_id(),
                        self.permission
                    );
                    return Ok(Vec::new());
                }
                match self
                    .document
                    .replica()
                    .apply_update(UpdateOrigin::Connection(self.id), &update)
                {
                    Ok(()) => Ok(vec![Frame::SyncDone]),
                    Err(e) => {
                        warn!("{} on {}: update dropped: {}", self.id, self.document_id(), e);
                        Ok(Vec::new())
                    }
                }
            }
            Frame::Presence(payload) => {
                match self.document.apply_presence(self.id, &payload) {
                    Ok(change) => {
                        self.presence_clients.extend(change.added.iter().copied());
                        for client in &change.removed {
                            self.presence_clients.remove(client);
                        }
                    }
                    Err(e) => warn!("{} on {}: presence dropped: {}", self.id, self.document_id(), e),
                }
                Ok(Vec::new())
            }
            Frame::SyncDone => Ok(Vec::new()),
            Frame::Unknown(kind) => {
                debug!("{} on {}: ignoring message kind {}", self.id, self.document_id(), kind);
                Ok(Vec::new())
            }
        }
    }

    /// Next frame to push to the client, or `None` once the document is gone.
    ///
    /// Cancel safe. A session that fell behind the update channel receives the
    /// full document state instead of the updates it missed.
    pub async fn next_outbound(&mut self) -> Option<Frame> {
        loop {
            tokio::select! {
                update = self.updates.recv() => match update {
                    Ok(update) if update.origin == UpdateOrigin::Connection(self.id) => continue,
                    Ok(update) => {
                        return Some(Frame::Sync(SyncMessage::Update(update.update.to_vec())));
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(
                            "{} on {} lagged by {} updates, resending full state",
                            self.id,
                            self.document_id(),
                            missed
                        );
                        return Some(Frame::Sync(SyncMessage::Update(
                            self.document.replica().snapshot(),
                        )));
                    }
                    Err(RecvError::Closed) => return None,
                },
                presence = self.presence.recv() => match presence {
                    Ok(update) if update.origin == Some(self.id) => continue,
                    Ok(update) => return Some(Frame::Presence(update.payload.to_vec())),
                    Err(RecvError::Lagged(_)) => {
                        if let Some(snapshot) = self.document.presence_snapshot() {
                            return Some(Frame::Presence(snapshot));
                        }
                    }
                    Err(RecvError::Closed) => return None,
                },
            }
        }
    }

    pub(crate) fn into_parts(self) -> (ConnectionId, Arc<Document>, HashSet<u64>) {
        (self.id, self.document, self.presence_clients)
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
