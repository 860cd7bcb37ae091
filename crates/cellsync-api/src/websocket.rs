//! Sync WebSocket handler.
//!
//! Each connection speaks the binary sync protocol for one document. The
//! token is checked before the upgrade; a connection without read access
//! never reaches the registry.

use std::fmt::Display;
use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use cellsync_protocols::{DocumentId, Permission};
use cellsync_replica::{Frame, SyncSession};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::auth::{TokenQuery, access_token, authorize};
use crate::error::ApiError;
use crate::state::AppState;

/// Outbound frames buffered per connection before the reader is throttled.
const OUTBOUND_BUFFER: usize = 100;

/// WebSocket upgrade handler.
///
/// GET /sync/{document_id}?token=
pub async fn sync_handler(
    State(state): State<Arc<AppState>>,
    Path(document): Path<String>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    let document = DocumentId::parse(document)?;
    let token = access_token(&query, &headers);
    let permission = authorize(&state, &document, token.as_deref(), Permission::Read).await?;
    let ws = ws.map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, document, permission)))
}

async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    document: DocumentId,
    permission: Permission,
) {
    let mut session = match state.registry.connect(&document, permission).await {
        Ok(session) => session,
        Err(e) => {
            error!("Failed to open {}: {}", document, e);
            return;
        }
    };
    state.connection_opened();
    info!(
        "Sync connection {} opened on {} ({:?})",
        session.id(),
        document,
        permission
    );

    let (sender, receiver) = socket.split();
    serve_connection(sender, receiver, &mut session).await;

    info!("Sync connection {} closed on {}", session.id(), document);
    state.registry.disconnect(session).await;
    state.connection_closed();
}

/// Run the sync protocol of one connection until either side goes away.
///
/// Client frames are answered in order. A malformed frame closes the
/// connection; everything already queued is still delivered first.
pub async fn serve_connection<S, R, E>(sender: S, mut receiver: R, session: &mut SyncSession)
where
    S: Sink<Message> + Unpin + Send + 'static,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let (tx, rx) = mpsc::channel::<Frame>(OUTBOUND_BUFFER);
    let sender_task = tokio::spawn(send_frames(sender, rx));

    for frame in session.opening_frames() {
        if tx.send(frame).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Binary(data))) => match session.handle(&data) {
                    Ok(replies) => {
                        for reply in replies {
                            if tx.send(reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Closing {} on {}: {}", session.id(), session.document_id(), e);
                        break;
                    }
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(Message::Text(_))) => {
                    debug!("{} sent a text frame, ignoring", session.id());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket error on {}: {}", session.id(), e);
                    break;
                }
            },
            outbound = session.next_outbound() => match outbound {
                Some(frame) => {
                    if tx.send(frame).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
        if sender_task.is_finished() {
            break;
        }
    }

    drop(tx);
    if let Err(e) = sender_task.await {
        debug!("Sender task of {} ended abnormally: {}", session.id(), e);
    }
}

async fn send_frames<S>(mut sender: S, mut rx: mpsc::Receiver<Frame>)
where
    S: Sink<Message> + Unpin,
{
    while let Some(frame) = rx.recv().await {
        if sender.send(Message::Binary(frame.encode().into())).await.is_err() {
            return;
        }
    }
    let _ = sender.close().await;
}

#[cfg(test)]
#[path = "websocket_tests.rs"]
mod tests;
