//! Kernel transport.
//!
//! Three channels per kernel: command (request/reply), control (interrupts)
//! and broadcast (status and output, subscribe-only). Each channel is driven
//! by its own pump task; decoded messages fan out to subscribers as
//! [`TransportEvent`]s and frames that fail to decode are dropped.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::provisioner::KernelEndpoint;
use crate::socket::{FrameSocket, SocketConnector, SocketKind};
use crate::wire::{KernelMessage, WireCodec};

const EVENT_CAPACITY: usize = 1024;

/// A message received from a kernel.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Reply on the command channel.
    Command(Arc<KernelMessage>),
    /// Message published on the broadcast channel.
    Broadcast {
        topic: String,
        message: Arc<KernelMessage>,
    },
}

/// Handle to a running event handler. Dropping it unsubscribes.
pub struct Subscription {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
            && self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Connection to one kernel.
pub struct KernelTransport {
    codec: WireCodec,
    command_tx: mpsc::UnboundedSender<Vec<Bytes>>,
    control_tx: mpsc::UnboundedSender<Vec<Bytes>>,
    events: broadcast::Sender<TransportEvent>,
    cancel: CancellationToken,
    pumps: Mutex<Vec<JoinHandle<()>>>,
}

impl KernelTransport {
    /// Open all three channels to a kernel endpoint.
    pub async fn connect(
        connector: &dyn SocketConnector,
        endpoint: &KernelEndpoint,
        codec: WireCodec,
    ) -> Result<Self, TransportError> {
        let command = connector
            .connect(SocketKind::Dealer, &endpoint.address(endpoint.ports.shell))
            .await?;
        let control = connector
            .connect(SocketKind::Dealer, &endpoint.address(endpoint.ports.control))
            .await?;
        let broadcast = connector
            .connect(SocketKind::Subscriber, &endpoint.address(endpoint.ports.iopub))
            .await?;
        debug!("Connected kernel transport to {}", endpoint.host);
        Ok(Self::from_sockets(codec, command, control, broadcast))
    }

    /// Drive already connected sockets.
    pub fn from_sockets(
        codec: WireCodec,
        command: Box<dyn FrameSocket>,
        control: Box<dyn FrameSocket>,
        broadcast: Box<dyn FrameSocket>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let cancel = CancellationToken::new();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let pumps = vec![
            tokio::spawn(request_pump(
                "command",
                command,
                command_rx,
                codec.clone(),
                events.clone(),
                cancel.clone(),
                true,
            )),
            tokio::spawn(request_pump(
                "control",
                control,
                control_rx,
                codec.clone(),
                events.clone(),
                cancel.clone(),
                false,
            )),
            tokio::spawn(broadcast_pump(
                broadcast,
                codec.clone(),
                events.clone(),
                cancel.clone(),
            )),
        ];

        Self {
            codec,
            command_tx,
            control_tx,
            events,
            cancel,
            pumps: Mutex::new(pumps),
        }
    }

    pub fn codec(&self) -> &WireCodec {
        &self.codec
    }

    fn send_on(
        &self,
        channel: &mpsc::UnboundedSender<Vec<Bytes>>,
        message: &KernelMessage,
    ) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let frames = self
            .codec
            .encode(message)
            .map_err(|e| TransportError::Socket(e.to_string()))?;
        channel.send(frames).map_err(|_| TransportError::Closed)
    }

    pub fn send_command(&self, message: &KernelMessage) -> Result<(), TransportError> {
        self.send_on(&self.command_tx, message)
    }

    pub fn send_control(&self, message: &KernelMessage) -> Result<(), TransportError> {
        self.send_on(&self.control_tx, message)
    }

    /// Send an execute request whose message id is `request_id`.
    pub fn run_code(&self, code: &str, request_id: &str) -> Result<(), TransportError> {
        self.send_command(&self.codec.execute_request(code, request_id))
    }

    pub fn interrupt(&self) -> Result<(), TransportError> {
        self.send_control(&self.codec.interrupt_request())
    }

    /// Ask the kernel to report its status.
    pub fn kernel_info(&self) -> Result<(), TransportError> {
        self.send_command(&self.codec.kernel_info_request())
    }

    /// Raw event stream of this transport.
    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    /// Run `handler` for every command-channel reply.
    pub fn on_command<F>(&self, handler: F) -> Subscription
    where
        F: Fn(Arc<KernelMessage>) + Send + Sync + 'static,
    {
        self.spawn_handler(move |event| {
            if let TransportEvent::Command(message) = event {
                handler(message);
            }
        })
    }

    /// Run `handler` for every broadcast message with its topic.
    pub fn on_broadcast<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&str, Arc<KernelMessage>) + Send + Sync + 'static,
    {
        self.spawn_handler(move |event| {
            if let TransportEvent::Broadcast { topic, message } = event {
                handler(&topic, message);
            }
        })
    }

    fn spawn_handler<F>(&self, handler: F) -> Subscription
    where
        F: Fn(TransportEvent) + Send + Sync + 'static,
    {
        let mut rx = self.events.subscribe();
        let cancel = self.cancel.child_token();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    event = rx.recv() => match event {
                        Ok(event) => handler(event),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("Kernel event handler lagged, skipped {} messages", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });
        Subscription {
            cancel,
            task: Some(task),
        }
    }

    /// Stop all channels. Pending sends are discarded.
    pub fn close(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        for pump in self.pumps.lock().drain(..) {
            pump.abort();
        }
        debug!("Kernel transport closed");
    }

    /// Whether the transport was closed or lost one of its sockets.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for KernelTransport {
    fn drop(&mut self) {
        self.close();
    }
}

async fn request_pump(
    channel: &'static str,
    mut socket: Box<dyn FrameSocket>,
    mut outgoing: mpsc::UnboundedReceiver<Vec<Bytes>>,
    codec: WireCodec,
    events: broadcast::Sender<TransportEvent>,
    cancel: CancellationToken,
    publish: bool,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frames = outgoing.recv() => {
                let Some(frames) = frames else { break };
                if let Err(e) = socket.send(frames).await {
                    warn!("Kernel {} channel send failed: {}", channel, e);
                    cancel.cancel();
                    break;
                }
            }
            received = socket.recv() => match received {
                Ok(frames) => match codec.decode(&frames) {
                    Ok(message) if publish => {
                        let _ = events.send(TransportEvent::Command(Arc::new(message)));
                    }
                    Ok(message) => {
                        debug!("Kernel {} reply {}", channel, message.msg_type());
                    }
                    Err(e) => warn!("Dropped kernel {} message: {}", channel, e),
                },
                Err(e) => {
                    warn!("Kernel {} channel receive failed: {}", channel, e);
                    cancel.cancel();
                    break;
                }
            },
        }
    }
}

async fn broadcast_pump(
    mut socket: Box<dyn FrameSocket>,
    codec: WireCodec,
    events: broadcast::Sender<TransportEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv() => match received {
                Ok(frames) => match codec.decode(&frames) {
                    Ok(message) => {
                        let topic = message.topic();
                        let _ = events.send(TransportEvent::Broadcast {
                            topic,
                            message: Arc::new(message),
                        });
                    }
                    Err(e) => warn!("Dropped kernel broadcast message: {}", e),
                },
                Err(e) => {
                    warn!("Kernel broadcast channel receive failed: {}", e);
                    cancel.cancel();
                    break;
                }
            },
        }
    }
}

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;
