//! Multipart frame sockets.

use async_trait::async_trait;
use bytes::Bytes;
use zeromq::{DealerSocket, Socket, SocketRecv, SocketSend, SubSocket, ZmqMessage};

use crate::error::TransportError;

/// What a socket is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    /// Request/reply socket (command and control channels).
    Dealer,
    /// Subscribe-only socket receiving every topic (broadcast channel).
    Subscriber,
}

/// A connected socket exchanging multipart messages.
#[async_trait]
pub trait FrameSocket: Send {
    async fn send(&mut self, frames: Vec<Bytes>) -> Result<(), TransportError>;

    async fn recv(&mut self) -> Result<Vec<Bytes>, TransportError>;
}

/// Opens frame sockets to kernel endpoints.
#[async_trait]
pub trait SocketConnector: Send + Sync {
    async fn connect(
        &self,
        kind: SocketKind,
        address: &str,
    ) -> Result<Box<dyn FrameSocket>, TransportError>;
}

/// ZeroMQ sockets over TCP.
#[derive(Debug, Default, Clone)]
pub struct ZmqConnector;

#[async_trait]
impl SocketConnector for ZmqConnector {
    async fn connect(
        &self,
        kind: SocketKind,
        address: &str,
    ) -> Result<Box<dyn FrameSocket>, TransportError> {
        let connect_error = |e: zeromq::ZmqError| TransportError::Connect {
            address: address.to_string(),
            message: e.to_string(),
        };
        match kind {
            SocketKind::Dealer => {
                let mut socket = DealerSocket::new();
                socket.connect(address).await.map_err(connect_error)?;
                Ok(Box::new(ZmqDealer(socket)))
            }
            SocketKind::Subscriber => {
                let mut socket = SubSocket::new();
                socket.connect(address).await.map_err(connect_error)?;
                socket.subscribe("").await.map_err(connect_error)?;
                Ok(Box::new(ZmqSubscriber(socket)))
            }
        }
    }
}

fn into_message(frames: Vec<Bytes>) -> Result<ZmqMessage, TransportError> {
    ZmqMessage::try_from(frames).map_err(|e| TransportError::Socket(e.to_string()))
}

struct ZmqDealer(DealerSocket);

#[async_trait]
impl FrameSocket for ZmqDealer {
    async fn send(&mut self, frames: Vec<Bytes>) -> Result<(), TransportError> {
        let message = into_message(frames)?;
        self.0
            .send(message)
            .await
            .map_err(|e| TransportError::Socket(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Vec<Bytes>, TransportError> {
        let message = self
            .0
            .recv()
            .await
            .map_err(|e| TransportError::Socket(e.to_string()))?;
        Ok(message.into_vec())
    }
}

struct ZmqSubscriber(SubSocket);

#[async_trait]
impl FrameSocket for ZmqSubscriber {
    async fn send(&mut self, _frames: Vec<Bytes>) -> Result<(), TransportError> {
        Err(TransportError::Socket(
            "broadcast channel is subscribe-only".to_string(),
        ))
    }

    async fn recv(&mut self) -> Result<Vec<Bytes>, TransportError> {
        let message = self
            .0
            .recv()
            .await
            .map_err(|e| TransportError::Socket(e.to_string()))?;
        Ok(message.into_vec())
    }
}

/// In-process sockets for driving a transport without a kernel.
pub mod memory {
    use super::*;
    use tokio::sync::mpsc;

    /// One end of an in-process socket pair.
    pub struct MemorySocket {
        tx: mpsc::UnboundedSender<Vec<Bytes>>,
        rx: mpsc::UnboundedReceiver<Vec<Bytes>>,
    }

    /// Two connected sockets: frames sent on one are received on the other.
    pub fn pair() -> (MemorySocket, MemorySocket) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            MemorySocket { tx: a_tx, rx: a_rx },
            MemorySocket { tx: b_tx, rx: b_rx },
        )
    }

    #[async_trait]
    impl FrameSocket for MemorySocket {
        async fn send(&mut self, frames: Vec<Bytes>) -> Result<(), TransportError> {
            self.tx.send(frames).map_err(|_| TransportError::Closed)
        }

        async fn recv(&mut self) -> Result<Vec<Bytes>, TransportError> {
            self.rx.recv().await.ok_or(TransportError::Closed)
        }
    }

    /// Peer end of a socket opened through [`MemoryConnector`].
    pub struct MemoryPeer {
        pub kind: SocketKind,
        pub address: String,
        pub socket: MemorySocket,
    }

    /// Connector handing the far end of every socket it opens to a channel.
    pub struct MemoryConnector {
        peers: mpsc::UnboundedSender<MemoryPeer>,
    }

    impl MemoryConnector {
        pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
            let (peers, rx) = mpsc::unbounded_channel();
            (Self { peers }, rx)
        }
    }

    #[async_trait]
    impl SocketConnector for MemoryConnector {
        async fn connect(
            &self,
            kind: SocketKind,
            address: &str,
        ) -> Result<Box<dyn FrameSocket>, TransportError> {
            let (local, remote) = pair();
            self.peers
                .send(MemoryPeer {
                    kind,
                    address: address.to_string(),
                    socket: remote,
                })
                .map_err(|_| TransportError::Connect {
                    address: address.to_string(),
                    message: "no listener".to_string(),
                })?;
            Ok(Box::new(local))
        }
    }
}
