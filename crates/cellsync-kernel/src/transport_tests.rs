use super::*;

use std::time::Duration;

use serde_json::{Value, json};
use tokio::time::timeout;

use crate::socket::memory::{MemorySocket, pair};

const WAIT: Duration = Duration::from_secs(2);

struct FakeKernel {
    command: MemorySocket,
    control: MemorySocket,
    broadcast: MemorySocket,
    codec: WireCodec,
}

impl FakeKernel {
    async fn receive_command(&mut self) -> KernelMessage {
        let frames = timeout(WAIT, self.command.recv()).await.unwrap().unwrap();
        self.codec.decode(&frames).unwrap()
    }

    async fn reply(&mut self, message: &KernelMessage) {
        let frames = self.codec.encode(message).unwrap();
        self.command.send(frames).await.unwrap();
    }

    async fn publish(&mut self, message: &KernelMessage) {
        let frames = self.codec.encode(message).unwrap();
        self.broadcast.send(frames).await.unwrap();
    }
}

fn setup() -> (KernelTransport, FakeKernel) {
    let codec = WireCodec::new("secret");
    let (command, kernel_command) = pair();
    let (control, kernel_control) = pair();
    let (broadcast, kernel_broadcast) = pair();
    let transport = KernelTransport::from_sockets(
        codec.clone(),
        Box::new(command),
        Box::new(control),
        Box::new(broadcast),
    );
    let kernel = FakeKernel {
        command: kernel_command,
        control: kernel_control,
        broadcast: kernel_broadcast,
        codec,
    };
    (transport, kernel)
}

fn answer(codec: &WireCodec, msg_type: &str, parent: &str, content: Value) -> KernelMessage {
    let mut message = codec.request(msg_type, "kernel-msg", content);
    message.parent_header = json!({ "msg_id": parent });
    message
}

#[tokio::test]
async fn test_run_code_sends_execute_request() {
    let (transport, mut kernel) = setup();
    transport.run_code("print(1)", "req-1").unwrap();

    let message = kernel.receive_command().await;
    assert_eq!(message.msg_type(), "execute_request");
    assert_eq!(message.header.msg_id, "req-1");
    assert_eq!(message.content["code"], "print(1)");
}

#[tokio::test]
async fn test_interrupt_uses_control_channel() {
    let (transport, mut kernel) = setup();
    transport.interrupt().unwrap();

    let frames = timeout(WAIT, kernel.control.recv()).await.unwrap().unwrap();
    let message = kernel.codec.decode(&frames).unwrap();
    assert_eq!(message.msg_type(), "interrupt_request");
}

#[tokio::test]
async fn test_kernel_info_uses_command_channel() {
    let (transport, mut kernel) = setup();
    transport.kernel_info().unwrap();
    assert_eq!(kernel.receive_command().await.msg_type(), "kernel_info_request");
}

#[tokio::test]
async fn test_on_command_receives_replies() {
    let (transport, mut kernel) = setup();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = transport.on_command(move |message| {
        let _ = tx.send(message);
    });

    let reply = answer(&kernel.codec, "execute_reply", "req-1", json!({ "execution_count": 3 }));
    kernel.reply(&reply).await;

    let received = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(received.msg_type(), "execute_reply");
    assert_eq!(received.parent_msg_id(), Some("req-1"));
}

#[tokio::test]
async fn test_on_broadcast_receives_topic() {
    let (transport, mut kernel) = setup();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = transport.on_broadcast(move |topic, message| {
        let _ = tx.send((topic.to_string(), message));
    });

    let mut status = answer(&kernel.codec, "status", "req-1", json!({ "execution_state": "busy" }));
    status.identities = vec![Bytes::from_static(b"kernel.abc.status")];
    kernel.publish(&status).await;

    let (topic, message) = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(topic, "kernel.abc.status");
    assert_eq!(message.content["execution_state"], "busy");
}

#[tokio::test]
async fn test_forged_broadcast_is_dropped() {
    let (transport, mut kernel) = setup();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = transport.on_broadcast(move |_, message| {
        let _ = tx.send(message);
    });

    let forged = answer(&kernel.codec, "stream", "req-1", json!({ "name": "stdout", "text": "forged" }));
    let mut frames = kernel.codec.encode(&forged).unwrap();
    frames[1] = Bytes::from("0".repeat(64));
    kernel.broadcast.send(frames).await.unwrap();

    let genuine = answer(&kernel.codec, "stream", "req-1", json!({ "name": "stdout", "text": "genuine" }));
    kernel.publish(&genuine).await;

    let received = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(received.content["text"], "genuine");
    assert!(!transport.is_closed());
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let (transport, mut kernel) = setup();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = transport.on_command(move |message| {
        let _ = tx.send(message);
    });
    assert!(subscription.is_active());
    subscription.unsubscribe();

    let reply = answer(&kernel.codec, "execute_reply", "req-1", json!({}));
    kernel.reply(&reply).await;

    assert!(matches!(timeout(WAIT, rx.recv()).await, Ok(None)));
}

#[tokio::test]
async fn test_send_after_close_fails() {
    let (transport, _kernel) = setup();
    transport.close();
    assert!(transport.is_closed());
    assert!(matches!(
        transport.run_code("1", "req-1"),
        Err(TransportError::Closed)
    ));
    assert!(matches!(transport.interrupt(), Err(TransportError::Closed)));
}

#[tokio::test]
async fn test_lost_socket_closes_transport() {
    let (transport, kernel) = setup();
    drop(kernel);
    timeout(WAIT, async {
        while !transport.is_closed() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}
