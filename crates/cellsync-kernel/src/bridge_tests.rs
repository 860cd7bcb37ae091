use super::*;

use std::time::Duration;

use bytes::Bytes;
use cellsync_protocols::{DocumentId, KernelKind};
use serde_json::json;

use crate::socket::FrameSocket;
use crate::socket::memory::pair;
use crate::wire::WireCodec;

fn replica() -> Arc<Replica> {
    Arc::new(Replica::new(DocumentId::parse("doc").unwrap()))
}

fn bridge(kind: KernelKind, replica: &Arc<Replica>) -> Bridge {
    Bridge::new(
        KernelKey::new(DocumentId::parse("doc").unwrap(), kind),
        replica.clone(),
    )
}

fn message(msg_type: &str, parent: Option<&str>, content: Value) -> KernelMessage {
    let mut message = WireCodec::new("").request(msg_type, "kernel-msg", content);
    if let Some(parent) = parent {
        message.parent_header = json!({ "msg_id": parent });
    }
    message
}

#[test]
fn test_status_updates_runtime() {
    let replica = replica();
    let bridge = bridge(KernelKind::Python, &replica);

    bridge.handle_broadcast(&message("status", None, json!({ "execution_state": "busy" })));
    assert_eq!(
        replica.runtime(KernelKind::Python).unwrap().status,
        RuntimeStatus::Busy
    );

    bridge.handle_broadcast(&message("status", None, json!({ "execution_state": "idle" })));
    assert_eq!(
        replica.runtime(KernelKind::Python).unwrap().status,
        RuntimeStatus::Idle
    );
}

#[test]
fn test_execute_reply_finishes_result() {
    let replica = replica();
    let bridge = bridge(KernelKind::Python, &replica);
    replica.set_result("req-1", &ExecutionResult::started());

    bridge.handle_command(&message(
        "execute_reply",
        Some("req-1"),
        json!({ "status": "ok", "execution_count": 4 }),
    ));

    let result = replica.result("req-1").unwrap();
    assert!(!result.running);
    assert_eq!(result.exec_count, Some(4));
    assert!(result.last_executed_at.is_some());
}

#[test]
fn test_execute_result_keeps_running_for_replying_kernels() {
    let replica = replica();
    let bridge = bridge(KernelKind::Python, &replica);
    replica.set_result("req-1", &ExecutionResult::started());

    bridge.handle_broadcast(&message(
        "execute_result",
        Some("req-1"),
        json!({ "data": { "text/plain": "7" }, "metadata": {}, "execution_count": 1 }),
    ));

    let result = replica.result("req-1").unwrap();
    assert!(result.running);
    assert_eq!(result.outputs.len(), 1);
    assert!(matches!(
        &result.outputs[0],
        OutputFragment::ExecuteResult { data, execution_count: Some(1), .. } if data["text/plain"] == "7"
    ));
}

#[test]
fn test_execute_result_finishes_kernels_without_reply() {
    let replica = replica();
    let bridge = bridge(KernelKind::Javascript, &replica);
    replica.set_result("req-1", &ExecutionResult::started());

    bridge.handle_broadcast(&message(
        "display_data",
        Some("req-1"),
        json!({ "data": { "text/html": "<b>hi</b>" } }),
    ));

    let result = replica.result("req-1").unwrap();
    assert!(!result.running);
    assert!(matches!(&result.outputs[0], OutputFragment::DisplayData { .. }));
}

#[test]
fn test_error_sets_failure() {
    let replica = replica();
    let bridge = bridge(KernelKind::Python, &replica);
    replica.set_result("req-1", &ExecutionResult::started());

    bridge.handle_broadcast(&message(
        "error",
        Some("req-1"),
        json!({ "ename": "ZeroDivisionError", "evalue": "division by zero", "traceback": ["line 1"] }),
    ));

    let failure = replica.result("req-1").unwrap().error.unwrap();
    assert_eq!(failure.name, "ZeroDivisionError");
    assert_eq!(failure.value, "division by zero");
    assert_eq!(failure.stacktrace, vec!["line 1".to_string()]);
}

#[test]
fn test_stream_appends_text_and_clear_output_empties() {
    let replica = replica();
    let bridge = bridge(KernelKind::Python, &replica);
    replica.set_result("req-1", &ExecutionResult::started());

    for text in ["a", "b"] {
        bridge.handle_broadcast(&message(
            "stream",
            Some("req-1"),
            json!({ "name": "stdout", "text": text }),
        ));
    }
    bridge.handle_broadcast(&message(
        "stream",
        Some("req-1"),
        json!({ "name": "stderr", "text": "oops" }),
    ));
    let outputs = replica.result("req-1").unwrap().outputs;
    assert_eq!(
        outputs,
        vec![
            OutputFragment::Stream {
                name: "stdout".to_string(),
                text: "ab".to_string()
            },
            OutputFragment::Stream {
                name: "stderr".to_string(),
                text: "oops".to_string()
            },
        ]
    );

    bridge.handle_broadcast(&message("clear_output", Some("req-1"), json!({ "wait": false })));
    assert!(replica.result("req-1").unwrap().outputs.is_empty());
}

#[test]
fn test_unknown_and_orphan_messages_leave_document_untouched() {
    let replica = replica();
    let bridge = bridge(KernelKind::Python, &replica);
    let before = replica.to_json();

    bridge.handle_broadcast(&message("comm_open", Some("req-1"), json!({})));
    bridge.handle_broadcast(&message("stream", None, json!({ "name": "stdout", "text": "x" })));
    bridge.handle_command(&message("execute_reply", None, json!({ "execution_count": 1 })));

    assert_eq!(replica.to_json(), before);
}

#[tokio::test]
async fn test_attached_bridge_ignores_forged_messages() {
    let codec = WireCodec::new("secret");
    let (command, mut kernel_command) = pair();
    let (control, _kernel_control) = pair();
    let (broadcast, _kernel_broadcast) = pair();
    let transport = KernelTransport::from_sockets(
        codec.clone(),
        Box::new(command),
        Box::new(control),
        Box::new(broadcast),
    );

    let replica = replica();
    replica.set_result("req-1", &ExecutionResult::started());
    let bridge = Arc::new(bridge(KernelKind::Python, &replica));
    let _subscriptions = bridge.attach(&transport);

    let reply = message("execute_reply", Some("req-1"), json!({ "execution_count": 9 }));
    let mut forged = codec.encode(&reply).unwrap();
    forged[1] = Bytes::from("f".repeat(64));
    kernel_command.send(forged).await.unwrap();

    let before = replica.result("req-1").unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(replica.result("req-1").unwrap(), before);
    assert!(before.running);

    kernel_command.send(codec.encode(&reply).unwrap()).await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), async {
        while replica.result("req-1").unwrap().running {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(replica.result("req-1").unwrap().exec_count, Some(9));
}
