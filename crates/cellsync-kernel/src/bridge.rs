//! Bridging of kernel messages into document state.

use std::sync::Arc;

use cellsync_protocols::{
    ExecutionFailure, ExecutionResult, KernelKey, OutputFragment, RuntimeStatus,
};
use cellsync_replica::Replica;
use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::transport::{KernelTransport, Subscription};
use crate::wire::KernelMessage;

/// Translates the messages of one kernel into mutations of its document.
pub struct Bridge {
    key: KernelKey,
    replica: Arc<Replica>,
}

impl Bridge {
    pub fn new(key: KernelKey, replica: Arc<Replica>) -> Self {
        Self { key, replica }
    }

    /// Subscribe to both reply and broadcast events of a transport.
    pub fn attach(self: &Arc<Self>, transport: &KernelTransport) -> Vec<Subscription> {
        let on_command = Arc::clone(self);
        let on_broadcast = Arc::clone(self);
        vec![
            transport.on_command(move |message| on_command.handle_command(&message)),
            transport.on_broadcast(move |_, message| on_broadcast.handle_broadcast(&message)),
        ]
    }

    pub fn handle_command(&self, message: &KernelMessage) {
        match message.msg_type() {
            "execute_reply" => {
                let Some(request_id) = message.parent_msg_id() else {
                    debug!("{} execute_reply without parent", self.key);
                    return;
                };
                let count = execution_count(&message.content);
                self.replica.update_result(request_id, |result| {
                    result.finish(now_millis(), count);
                });
            }
            "kernel_info_reply" | "interrupt_reply" => {
                debug!("{} answered {}", self.key, message.msg_type());
            }
            other => info!("Ignoring {} reply {}", self.key, other),
        }
    }

    pub fn handle_broadcast(&self, message: &KernelMessage) {
        let content = &message.content;
        match message.msg_type() {
            "status" => {
                let state = content
                    .get("execution_state")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let status = RuntimeStatus::from_execution_state(state);
                self.replica
                    .update_runtime(self.key.kind, |runtime| runtime.status = status);
            }
            "execute_result" => {
                let count = execution_count(content);
                self.push_output(
                    message,
                    OutputFragment::ExecuteResult {
                        data: object(content, "data"),
                        metadata: content.get("metadata").cloned().unwrap_or_default(),
                        execution_count: count,
                    },
                    count,
                );
            }
            "display_data" => {
                self.push_output(
                    message,
                    OutputFragment::DisplayData {
                        data: object(content, "data"),
                        metadata: content.get("metadata").cloned().unwrap_or_default(),
                    },
                    None,
                );
            }
            "error" => {
                let failure = ExecutionFailure {
                    name: text(content, "ename"),
                    value: text(content, "evalue"),
                    stacktrace: content
                        .get("traceback")
                        .and_then(Value::as_array)
                        .map(|lines| {
                            lines
                                .iter()
                                .filter_map(Value::as_str)
                                .map(str::to_string)
                                .collect()
                        })
                        .unwrap_or_default(),
                };
                let finishes = !self.key.kind.emits_execute_reply();
                self.update_result(message, |result| {
                    result.error = Some(failure);
                    if finishes {
                        result.finish(now_millis(), None);
                    }
                });
            }
            "stream" => {
                let name = text(content, "name");
                let chunk = text(content, "text");
                self.update_result(message, |result| result.push_stream(&name, &chunk));
            }
            "clear_output" => {
                self.update_result(message, |result| result.outputs.clear());
            }
            "execute_input" => {}
            other => info!("Ignoring {} broadcast {}", self.key, other),
        }
    }

    fn push_output(&self, message: &KernelMessage, fragment: OutputFragment, count: Option<i64>) {
        let finishes = !self.key.kind.emits_execute_reply();
        self.update_result(message, |result| {
            result.push_output(fragment);
            if finishes {
                result.finish(now_millis(), count);
            }
        });
    }

    fn update_result(
        &self,
        message: &KernelMessage,
        f: impl FnOnce(&mut ExecutionResult),
    ) {
        match message.parent_msg_id() {
            Some(request_id) => self.replica.update_result(request_id, f),
            None => debug!("{} {} without parent", self.key, message.msg_type()),
        }
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn execution_count(content: &Value) -> Option<i64> {
    content.get("execution_count").and_then(Value::as_i64)
}

fn text(content: &Value, field: &str) -> String {
    content
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn object(content: &Value, field: &str) -> Map<String, Value> {
    content
        .get(field)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

#[cfg(test)]
#[path = "bridge_tests.rs"]
mod tests;
