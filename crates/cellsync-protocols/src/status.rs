//! Typed records the kernel bridge writes into a document.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Runtime status of a kernel as shown to every client of the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeStatus {
    #[default]
    Absent,
    Starting,
    Idle,
    Busy,
    Refreshing,
    Unknown,
}

impl RuntimeStatus {
    /// Map a kernel `execution_state` onto a runtime status.
    pub fn from_execution_state(state: &str) -> Self {
        match state {
            "idle" => RuntimeStatus::Idle,
            "busy" => RuntimeStatus::Busy,
            "starting" => RuntimeStatus::Starting,
            _ => RuntimeStatus::Unknown,
        }
    }
}

/// Entry of the runtime-status map, one per kernel kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct KernelRuntime {
    pub status: RuntimeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

impl KernelRuntime {
    pub fn with_status(status: RuntimeStatus) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }
}

/// A single piece of output produced by an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputFragment {
    /// Text written to a named stream (`stdout`, `stderr`).
    Stream { name: String, text: String },

    /// The value of the last expression.
    ExecuteResult {
        data: Map<String, Value>,
        #[serde(default)]
        metadata: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        execution_count: Option<i64>,
    },

    /// Rich output emitted explicitly by user code.
    DisplayData {
        data: Map<String, Value>,
        #[serde(default)]
        metadata: Value,
    },
}

/// Error raised by user code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub stacktrace: Vec<String>,
}

/// Entry of the execution-result map, keyed by execution request id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ExecutionResult {
    #[serde(default)]
    pub running: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec_count: Option<i64>,
    /// Milliseconds since the unix epoch.
    #[serde(
        default,
        rename = "lastExecutedAt",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_executed_at: Option<i64>,
    #[serde(default)]
    pub outputs: Vec<OutputFragment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionFailure>,
}

impl ExecutionResult {
    /// A fresh entry for a request that was just submitted.
    pub fn started() -> Self {
        Self {
            running: true,
            ..Default::default()
        }
    }

    /// Mark the execution finished.
    pub fn finish(&mut self, at_millis: i64, exec_count: Option<i64>) {
        self.running = false;
        self.last_executed_at = Some(at_millis);
        if exec_count.is_some() {
            self.exec_count = exec_count;
        }
    }

    /// Append a stream fragment, merging with the previous one on the same stream.
    pub fn push_stream(&mut self, name: &str, text: &str) {
        if let Some(OutputFragment::Stream {
            name: last_name,
            text: last_text,
        }) = self.outputs.last_mut()
        {
            if last_name == name {
                last_text.push_str(text);
                return;
            }
        }
        self.outputs.push(OutputFragment::Stream {
            name: name.to_string(),
            text: text.to_string(),
        });
    }

    pub fn push_output(&mut self, fragment: OutputFragment) {
        self.outputs.push(fragment);
    }

    pub fn clear_outputs(&mut self) {
        self.outputs.clear();
        self.error = None;
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
