use super::*;
use serde_json::json;

#[test]
fn test_runtime_status_from_execution_state() {
    assert_eq!(RuntimeStatus::from_execution_state("idle"), RuntimeStatus::Idle);
    assert_eq!(RuntimeStatus::from_execution_state("busy"), RuntimeStatus::Busy);
    assert_eq!(
        RuntimeStatus::from_execution_state("starting"),
        RuntimeStatus::Starting
    );
    assert_eq!(
        RuntimeStatus::from_execution_state("restarting"),
        RuntimeStatus::Unknown
    );
}

#[test]
fn test_kernel_runtime_serialization_skips_usage() {
    let runtime = KernelRuntime::with_status(RuntimeStatus::Refreshing);
    let value = serde_json::to_value(&runtime).unwrap();
    assert_eq!(value, json!({"status": "refreshing"}));
}

#[test]
fn test_execution_result_field_names() {
    let mut result = ExecutionResult::started();
    result.finish(1_700_000_000_000, Some(3));
    let value = serde_json::to_value(&result).unwrap();
    assert_eq!(value["running"], json!(false));
    assert_eq!(value["exec_count"], json!(3));
    assert_eq!(value["lastExecutedAt"], json!(1_700_000_000_000i64));
}

#[test]
fn test_finish_keeps_previous_count_when_missing() {
    let mut result = ExecutionResult::started();
    result.finish(10, Some(7));
    result.finish(20, None);
    assert_eq!(result.exec_count, Some(7));
    assert_eq!(result.last_executed_at, Some(20));
}

#[test]
fn test_push_stream_merges_same_stream() {
    let mut result = ExecutionResult::started();
    result.push_stream("stdout", "a");
    result.push_stream("stdout", "b");
    result.push_stream("stderr", "c");
    assert_eq!(result.outputs.len(), 2);
    assert_eq!(
        result.outputs[0],
        OutputFragment::Stream {
            name: "stdout".to_string(),
            text: "ab".to_string()
        }
    );
}

#[test]
fn test_output_fragment_tagging() {
    let fragment: OutputFragment = serde_json::from_value(json!({
        "type": "display_data",
        "data": {"text/plain": "7"},
    }))
    .unwrap();
    match fragment {
        OutputFragment::DisplayData { data, metadata } => {
            assert_eq!(data["text/plain"], json!("7"));
            assert_eq!(metadata, Value::Null);
        }
        other => panic!("unexpected fragment {:?}", other),
    }
}

#[test]
fn test_clear_outputs_drops_error() {
    let mut result = ExecutionResult::started();
    result.push_stream("stdout", "x");
    result.error = Some(ExecutionFailure {
        name: "ValueError".to_string(),
        value: "bad".to_string(),
        stacktrace: vec![],
    });
    result.clear_outputs();
    assert!(result.outputs.is_empty());
    assert!(result.error.is_none());
}
