//! Conversion between JSON values and replicated `Any` values.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Number, Value};
use yrs::Any;

/// Largest integer an IEEE double represents exactly.
const MAX_SAFE_INTEGER: i64 = (1 << 53) - 1;

pub(crate) fn json_to_any(value: &Value) -> Any {
    match value {
        Value::Null => Any::Null,
        Value::Bool(b) => Any::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) if i.unsigned_abs() > MAX_SAFE_INTEGER as u64 => Any::BigInt(i),
            Some(i) => Any::Number(i as f64),
            None => Any::Number(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => Any::String(Arc::from(s.as_str())),
        Value::Array(items) => Any::Array(items.iter().map(json_to_any).collect::<Vec<_>>().into()),
        Value::Object(fields) => Any::Map(Arc::new(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), json_to_any(v)))
                .collect::<HashMap<_, _>>(),
        )),
    }
}

pub(crate) fn any_to_json(value: &Any) -> Value {
    match value {
        Any::Null | Any::Undefined => Value::Null,
        Any::Bool(b) => Value::Bool(*b),
        Any::Number(n) => {
            if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER as f64 {
                Value::Number(Number::from(*n as i64))
            } else {
                Number::from_f64(*n).map(Value::Number).unwrap_or(Value::Null)
            }
        }
        Any::BigInt(i) => Value::Number(Number::from(*i)),
        Any::String(s) => Value::String(s.to_string()),
        Any::Buffer(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
        Any::Array(items) => Value::Array(items.iter().map(any_to_json).collect()),
        Any::Map(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), any_to_json(v)))
                .collect::<Map<_, _>>(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_roundtrip() {
        let value = json!({
            "running": false,
            "exec_count": 3,
            "outputs": [{"type": "stream", "name": "stdout", "text": "7\n"}],
            "ratio": 0.5,
            "error": null
        });
        assert_eq!(any_to_json(&json_to_any(&value)), value);
    }

    #[test]
    fn test_integers_stay_integers() {
        let any = json_to_any(&json!(1_700_000_000_000i64));
        assert!(matches!(any, Any::Number(_)));
        assert_eq!(any_to_json(&any), json!(1_700_000_000_000i64));
    }

    #[test]
    fn test_large_integers_use_bigint() {
        let big = i64::MAX;
        let any = json_to_any(&json!(big));
        assert!(matches!(any, Any::BigInt(_)));
        assert_eq!(any_to_json(&any), json!(big));
    }

    #[test]
    fn test_most_negative_integer() {
        let any = json_to_any(&json!(i64::MIN));
        assert!(matches!(any, Any::BigInt(i64::MIN)));
        assert_eq!(any_to_json(&any), json!(i64::MIN));
    }
}
