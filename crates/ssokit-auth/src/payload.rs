//! Payload type and typed access to decoded message fields.

use serde_json::Value;

use crate::error::ProtocolError;

/// Call-specific payload: an insertion-ordered map of JSON values.
pub type Payload = serde_json::Map<String, Value>;

/// Decode a body as a JSON object.
pub(crate) fn decode_object(body: &[u8]) -> Result<Payload, ProtocolError> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ProtocolError::DataCorrupt(format!(
            "expected a JSON object, found {}",
            type_name(&other)
        ))),
        Err(e) => Err(ProtocolError::DataCorrupt(format!("JSON decoding error: {e}"))),
    }
}

/// Look up a key that must be present (a `null` value counts as present).
pub(crate) fn require<'a>(data: &'a Payload, key: &str) -> Result<&'a Value, ProtocolError> {
    data.get(key)
        .ok_or_else(|| ProtocolError::DataIncomplete(format!("missing {key}")))
}

/// Read an integer field given as a JSON number or a numeric string.
pub(crate) fn int_field(key: &str, value: &Value) -> Result<i64, ProtocolError> {
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Null => return Err(ProtocolError::DataIncomplete(format!("missing {key}"))),
        _ => None,
    };
    parsed.ok_or_else(|| ProtocolError::DataCorrupt(format!("{key} is not an integer")))
}

/// Read an optional identifier given as a string or a number.
pub(crate) fn id_field(key: &str, value: &Value) -> Result<Option<String>, ProtocolError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) if s.is_empty() => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(ProtocolError::DataCorrupt(format!(
            "{key} must be a string or number, found {}",
            type_name(other)
        ))),
    }
}

/// Read a payload field; `null` and an empty array decode as an empty map.
pub(crate) fn payload_field(value: &Value) -> Result<Payload, ProtocolError> {
    match value {
        Value::Object(map) => Ok(map.clone()),
        Value::Null => Ok(Payload::new()),
        Value::Array(items) if items.is_empty() => Ok(Payload::new()),
        other => Err(ProtocolError::DataCorrupt(format!(
            "payload must be an object, found {}",
            type_name(other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_should_reject_non_json_body() {
        assert!(matches!(
            decode_object(b"not json"),
            Err(ProtocolError::DataCorrupt(_))
        ));
    }

    #[test]
    fn test_should_reject_non_object_body() {
        assert!(matches!(
            decode_object(b"[1,2]"),
            Err(ProtocolError::DataCorrupt(_))
        ));
    }

    #[test]
    fn test_should_treat_null_as_present() {
        let data = decode_object(br#"{"message":null}"#).unwrap();
        assert_eq!(require(&data, "message").unwrap(), &Value::Null);
        assert!(matches!(
            require(&data, "payload"),
            Err(ProtocolError::DataIncomplete(_))
        ));
    }

    #[test]
    fn test_should_read_integers_from_numbers_and_strings() {
        assert_eq!(int_field("timestamp", &json!(1_700_000_000)).unwrap(), 1_700_000_000);
        assert_eq!(int_field("timestamp", &json!("1700000000")).unwrap(), 1_700_000_000);
        assert!(matches!(
            int_field("timestamp", &json!("soon")),
            Err(ProtocolError::DataCorrupt(_))
        ));
        assert!(matches!(
            int_field("timestamp", &Value::Null),
            Err(ProtocolError::DataIncomplete(_))
        ));
    }

    #[test]
    fn test_should_read_ids_from_strings_and_numbers() {
        assert_eq!(id_field("request_id", &json!("r-1")).unwrap().as_deref(), Some("r-1"));
        assert_eq!(id_field("request_id", &json!(17)).unwrap().as_deref(), Some("17"));
        assert_eq!(id_field("request_id", &json!("")).unwrap(), None);
        assert_eq!(id_field("request_id", &Value::Null).unwrap(), None);
        assert!(id_field("request_id", &json!([1])).is_err());
    }

    #[test]
    fn test_should_decode_empty_array_payload_as_empty_map() {
        assert!(payload_field(&json!([])).unwrap().is_empty());
        assert!(payload_field(&Value::Null).unwrap().is_empty());
        assert!(payload_field(&json!("x")).is_err());
    }
}
