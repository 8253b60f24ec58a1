//! Typed model for the script engine's event stream.
//!
//! The engine delivers loosely structured messages on its own callback
//! thread. Everything downstream pattern-matches on [`EventClass`], which is
//! resolved exactly once at the callback boundary.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// Payload `type` marker identifying the terminal receipt emitted by
/// wrapped scripts.
pub const RECEIPT_TYPE: &str = "execution_receipt";

/// Engine message kind carrying script-originated payloads.
pub const KIND_SEND: &str = "send";

/// Engine message kind reporting a script-engine fault.
pub const KIND_ERROR: &str = "error";

/// A raw message received from a loaded script's event stream.
///
/// `kind` is an open set ("send", "error", and whatever else the engine
/// defines); `data` is the optional out-of-band binary blob some engines
/// attach to a message.
#[derive(Debug, Clone, Serialize)]
pub struct EngineMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "bytes_as_base64")]
    pub data: Option<Bytes>,
}

impl EngineMessage {
    /// Convenience constructor for a "send" message with no binary data.
    #[must_use]
    pub fn send(payload: Value) -> Self {
        Self {
            kind: KIND_SEND.to_owned(),
            payload,
            data: None,
        }
    }
}

#[allow(clippy::ref_option)]
fn bytes_as_base64<S: Serializer>(data: &Option<Bytes>, s: S) -> Result<S::Ok, S::Error> {
    match data {
        Some(bytes) => s.serialize_str(&BASE64.encode(bytes)),
        None => s.serialize_none(),
    }
}

/// Error descriptor carried by a receipt when evaluation threw.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptError {
    pub message: String,
    #[serde(default)]
    pub stack: Option<String>,
}

/// The single terminal event emitted by wrapped injected code.
///
/// Exactly one of `result` / `error` is present: `result` holds the
/// stringified evaluation result (the literal `"undefined"` when the source
/// produced none), `error` the thrown-error descriptor.
#[derive(Debug, Clone, Deserialize)]
pub struct Receipt {
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<ScriptError>,
    #[serde(default)]
    pub initial_logs: Vec<String>,
}

/// Closed classification of an engine message, resolved once per event.
#[derive(Debug)]
pub enum EventClass {
    /// The terminal execution receipt.
    Receipt(Receipt),
    /// An engine-level fault (script destroyed, session invalidated, ...).
    FatalError { description: String },
    /// Any other message; queued verbatim for resident scripts.
    Other,
}

impl EventClass {
    /// Classify a raw engine message.
    ///
    /// A "send" whose payload is tagged [`RECEIPT_TYPE`] is a receipt; an
    /// "error" message is a fatal engine fault; everything else, including a
    /// receipt-shaped payload that fails to parse, is `Other`.
    #[must_use]
    pub fn classify(msg: &EngineMessage) -> Self {
        match msg.kind.as_str() {
            KIND_SEND if msg.payload.get("type").and_then(Value::as_str) == Some(RECEIPT_TYPE) => {
                match Receipt::deserialize(&msg.payload) {
                    Ok(receipt) => Self::Receipt(receipt),
                    Err(e) => {
                        tracing::warn!("Malformed execution receipt: {e}");
                        Self::Other
                    }
                }
            }
            KIND_ERROR => Self::FatalError {
                description: msg
                    .payload
                    .get("description")
                    .and_then(Value::as_str)
                    .map_or_else(|| msg.payload.to_string(), ToOwned::to_owned),
            },
            _ => Self::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_receipt() {
        let msg = EngineMessage::send(json!({
            "type": RECEIPT_TYPE,
            "result": "2",
            "initial_logs": ["hello"],
        }));

        match EventClass::classify(&msg) {
            EventClass::Receipt(receipt) => {
                assert_eq!(receipt.result.as_deref(), Some("2"));
                assert!(receipt.error.is_none());
                assert_eq!(receipt.initial_logs, vec!["hello"]);
            }
            other => panic!("expected receipt, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_thrown_error_receipt() {
        let msg = EngineMessage::send(json!({
            "type": RECEIPT_TYPE,
            "error": { "message": "Error: x", "stack": "Error: x\n  at <eval>" },
            "initial_logs": [],
        }));

        match EventClass::classify(&msg) {
            EventClass::Receipt(receipt) => {
                assert!(receipt.result.is_none());
                let error = receipt.error.expect("error descriptor");
                assert_eq!(error.message, "Error: x");
                assert!(error.stack.unwrap().contains("at <eval>"));
            }
            other => panic!("expected receipt, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_fatal_error() {
        let msg = EngineMessage {
            kind: KIND_ERROR.to_owned(),
            payload: json!({ "description": "script is destroyed" }),
            data: None,
        };

        match EventClass::classify(&msg) {
            EventClass::FatalError { description } => {
                assert_eq!(description, "script is destroyed");
            }
            other => panic!("expected fatal error, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_plain_send_is_other() {
        let msg = EngineMessage::send(json!({ "hooked": "open", "path": "/etc/hosts" }));
        assert!(matches!(EventClass::classify(&msg), EventClass::Other));
    }

    #[test]
    fn test_malformed_receipt_is_other() {
        // Tagged as a receipt but initial_logs has the wrong shape.
        let msg = EngineMessage::send(json!({ "type": RECEIPT_TYPE, "initial_logs": 7 }));
        assert!(matches!(EventClass::classify(&msg), EventClass::Other));
    }

    #[test]
    fn test_message_serializes_binary_as_base64() {
        let msg = EngineMessage {
            kind: KIND_SEND.to_owned(),
            payload: json!({ "chunk": 0 }),
            data: Some(Bytes::from_static(b"\x00\x01\x02")),
        };

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "send");
        assert_eq!(value["data"], BASE64.encode(b"\x00\x01\x02"));

        let without = EngineMessage::send(json!({}));
        let value = serde_json::to_value(&without).unwrap();
        assert!(value.get("data").is_none());
    }
}
