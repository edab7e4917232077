//! Outbound message envelope
//!
//! Every application message sent upstream is wrapped in the same envelope:
//! `{"action": "sendmessage", "data": <payload>}`. The payload is opaque to
//! the relay; delivery is fire-and-forget (the transport gives no
//! acknowledgement and the relay does not track any).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Routing action understood by the upstream endpoint
pub const ACTION_SEND_MESSAGE: &str = "sendmessage";

/// Wrapper for all outbound application messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    /// Routing action for the upstream endpoint
    pub action: String,

    /// Opaque payload forwarded verbatim
    pub data: Value,
}

impl OutboundEnvelope {
    /// Wrap a payload in the send-message envelope
    pub fn send_message(data: Value) -> Self {
        Self {
            action: ACTION_SEND_MESSAGE.to_string(),
            data,
        }
    }

    /// Serialize to a JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from a JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_send_message_wire_format() {
        let envelope = OutboundEnvelope::send_message(json!("hello"));
        let wire = envelope.to_json().unwrap();

        // Exact shape the upstream endpoint routes on
        assert_eq!(wire, r#"{"action":"sendmessage","data":"hello"}"#);
    }

    #[test]
    fn test_structured_payload() {
        let envelope = OutboundEnvelope::send_message(json!({
            "kind": "alert",
            "severity": 3,
        }));
        let wire = envelope.to_json().unwrap();

        assert!(wire.contains(r#""action":"sendmessage""#));
        assert!(wire.contains(r#""kind":"alert""#));
        assert!(wire.contains(r#""severity":3"#));
    }

    #[test]
    fn test_roundtrip() {
        let envelope = OutboundEnvelope::send_message(json!({"n": [1, 2, 3]}));
        let wire = envelope.to_json().unwrap();
        let parsed = OutboundEnvelope::from_json(&wire).unwrap();

        assert_eq!(parsed, envelope);
    }

    #[test]
    fn test_null_payload_is_preserved() {
        let envelope = OutboundEnvelope::send_message(Value::Null);
        let wire = envelope.to_json().unwrap();

        assert_eq!(wire, r#"{"action":"sendmessage","data":null}"#);
    }
}
