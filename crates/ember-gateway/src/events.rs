//! Interpreter for decoded frame payloads.
//!
//! Each payload is a JSON document selected by a `type` discriminator.
//! Two failure modes are deliberately kept apart: payloads that are not
//! valid JSON (or miss required fields) are dropped with a diagnostic and
//! the stream continues, while valid payloads with an unrecognized `type`
//! are skipped silently so future server event kinds do not break older
//! clients.

use ember_core::stream::ChatEvent;
use serde_json::Value;

const KNOWN_TYPES: [&str; 5] = ["chunk", "status", "heartbeat", "complete", "error"];

/// Outcome of interpreting one frame payload.
#[derive(Clone, Debug, PartialEq)]
pub enum Decoded {
    Event(ChatEvent),
    /// Valid JSON with an unrecognized `type` tag.
    Ignored(String),
    /// Undecodable payload; carries the decode error text.
    Malformed(String),
}

pub fn interpret(payload: &str) -> Decoded {
    let value: Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(error) => return Decoded::Malformed(error.to_string()),
    };

    let tag = match value.get("type").and_then(Value::as_str) {
        Some(tag) => tag.to_string(),
        None => return Decoded::Malformed("missing `type` discriminator".into()),
    };

    if !KNOWN_TYPES.contains(&tag.as_str()) {
        return Decoded::Ignored(tag);
    }

    match serde_json::from_value::<ChatEvent>(value) {
        Ok(event) => Decoded::Event(event),
        Err(error) => Decoded::Malformed(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::ids::MessageId;

    #[test]
    fn interprets_chunk() {
        let decoded = interpret(r#"{"type":"chunk","content":"Hello","thinking":null}"#);
        assert_eq!(
            decoded,
            Decoded::Event(ChatEvent::Chunk {
                content: "Hello".into(),
                thinking: None,
            })
        );
    }

    #[test]
    fn interprets_status_and_heartbeat() {
        assert_eq!(
            interpret(r#"{"type":"status","message":"stream-started"}"#),
            Decoded::Event(ChatEvent::Status {
                message: "stream-started".into()
            })
        );
        assert_eq!(
            interpret(r#"{"type":"heartbeat","timestamp":"2025-06-01T00:00:00Z"}"#),
            Decoded::Event(ChatEvent::Heartbeat)
        );
    }

    #[test]
    fn interprets_complete_with_metrics() {
        let decoded = interpret(
            r#"{"type":"complete","message_id":14,"prompt_tokens":3,"completion_tokens":2,"total_tokens":5,"metrics":{"tokens_per_second":18.7}}"#,
        );
        match decoded {
            Decoded::Event(ChatEvent::Complete {
                message_id,
                prompt_tokens,
                completion_tokens,
                total_tokens,
                metrics,
            }) => {
                assert_eq!(message_id, Some(MessageId::new(14)));
                assert_eq!(prompt_tokens, Some(3));
                assert_eq!(completion_tokens, Some(2));
                assert_eq!(total_tokens, Some(5));
                assert_eq!(metrics.unwrap().tokens_per_second, Some(18.7));
            }
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    #[test]
    fn interprets_error_event() {
        assert_eq!(
            interpret(r#"{"type":"error","message":"model not found"}"#),
            Decoded::Event(ChatEvent::Error {
                message: "model not found".into()
            })
        );
    }

    #[test]
    fn malformed_json_is_dropped_not_fatal() {
        assert!(matches!(
            interpret("{not json at all"),
            Decoded::Malformed(_)
        ));
        assert!(matches!(interpret(""), Decoded::Malformed(_)));
    }

    #[test]
    fn missing_discriminator_is_malformed() {
        assert!(matches!(
            interpret(r#"{"content":"orphan"}"#),
            Decoded::Malformed(_)
        ));
        // Non-string discriminators are just as undecodable.
        assert!(matches!(
            interpret(r#"{"type":42}"#),
            Decoded::Malformed(_)
        ));
    }

    #[test]
    fn known_type_with_missing_fields_is_malformed() {
        assert!(matches!(
            interpret(r#"{"type":"chunk"}"#),
            Decoded::Malformed(_)
        ));
        assert!(matches!(
            interpret(r#"{"type":"status"}"#),
            Decoded::Malformed(_)
        ));
    }

    #[test]
    fn unknown_type_is_ignored_for_forward_compat() {
        assert_eq!(
            interpret(r#"{"type":"tool_call","name":"search"}"#),
            Decoded::Ignored("tool_call".into())
        );
    }
}
