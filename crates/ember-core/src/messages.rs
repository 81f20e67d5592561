use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, SessionId};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

/// One persisted transcript row as the server returns it.
///
/// Authoritative rows are read-only from the engine's perspective: the engine
/// only ever replaces its in-memory list wholesale after a refetch, never
/// edits individual rows. The single exception is the locally synthesized
/// placeholder built by [`MessageRow::placeholder`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MessageRow {
    pub id: MessageId,
    pub session_id: SessionId,
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default)]
    pub metrics: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub pinned: bool,
    pub created_at: String,
}

impl MessageRow {
    /// Build the locally synthesized user row shown while a prompt is in
    /// flight. `id` must come from the transcript's sentinel counter.
    pub fn placeholder(
        id: MessageId,
        session_id: SessionId,
        content: impl Into<String>,
        model: Option<String>,
    ) -> Self {
        Self {
            id,
            session_id,
            role: MessageRole::User,
            content: content.into(),
            model,
            prompt_tokens: None,
            completion_tokens: None,
            total_tokens: None,
            metrics: serde_json::Map::new(),
            pinned: false,
            created_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.id.is_placeholder()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serde_is_snake_case() {
        let json = serde_json::to_string(&MessageRole::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
        let parsed: MessageRole = serde_json::from_str("\"user\"").unwrap();
        assert_eq!(parsed, MessageRole::User);
    }

    #[test]
    fn deserializes_server_row() {
        let json = r#"{
            "id": 12,
            "session_id": 3,
            "role": "assistant",
            "content": "Hello!",
            "model": "llama3",
            "prompt_tokens": 10,
            "completion_tokens": 4,
            "total_tokens": 14,
            "metrics": {"tokens_per_second": 41.2},
            "pinned": false,
            "created_at": "2025-06-01T12:00:00Z"
        }"#;
        let row: MessageRow = serde_json::from_str(json).unwrap();
        assert_eq!(row.id, MessageId::new(12));
        assert_eq!(row.role, MessageRole::Assistant);
        assert_eq!(row.total_tokens, Some(14));
        assert!(!row.is_placeholder());
    }

    #[test]
    fn optional_fields_default() {
        let json = r#"{
            "id": 1,
            "session_id": 3,
            "role": "user",
            "content": "hi",
            "created_at": "2025-06-01T12:00:00Z"
        }"#;
        let row: MessageRow = serde_json::from_str(json).unwrap();
        assert!(row.model.is_none());
        assert!(row.metrics.is_empty());
        assert!(!row.pinned);
    }

    #[test]
    fn placeholder_row_is_marked() {
        let row = MessageRow::placeholder(
            MessageId::new(-1),
            SessionId::new(3),
            "draft prompt",
            Some("llama3".into()),
        );
        assert!(row.is_placeholder());
        assert_eq!(row.role, MessageRole::User);
        assert_eq!(row.content, "draft prompt");
    }
}
