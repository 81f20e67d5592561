use serde::{Deserialize, Serialize};

use crate::ids::MessageId;

/// Events carried on the chat stream, one per successfully decoded wire
/// frame. Closed tagged union: unknown `type` tags are ignored by the
/// interpreter rather than represented here.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// Generated text so far. `content` is cumulative (full text up to this
    /// point), not a delta.
    Chunk {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thinking: Option<String>,
    },
    Status {
        message: String,
    },
    Heartbeat,
    Complete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<MessageId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt_tokens: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        completion_tokens: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_tokens: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metrics: Option<GenerationMetrics>,
    },
    Error {
        message: String,
    },
}

/// Server-side timing measurements attached to the terminal event.
/// `tokens_per_second` is authoritative: only the server has true per-token
/// emission timestamps, so the client must never recompute it.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct GenerationMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_per_second: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_duration_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_eval_duration_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_duration_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration_ms: Option<f64>,
}

impl ChatEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }

    /// Whether this event counts as stream activity: the first of these
    /// observed on a connection moves a turn from sending to streaming.
    pub fn is_progress(&self) -> bool {
        matches!(
            self,
            Self::Chunk { .. } | Self::Status { .. } | Self::Heartbeat
        )
    }

    /// A bare completion event with no token data, for tests and defaults.
    pub fn complete_empty() -> Self {
        Self::Complete {
            message_id: None,
            prompt_tokens: None,
            completion_tokens: None,
            total_tokens: None,
            metrics: None,
        }
    }
}
