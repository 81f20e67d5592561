use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::stream::GenerationMetrics;

/// Immutable per-turn token snapshot, produced once when a turn completes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnMetrics {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    /// Server-measured throughput when available; otherwise a coarse value
    /// derived from client elapsed time, suitable for display only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_per_second: Option<f64>,
}

impl TurnMetrics {
    /// Derive the snapshot from a terminal `complete` event's fields.
    ///
    /// Absent token counts default to zero. An absent `total_tokens` falls
    /// back to prompt + completion. A server-provided `tokens_per_second` is
    /// used verbatim; only when the server omits it does the client fall
    /// back to its own elapsed-time estimate.
    pub fn from_completion(
        prompt_tokens: Option<u64>,
        completion_tokens: Option<u64>,
        total_tokens: Option<u64>,
        metrics: Option<&GenerationMetrics>,
        elapsed: Duration,
    ) -> Self {
        let prompt = prompt_tokens.unwrap_or(0);
        let completion = completion_tokens.unwrap_or(0);
        let total = total_tokens.unwrap_or(prompt + completion);

        let tokens_per_second = metrics
            .and_then(|m| m.tokens_per_second)
            .or_else(|| fallback_throughput(completion, elapsed));

        Self {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: total,
            tokens_per_second,
        }
    }
}

fn fallback_throughput(completion_tokens: u64, elapsed: Duration) -> Option<f64> {
    let secs = elapsed.as_secs_f64();
    if completion_tokens == 0 || secs <= 0.0 {
        return None;
    }
    Some((completion_tokens as f64 / secs * 100.0).round() / 100.0)
}
