use ember_core::errors::GatewayError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// A second prompt was submitted while the session's turn slot was
    /// occupied. Overlapping prompts are rejected, never queued.
    #[error("stream already in progress")]
    TurnInProgress,

    #[error("no session selected")]
    NoSessionSelected,

    #[error("prompt or regenerate_message_id is required")]
    EmptyPrompt,

    #[error("{0}")]
    Internal(String),
}
