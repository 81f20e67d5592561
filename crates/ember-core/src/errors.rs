/// Typed error hierarchy for gateway operations.
/// Separates transport failures from server-sent domain errors and from
/// user-initiated cancellation, which is never a user-visible error.
#[derive(Clone, Debug, thiserror::Error)]
pub enum GatewayError {
    // Transport
    #[error("network error: {0}")]
    Network(String),
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("not found: {0}")]
    NotFound(String),

    // Domain — a server-sent `error` event; the message is shown verbatim.
    #[error("{0}")]
    Generation(String),

    // Operational
    #[error("cancelled")]
    Cancelled,
}

impl GatewayError {
    /// True for connection-level failures, as opposed to domain errors the
    /// server reported over a healthy connection.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Network(_)
                | Self::ServerError { .. }
                | Self::StreamInterrupted(_)
                | Self::InvalidRequest(_)
                | Self::NotFound(_)
        )
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::ServerError { .. } => "server_error",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::InvalidRequest(_) => "invalid_request",
            Self::NotFound(_) => "not_found",
            Self::Generation(_) => "generation",
            Self::Cancelled => "cancelled",
        }
    }

    /// Classify an HTTP status code into the appropriate variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            400 => Self::InvalidRequest(body),
            404 => Self::NotFound(body),
            500..=599 => Self::ServerError { status, body },
            _ => Self::InvalidRequest(format!("unexpected status {status}: {body}")),
        }
    }
}
