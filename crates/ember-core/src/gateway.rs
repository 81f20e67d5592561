use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::Serialize;

use crate::errors::GatewayError;
use crate::ids::{MessageId, SessionId};
use crate::messages::MessageRow;
use crate::options::GenerationOptions;
use crate::stream::ChatEvent;

/// Interpreted events in arrival order. `Err` items are transport
/// failures; a server-sent `error` event arrives as
/// `Ok(ChatEvent::Error { .. })` so the two stay distinguishable.
/// Dropping the stream aborts the underlying request; that is the
/// cancellation signal at the transport layer.
pub type ChatEventStream = Pin<Box<dyn Stream<Item = Result<ChatEvent, GatewayError>> + Send>>;

/// Body of the streaming chat call. Either `prompt` or
/// `regenerate_message_id` must be set; the orchestrator enforces that
/// before any I/O happens.
#[derive(Clone, Debug, Serialize)]
pub struct TurnRequest {
    pub session_id: SessionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<GenerationOptions>,
    pub think: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regenerate_message_id: Option<MessageId>,
}

impl TurnRequest {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            prompt: None,
            model: None,
            system_prompt: None,
            options: None,
            think: false,
            regenerate_message_id: None,
        }
    }

    pub fn is_regeneration(&self) -> bool {
        self.regenerate_message_id.is_some()
    }
}

/// The seam between the engine and the transport. The production
/// implementation speaks HTTP to the chat server; tests use a scripted
/// mock.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    /// Open the streaming chat call and return its event stream.
    async fn stream_chat(&self, request: &TurnRequest) -> Result<ChatEventStream, GatewayError>;

    /// Fetch the session's full, authoritative message list.
    async fn fetch_messages(&self, session_id: SessionId) -> Result<Vec<MessageRow>, GatewayError>;
}
