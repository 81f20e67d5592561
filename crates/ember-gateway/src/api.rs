//! Request/response collaborator surface: sessions, messages, config,
//! models, health. Plain REST calls with no streaming or concurrency
//! complexity; the hot path lives in [`crate::client`].

use serde::{Deserialize, Serialize};
use tracing::instrument;

use ember_core::errors::GatewayError;
use ember_core::ids::{MessageId, SessionId};
use ember_core::messages::MessageRow;

use crate::client::HttpGateway;

/// Page size used when walking a session's full message list.
const MESSAGE_PAGE_LIMIT: u32 = 200;

#[derive(Clone, Debug, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
struct SessionListEnvelope {
    items: Vec<SessionSummary>,
}

/// One page of a session's message list.
#[derive(Clone, Debug, Deserialize)]
pub struct MessagePage {
    pub items: Vec<MessageRow>,
    pub total: u64,
    pub limit: u32,
    pub offset: u64,
}

impl MessagePage {
    /// Offset of the next page, or `None` once every row is held.
    pub fn next_offset(&self) -> Option<u64> {
        let fetched = self.offset + self.items.len() as u64;
        if fetched < self.total && !self.items.is_empty() {
            Some(fetched)
        } else {
            None
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct GenerationDefaults {
    pub model: String,
    pub temperature: f64,
    pub top_p: f64,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

/// The server's persisted configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    pub ollama_base_url: String,
    pub generation_defaults: GenerationDefaults,
    pub theme: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub modified_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelListEnvelope {
    items: Vec<ModelInfo>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServerHealth {
    pub status: String,
    pub version: String,
    #[serde(default)]
    pub uptime_seconds: Option<f64>,
}

#[derive(Serialize)]
struct CreateSessionBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
}

#[derive(Serialize)]
struct RenameSessionBody<'a> {
    title: &'a str,
}

#[derive(Serialize)]
struct PinBody {
    pinned: bool,
}

impl HttpGateway {
    #[instrument(skip(self))]
    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>, GatewayError> {
        let resp = self.get(&self.url("/api/sessions")).await?;
        let envelope: SessionListEnvelope = decode_json(resp).await?;
        Ok(envelope.items)
    }

    #[instrument(skip(self))]
    pub async fn create_session(
        &self,
        title: Option<&str>,
    ) -> Result<SessionSummary, GatewayError> {
        let resp = self
            .client
            .post(self.url("/api/sessions"))
            .json(&CreateSessionBody { title })
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        decode_json(check(resp).await?).await
    }

    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn rename_session(
        &self,
        session_id: SessionId,
        title: &str,
    ) -> Result<SessionSummary, GatewayError> {
        let resp = self
            .client
            .patch(self.url(&format!("/api/sessions/{session_id}")))
            .json(&RenameSessionBody { title })
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        decode_json(check(resp).await?).await
    }

    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn delete_session(&self, session_id: SessionId) -> Result<(), GatewayError> {
        let resp = self
            .client
            .delete(self.url(&format!("/api/sessions/{session_id}")))
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        check(resp).await.map(drop)
    }

    /// Fetch one page of a session's message list.
    #[instrument(skip(self), fields(session_id = %session_id, limit, offset))]
    pub async fn list_messages(
        &self,
        session_id: SessionId,
        limit: u32,
        offset: u64,
    ) -> Result<MessagePage, GatewayError> {
        let url = self.url(&format!(
            "/api/sessions/{session_id}/messages?limit={limit}&offset={offset}"
        ));
        decode_json(self.get(&url).await?).await
    }

    /// Walk every page until the full authoritative list is held. Used by
    /// the reconciler after a turn completes.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn fetch_all_messages(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<MessageRow>, GatewayError> {
        let mut rows = Vec::new();
        let mut offset = 0u64;
        loop {
            let page = self
                .list_messages(session_id, MESSAGE_PAGE_LIMIT, offset)
                .await?;
            let next = page.next_offset();
            rows.extend(page.items);
            match next {
                Some(n) => offset = n,
                None => break,
            }
        }
        Ok(rows)
    }

    #[instrument(skip(self), fields(session_id = %session_id, message_id = %message_id))]
    pub async fn delete_message(
        &self,
        session_id: SessionId,
        message_id: MessageId,
    ) -> Result<(), GatewayError> {
        let resp = self
            .client
            .delete(self.url(&format!(
                "/api/sessions/{session_id}/messages/{message_id}"
            )))
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        check(resp).await.map(drop)
    }

    #[instrument(skip(self), fields(session_id = %session_id, message_id = %message_id, pinned))]
    pub async fn set_message_pin(
        &self,
        session_id: SessionId,
        message_id: MessageId,
        pinned: bool,
    ) -> Result<MessageRow, GatewayError> {
        let resp = self
            .client
            .post(self.url(&format!(
                "/api/sessions/{session_id}/messages/{message_id}/pin"
            )))
            .json(&PinBody { pinned })
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        decode_json(check(resp).await?).await
    }

    #[instrument(skip(self))]
    pub async fn get_config(&self) -> Result<ServerConfig, GatewayError> {
        decode_json(self.get(&self.url("/api/config")).await?).await
    }

    #[instrument(skip(self))]
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, GatewayError> {
        let envelope: ModelListEnvelope =
            decode_json(self.get(&self.url("/api/models")).await?).await?;
        Ok(envelope.items)
    }

    #[instrument(skip(self))]
    pub async fn health(&self) -> Result<ServerHealth, GatewayError> {
        decode_json(self.get(&self.url("/api/health")).await?).await
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, GatewayError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        check(resp).await
    }
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(GatewayError::from_status(status.as_u16(), body))
}

async fn decode_json<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, GatewayError> {
    resp.json()
        .await
        .map_err(|e| GatewayError::Network(format!("decoding response body: {e}")))
}
