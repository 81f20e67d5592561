use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use tracing::{debug, instrument, warn};

use ember_core::errors::GatewayError;
use ember_core::gateway::{ChatEventStream, ChatGateway, TurnRequest};
use ember_core::ids::SessionId;
use ember_core::messages::MessageRow;
use ember_core::stream::ChatEvent;
use ember_telemetry::MetricsRecorder;

use crate::events::{interpret, Decoded};
use crate::sse::FrameDecoder;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for the chat server. One instance per server; cheap to
/// clone the inner reqwest client across calls.
pub struct HttpGateway {
    base_url: String,
    pub(crate) client: reqwest::Client,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[async_trait]
impl ChatGateway for HttpGateway {
    #[instrument(skip(self, request), fields(session_id = %request.session_id))]
    async fn stream_chat(&self, request: &TurnRequest) -> Result<ChatEventStream, GatewayError> {
        let resp = self
            .client
            .post(self.url("/api/chat"))
            .json(request)
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::from_status(status, body));
        }

        if let Some(metrics) = &self.metrics {
            metrics.increment_counter("gateway.streams_opened", &[], 1);
        }

        Ok(Box::pin(EventStream::new(
            resp.bytes_stream(),
            self.metrics.clone(),
        )))
    }

    async fn fetch_messages(&self, session_id: SessionId) -> Result<Vec<MessageRow>, GatewayError> {
        self.fetch_all_messages(session_id).await
    }
}

/// Adapts a transport byte stream into interpreted chat events.
///
/// All buffered fragments are decoded and interpreted to completion
/// between polls of the inner stream, so a consumer never observes a
/// half-applied frame. A transport read failure is surfaced as exactly
/// one `Err` item, after which the stream ends. An unterminated trailing
/// frame at end of stream is discarded.
pub struct EventStream<S> {
    inner: Pin<Box<S>>,
    decoder: FrameDecoder,
    pending: VecDeque<ChatEvent>,
    metrics: Option<Arc<MetricsRecorder>>,
    finished: bool,
}

impl<S, E> EventStream<S>
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Send,
    E: std::fmt::Display,
{
    pub fn new(byte_stream: S, metrics: Option<Arc<MetricsRecorder>>) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            decoder: FrameDecoder::new(),
            pending: VecDeque::new(),
            metrics,
            finished: false,
        }
    }

    fn interpret_frames(&mut self, fragment: &[u8]) {
        for payload in self.decoder.push(fragment) {
            match interpret(&payload) {
                Decoded::Event(event) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.increment_counter("gateway.frames_decoded", &[], 1);
                    }
                    self.pending.push_back(event);
                }
                Decoded::Ignored(event_type) => {
                    debug!(event_type, "ignoring unrecognized stream event type");
                }
                Decoded::Malformed(error) => {
                    warn!(%error, payload_len = payload.len(), "dropping malformed frame");
                    if let Some(metrics) = &self.metrics {
                        metrics.increment_counter("gateway.frames_dropped", &[], 1);
                    }
                }
            }
        }
    }
}

impl<S, E> Stream for EventStream<S>
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Send,
    E: std::fmt::Display,
{
    type Item = Result<ChatEvent, GatewayError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(event) = self.pending.pop_front() {
            return Poll::Ready(Some(Ok(event)));
        }
        if self.finished {
            return Poll::Ready(None);
        }

        loop {
            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    self.interpret_frames(&bytes);
                    if let Some(event) = self.pending.pop_front() {
                        return Poll::Ready(Some(Ok(event)));
                    }
                }
                Poll::Ready(Some(Err(error))) => {
                    self.finished = true;
                    return Poll::Ready(Some(Err(GatewayError::StreamInterrupted(
                        error.to_string(),
                    ))));
                }
                Poll::Ready(None) => {
                    self.finished = true;
                    if self.decoder.has_partial() {
                        warn!("discarding unterminated trailing frame at end of stream");
                        if let Some(metrics) = &self.metrics {
                            metrics.increment_counter("gateway.frames_discarded_at_eof", &[], 1);
                        }
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
