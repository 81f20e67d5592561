//! Scripted gateway for deterministic engine tests without a server.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use parking_lot::Mutex;

use ember_core::errors::GatewayError;
use ember_core::gateway::{ChatEventStream, ChatGateway, TurnRequest};
use ember_core::ids::SessionId;
use ember_core::messages::MessageRow;
use ember_core::stream::ChatEvent;

/// Pre-programmed behavior for one `stream_chat` call.
pub enum MockTurn {
    /// Yield these events, then end the stream.
    Events(Vec<ChatEvent>),
    /// Yield these items verbatim, for injecting transport failures
    /// mid-stream.
    Results(Vec<Result<ChatEvent, GatewayError>>),
    /// Yield these events, then stay pending forever. For cancellation
    /// tests: the stream only ends when the consumer drops it.
    EventsThenHang(Vec<ChatEvent>),
    /// Fail the `stream_chat` call itself.
    ConnectError(GatewayError),
    /// Wait, then behave like the inner turn.
    Delayed(Duration, Box<MockTurn>),
}

impl MockTurn {
    /// A well-behaved turn: status, cumulative chunks, then completion.
    pub fn streaming_text(chunks: &[&str], prompt_tokens: u64, completion_tokens: u64) -> Self {
        let mut events = vec![ChatEvent::Status {
            message: "stream-started".into(),
        }];
        events.extend(chunks.iter().map(|c| ChatEvent::Chunk {
            content: (*c).to_string(),
            thinking: None,
        }));
        events.push(ChatEvent::Complete {
            message_id: None,
            prompt_tokens: Some(prompt_tokens),
            completion_tokens: Some(completion_tokens),
            total_tokens: None,
            metrics: None,
        });
        Self::Events(events)
    }

    /// A turn that fails with a server-sent error before any content.
    pub fn domain_error(message: &str) -> Self {
        Self::Events(vec![ChatEvent::Error {
            message: message.into(),
        }])
    }
}

/// Gateway returning scripted turns and message lists in sequence.
pub struct MockGateway {
    turns: Mutex<VecDeque<MockTurn>>,
    fetch_results: Mutex<VecDeque<Result<Vec<MessageRow>, GatewayError>>>,
    stream_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl MockGateway {
    pub fn new(turns: Vec<MockTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            fetch_results: Mutex::new(VecDeque::new()),
            stream_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
        }
    }

    /// Queue the row list the next `fetch_messages` call returns.
    pub fn push_fetch_result(&self, result: Result<Vec<MessageRow>, GatewayError>) {
        self.fetch_results.lock().push_back(result);
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::Relaxed)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ChatGateway for MockGateway {
    async fn stream_chat(&self, _request: &TurnRequest) -> Result<ChatEventStream, GatewayError> {
        let _ = self.stream_calls.fetch_add(1, Ordering::Relaxed);
        let turn = self
            .turns
            .lock()
            .pop_front()
            .ok_or_else(|| GatewayError::InvalidRequest("no scripted turn left".into()))?;
        resolve(turn).await
    }

    async fn fetch_messages(
        &self,
        _session_id: SessionId,
    ) -> Result<Vec<MessageRow>, GatewayError> {
        let _ = self.fetch_calls.fetch_add(1, Ordering::Relaxed);
        self.fetch_results
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Resolve a turn, unrolling nested delays iteratively.
async fn resolve(turn: MockTurn) -> Result<ChatEventStream, GatewayError> {
    let mut current = turn;
    loop {
        match current {
            MockTurn::Events(events) => {
                return Ok(Box::pin(stream::iter(events.into_iter().map(Ok))));
            }
            MockTurn::Results(items) => {
                return Ok(Box::pin(stream::iter(items)));
            }
            MockTurn::EventsThenHang(events) => {
                return Ok(Box::pin(
                    stream::iter(events.into_iter().map(Ok)).chain(stream::pending()),
                ));
            }
            MockTurn::ConnectError(error) => return Err(error),
            MockTurn::Delayed(delay, inner) => {
                tokio::time::sleep(delay).await;
                current = *inner;
            }
        }
    }
}
