//! Per-session turn lifecycle.
//!
//! One [`TurnMachine`] drives exactly one turn: it applies interpreted
//! stream events, publishes every transition through a `watch` channel,
//! and owns the turn's cancellation handle. The handle (and any release
//! hook installed by the orchestrator) is dropped before a terminal state
//! is published, so observers of a terminal phase can rely on the
//! transport slot being free.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use ember_core::errors::GatewayError;
use ember_core::stream::ChatEvent;
use ember_core::tokens::TurnMetrics;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    Idle,
    Sending,
    Streaming,
    Complete,
    Error,
    Cancelled,
}

impl TurnPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Sending => "sending",
            Self::Streaming => "streaming",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Snapshot of one turn, published wholesale on every transition.
#[derive(Clone, Debug, Serialize)]
pub struct TurnState {
    pub phase: TurnPhase,
    /// Cumulative generated text. Chunk payloads carry the full text so
    /// far, so this is assigned, never appended, and never shrinks while
    /// streaming.
    pub content: String,
    pub thinking: String,
    pub status_message: Option<String>,
    pub error_message: Option<String>,
    pub heartbeats: u32,
    pub started_at: DateTime<Utc>,
    pub metrics: Option<TurnMetrics>,
}

impl TurnState {
    pub fn idle() -> Self {
        Self::with_phase(TurnPhase::Idle)
    }

    fn sending() -> Self {
        Self::with_phase(TurnPhase::Sending)
    }

    fn with_phase(phase: TurnPhase) -> Self {
        Self {
            phase,
            content: String::new(),
            thinking: String::new(),
            status_message: None,
            error_message: None,
            heartbeats: 0,
            started_at: Utc::now(),
            metrics: None,
        }
    }
}

/// State machine for one turn. Exactly one exists per in-flight turn;
/// a new turn gets a new machine and a new watch channel.
pub struct TurnMachine {
    state: TurnState,
    tx: watch::Sender<TurnState>,
    cancel: Option<CancellationToken>,
    release: Option<Box<dyn FnOnce() + Send>>,
    started: Instant,
}

impl TurnMachine {
    /// Start a turn in the `Sending` phase. The receiver observes every
    /// subsequent transition.
    pub fn begin(cancel: CancellationToken) -> (Self, watch::Receiver<TurnState>) {
        let state = TurnState::sending();
        let (tx, rx) = watch::channel(state.clone());
        (
            Self {
                state,
                tx,
                cancel: Some(cancel),
                release: None,
                started: Instant::now(),
            },
            rx,
        )
    }

    /// Install cleanup that must run before any terminal phase becomes
    /// observable. The orchestrator frees the session's active-turn slot
    /// here.
    pub fn with_release(mut self, release: impl FnOnce() + Send + 'static) -> Self {
        self.release = Some(Box::new(release));
        self
    }

    pub fn state(&self) -> &TurnState {
        &self.state
    }

    pub fn phase(&self) -> TurnPhase {
        self.state.phase
    }

    /// Apply one interpreted stream event. Events arriving after a
    /// terminal phase — a connection draining after cancel, or a server
    /// talking past its own completion — are discarded.
    pub fn apply(&mut self, event: ChatEvent) {
        if self.state.phase.is_terminal() {
            return;
        }

        if self.state.phase == TurnPhase::Sending && event.is_progress() {
            self.state.phase = TurnPhase::Streaming;
        }

        match event {
            ChatEvent::Chunk { content, thinking } => {
                self.state.content = content;
                if let Some(thinking) = thinking {
                    self.state.thinking = thinking;
                }
            }
            ChatEvent::Status { message } => {
                self.state.status_message = Some(message);
            }
            ChatEvent::Heartbeat => {
                self.state.heartbeats += 1;
            }
            ChatEvent::Complete {
                prompt_tokens,
                completion_tokens,
                total_tokens,
                metrics,
                ..
            } => {
                self.state.metrics = Some(TurnMetrics::from_completion(
                    prompt_tokens,
                    completion_tokens,
                    total_tokens,
                    metrics.as_ref(),
                    self.started.elapsed(),
                ));
                self.enter_terminal(TurnPhase::Complete);
                return;
            }
            ChatEvent::Error { message } => {
                self.state.error_message = Some(message);
                self.enter_terminal(TurnPhase::Error);
                return;
            }
        }

        self.publish();
    }

    /// Transport-level failure. Cancellation never comes through here.
    pub fn fail(&mut self, error: &GatewayError) {
        if self.state.phase.is_terminal() {
            return;
        }
        self.state.error_message = Some(error.to_string());
        self.enter_terminal(TurnPhase::Error);
    }

    /// Flip to `Cancelled` synchronously, regardless of how quickly the
    /// underlying connection closes. Returns false (and changes nothing)
    /// once a terminal phase is reached.
    pub fn cancel(&mut self) -> bool {
        if self.state.phase.is_terminal() {
            return false;
        }
        if let Some(token) = &self.cancel {
            token.cancel();
        }
        self.enter_terminal(TurnPhase::Cancelled);
        true
    }

    fn enter_terminal(&mut self, phase: TurnPhase) {
        self.state.phase = phase;
        // Handle release precedes observability of the terminal state.
        self.cancel = None;
        if let Some(release) = self.release.take() {
            release();
        }
        self.publish();
    }

    fn publish(&self) {
        let _ = self.tx.send(self.state.clone());
    }
}
