//! Session orchestrator — composition root of the streaming engine.
//!
//! Enforces the one-active-turn-per-session invariant with a single
//! mutable slot (no queue), drives decoder → interpreter → state machine
//! → reconciler to a terminal phase, and exposes the turn state and the
//! last completed-turn metrics as read-only observables.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use ember_core::errors::GatewayError;
use ember_core::gateway::{ChatGateway, TurnRequest};
use ember_core::ids::{MessageId, SessionId};
use ember_core::messages::MessageRow;
use ember_core::options::GenerationOptions;
use ember_core::stream::ChatEvent;
use ember_core::tokens::TurnMetrics;
use ember_telemetry::MetricsRecorder;

use crate::error::EngineError;
use crate::transcript::Transcript;
use crate::turn::{TurnMachine, TurnPhase, TurnState};

/// Caller-supplied parameters for one prompt submission.
#[derive(Clone, Debug, Default)]
pub struct SendPromptParams {
    pub prompt: Option<String>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub options: Option<GenerationOptions>,
    pub think: bool,
    pub regenerate_message_id: Option<MessageId>,
}

impl SendPromptParams {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            ..Self::default()
        }
    }

    /// Re-derive an existing assistant reply. Reuses the persisted user
    /// prompt server-side; no optimistic row is synthesized.
    pub fn regenerate(message_id: MessageId) -> Self {
        Self {
            regenerate_message_id: Some(message_id),
            ..Self::default()
        }
    }
}

/// Result of a turn that ended in `Complete` or `Cancelled`.
#[derive(Clone, Debug)]
pub struct TurnReport {
    pub session_id: SessionId,
    pub turn_id: String,
    pub state: TurnState,
}

struct ActiveTurn {
    cancel: CancellationToken,
    machine: Arc<Mutex<TurnMachine>>,
}

pub struct SessionOrchestrator {
    gateway: Arc<dyn ChatGateway>,
    selected: RwLock<Option<SessionId>>,
    active: Arc<DashMap<SessionId, ActiveTurn>>,
    observers: DashMap<SessionId, watch::Receiver<TurnState>>,
    transcripts: DashMap<SessionId, Transcript>,
    last_metrics: RwLock<Option<TurnMetrics>>,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl SessionOrchestrator {
    pub fn new(gateway: Arc<dyn ChatGateway>) -> Self {
        Self {
            gateway,
            selected: RwLock::new(None),
            active: Arc::new(DashMap::new()),
            observers: DashMap::new(),
            transcripts: DashMap::new(),
            last_metrics: RwLock::new(None),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Make a session current for `send_prompt`/`cancel`. Switching while
    /// a turn is mid-flight does NOT cancel it; callers that want that
    /// must call [`cancel_session`](Self::cancel_session) explicitly.
    pub fn select_session(&self, session_id: SessionId) {
        *self.selected.write() = Some(session_id);
    }

    pub fn selected_session(&self) -> Option<SessionId> {
        *self.selected.read()
    }

    pub fn is_turn_active(&self, session_id: SessionId) -> bool {
        self.active.contains_key(&session_id)
    }

    /// Observable turn state for a session: the receiver for the current
    /// turn if one is running, otherwise for the most recent one.
    pub fn turn_state(&self, session_id: SessionId) -> Option<watch::Receiver<TurnState>> {
        self.observers.get(&session_id).map(|r| r.value().clone())
    }

    /// Point-in-time copy of the session's turn state.
    pub fn current_turn_state(&self, session_id: SessionId) -> TurnState {
        self.observers
            .get(&session_id)
            .map_or_else(TurnState::idle, |r| r.value().borrow().clone())
    }

    /// Current in-memory transcript rows for a session.
    pub fn transcript(&self, session_id: SessionId) -> Vec<MessageRow> {
        self.transcripts
            .get(&session_id)
            .map_or_else(Vec::new, |t| t.rows().to_vec())
    }

    /// Metrics snapshot of the most recently completed turn.
    pub fn last_metrics(&self) -> Option<TurnMetrics> {
        self.last_metrics.read().clone()
    }

    /// Submit a prompt (or a regeneration) on the selected session and
    /// drive it to a terminal phase. Fails synchronously, before any
    /// network I/O, when no session is selected, when the session already
    /// has an active turn, or when neither a prompt nor a regeneration id
    /// is given. Resolves `Ok` for completed and cancelled turns; error
    /// terminals propagate as `Err`.
    #[instrument(skip(self, params), fields(session_id = tracing::field::Empty))]
    pub async fn send_prompt(&self, params: SendPromptParams) -> Result<TurnReport, EngineError> {
        let session_id = self.selected_session().ok_or(EngineError::NoSessionSelected)?;
        tracing::Span::current().record("session_id", session_id.as_i64());

        let prompt = params
            .prompt
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(String::from);
        if prompt.is_none() && params.regenerate_message_id.is_none() {
            return Err(EngineError::EmptyPrompt);
        }

        // Claim the session's single turn slot. Overlapping prompts are
        // rejected here, before anything observable happens.
        let turn_id = uuid::Uuid::now_v7().to_string();
        let cancel = CancellationToken::new();
        let machine = match self.active.entry(session_id) {
            Entry::Occupied(_) => return Err(EngineError::TurnInProgress),
            Entry::Vacant(slot) => {
                let (machine, rx) = TurnMachine::begin(cancel.clone());
                let active = Arc::clone(&self.active);
                let machine = Arc::new(Mutex::new(machine.with_release(move || {
                    let _ = active.remove(&session_id);
                })));
                slot.insert(ActiveTurn {
                    cancel: cancel.clone(),
                    machine: Arc::clone(&machine),
                });
                let _ = self.observers.insert(session_id, rx);
                machine
            }
        };

        // Exactly one optimistic row per in-flight turn; regeneration
        // reuses the persisted user prompt and synthesizes nothing.
        if params.regenerate_message_id.is_none() {
            if let Some(prompt) = &prompt {
                let _ = self
                    .transcripts
                    .entry(session_id)
                    .or_insert_with(|| Transcript::new(session_id))
                    .push_placeholder(prompt, params.model.clone());
            }
        }

        let request = TurnRequest {
            session_id,
            prompt,
            model: params.model,
            system_prompt: params.system_prompt,
            options: params.options,
            think: params.think,
            regenerate_message_id: params.regenerate_message_id,
        };

        let terminal_error = self.drive_turn(&request, &machine, &cancel).await;
        let final_state = machine.lock().state().clone();
        self.record_outcome(&final_state);

        match final_state.phase {
            TurnPhase::Complete => {
                if let Some(metrics) = &final_state.metrics {
                    *self.last_metrics.write() = Some(metrics.clone());
                }
                self.reconcile(session_id).await;
                Ok(TurnReport {
                    session_id,
                    turn_id,
                    state: final_state,
                })
            }
            TurnPhase::Cancelled => Ok(TurnReport {
                session_id,
                turn_id,
                state: final_state,
            }),
            _ => {
                let error = terminal_error.unwrap_or_else(|| {
                    GatewayError::Generation(
                        final_state
                            .error_message
                            .clone()
                            .unwrap_or_else(|| "generation failed".into()),
                    )
                });
                Err(EngineError::Gateway(error))
            }
        }
    }

    /// Cancel the selected session's turn. Idempotent; returns false when
    /// nothing was active.
    pub fn cancel(&self) -> bool {
        match self.selected_session() {
            Some(session_id) => self.cancel_session(session_id),
            None => false,
        }
    }

    /// Cancel a specific session's turn. The state machine flips to
    /// `Cancelled` synchronously; the transport closes cooperatively and
    /// any frames that drain afterward are discarded unread.
    pub fn cancel_session(&self, session_id: SessionId) -> bool {
        let Some((_, turn)) = self.active.remove(&session_id) else {
            return false;
        };
        let flipped = turn.machine.lock().cancel();
        turn.cancel.cancel();
        flipped
    }

    /// Cancel every in-flight turn; returns how many were active.
    pub fn cancel_all(&self) -> usize {
        let sessions: Vec<SessionId> = self.active.iter().map(|e| *e.key()).collect();
        sessions
            .into_iter()
            .filter(|id| self.cancel_session(*id))
            .count()
    }

    /// Read frames to a terminal phase. Returns the gateway error behind
    /// an `Error` terminal, if that is how the turn ended.
    async fn drive_turn(
        &self,
        request: &TurnRequest,
        machine: &Arc<Mutex<TurnMachine>>,
        cancel: &CancellationToken,
    ) -> Option<GatewayError> {
        let mut stream = match self.gateway.stream_chat(request).await {
            Ok(stream) => stream,
            Err(error) => {
                if cancel.is_cancelled() {
                    let _ = machine.lock().cancel();
                    return None;
                }
                machine.lock().fail(&error);
                return Some(error);
            }
        };

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    // Usually already flipped by cancel_session; dropping
                    // the stream aborts the request either way.
                    let _ = machine.lock().cancel();
                    return None;
                }
                item = stream.next() => match item {
                    Some(Ok(event)) => {
                        let domain_error = match &event {
                            ChatEvent::Error { message } => {
                                Some(GatewayError::Generation(message.clone()))
                            }
                            _ => None,
                        };
                        let mut machine = machine.lock();
                        machine.apply(event);
                        if machine.phase().is_terminal() {
                            return match machine.phase() {
                                TurnPhase::Error => domain_error,
                                _ => None,
                            };
                        }
                    }
                    Some(Err(error)) => {
                        machine.lock().fail(&error);
                        return Some(error);
                    }
                    None => {
                        let error = GatewayError::StreamInterrupted(
                            "stream ended before completion".into(),
                        );
                        machine.lock().fail(&error);
                        return Some(error);
                    }
                }
            }
        }
    }

    /// Exactly one authoritative refetch per completed turn, replacing
    /// the in-memory transcript wholesale.
    async fn reconcile(&self, session_id: SessionId) {
        match self.gateway.fetch_messages(session_id).await {
            Ok(rows) => {
                self.transcripts
                    .entry(session_id)
                    .or_insert_with(|| Transcript::new(session_id))
                    .replace_all(rows);
            }
            Err(error) => {
                // The local rows stay visible; the next completed turn
                // refetches again.
                warn!(%error, session_id = session_id.as_i64(), "transcript refetch failed");
            }
        }
    }

    fn record_outcome(&self, state: &TurnState) {
        let Some(recorder) = &self.metrics else {
            return;
        };
        recorder.increment_counter("engine.turns", &[("outcome", state.phase.as_str())], 1);
        if let Some(metrics) = &state.metrics {
            if let Some(tps) = metrics.tokens_per_second {
                recorder.set_gauge("engine.tokens_per_second", &[], tps);
            }
            recorder.observe(
                "engine.completion_tokens",
                &[],
                metrics.completion_tokens as f64,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use ember_core::messages::MessageRole;
    use ember_gateway::mock::{MockGateway, MockTurn};

    fn server_row(id: i64, role: MessageRole, content: &str) -> MessageRow {
        MessageRow {
            id: MessageId::new(id),
            session_id: SessionId::new(1),
            role,
            content: content.into(),
            model: None,
            prompt_tokens: None,
            completion_tokens: None,
            total_tokens: None,
            metrics: serde_json::Map::new(),
            pinned: false,
            created_at: "2025-06-01T00:00:00Z".into(),
        }
    }

    fn orchestrator(turns: Vec<MockTurn>) -> (Arc<SessionOrchestrator>, Arc<MockGateway>) {
        let gateway = Arc::new(MockGateway::new(turns));
        let orch = Arc::new(SessionOrchestrator::new(
            Arc::clone(&gateway) as Arc<dyn ChatGateway>
        ));
        orch.select_session(SessionId::new(1));
        (orch, gateway)
    }

    /// Wait until the session's turn is observably streaming.
    async fn wait_for_streaming(orch: &SessionOrchestrator, session_id: SessionId) {
        for _ in 0..100 {
            if orch.current_turn_state(session_id).phase == TurnPhase::Streaming {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("turn never reached streaming");
    }

    #[tokio::test]
    async fn completed_turn_reports_content_and_metrics() {
        let (orch, gateway) = orchestrator(vec![MockTurn::streaming_text(&["Hel", "Hello"], 3, 2)]);
        gateway.push_fetch_result(Ok(vec![
            server_row(1, MessageRole::User, "hi"),
            server_row(2, MessageRole::Assistant, "Hello"),
        ]));

        let report = orch
            .send_prompt(SendPromptParams::text("hi"))
            .await
            .unwrap();

        assert_eq!(report.state.phase, TurnPhase::Complete);
        assert_eq!(report.state.content, "Hello");
        let metrics = report.state.metrics.unwrap();
        assert_eq!(
            (metrics.prompt_tokens, metrics.completion_tokens, metrics.total_tokens),
            (3, 2, 5)
        );
        assert_eq!(orch.last_metrics().unwrap().total_tokens, 5);

        // Reconciliation: exactly one refetch, wholesale replacement.
        assert_eq!(gateway.fetch_calls(), 1);
        let transcript = orch.transcript(SessionId::new(1));
        assert_eq!(transcript.len(), 2);
        assert!(transcript.iter().all(|row| !row.is_placeholder()));

        // Slot released.
        assert!(!orch.is_turn_active(SessionId::new(1)));
    }

    #[tokio::test]
    async fn overlapping_prompt_rejected_synchronously() {
        let (orch, _gateway) = orchestrator(vec![
            MockTurn::EventsThenHang(vec![ChatEvent::Status {
                message: "stream-started".into(),
            }]),
            MockTurn::streaming_text(&["ok"], 1, 1),
        ]);

        let first = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.send_prompt(SendPromptParams::text("first")).await })
        };
        wait_for_streaming(&orch, SessionId::new(1)).await;

        let second = orch.send_prompt(SendPromptParams::text("second")).await;
        match second {
            Err(EngineError::TurnInProgress) => {}
            other => panic!("expected TurnInProgress, got {other:?}"),
        }
        assert_eq!(
            EngineError::TurnInProgress.to_string(),
            "stream already in progress"
        );

        // The first turn is unaffected: still active, still streaming.
        assert!(orch.is_turn_active(SessionId::new(1)));
        assert_eq!(
            orch.current_turn_state(SessionId::new(1)).phase,
            TurnPhase::Streaming
        );

        assert!(orch.cancel());
        let report = first.await.unwrap().unwrap();
        assert_eq!(report.state.phase, TurnPhase::Cancelled);

        // Slot free again: the second scripted turn runs to completion.
        let report = orch.send_prompt(SendPromptParams::text("third")).await.unwrap();
        assert_eq!(report.state.phase, TurnPhase::Complete);
    }

    #[tokio::test]
    async fn early_error_preserves_draft() {
        let (orch, gateway) = orchestrator(vec![MockTurn::domain_error("model not found")]);

        let result = orch.send_prompt(SendPromptParams::text("draft prompt")).await;
        match result {
            Err(EngineError::Gateway(GatewayError::Generation(message))) => {
                assert_eq!(message, "model not found");
            }
            other => panic!("expected Generation error, got {other:?}"),
        }

        let state = orch.current_turn_state(SessionId::new(1));
        assert_eq!(state.phase, TurnPhase::Error);
        assert_eq!(state.error_message.as_deref(), Some("model not found"));
        assert!(state.content.is_empty());

        // No refetch, draft still visible.
        assert_eq!(gateway.fetch_calls(), 0);
        let transcript = orch.transcript(SessionId::new(1));
        assert_eq!(transcript.len(), 1);
        assert!(transcript[0].is_placeholder());
        assert_eq!(transcript[0].content, "draft prompt");
    }

    #[tokio::test]
    async fn cancel_mid_stream_keeps_draft_and_frees_slot() {
        let (orch, gateway) = orchestrator(vec![MockTurn::EventsThenHang(vec![
            ChatEvent::Status {
                message: "stream-started".into(),
            },
            ChatEvent::Chunk {
                content: "partial answer".into(),
                thinking: None,
            },
        ])]);

        let task = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.send_prompt(SendPromptParams::text("stop me")).await })
        };
        wait_for_streaming(&orch, SessionId::new(1)).await;

        assert!(orch.cancel());
        let report = task.await.unwrap().unwrap();
        assert_eq!(report.state.phase, TurnPhase::Cancelled);
        assert!(report.state.error_message.is_none());

        assert!(!orch.is_turn_active(SessionId::new(1)));
        assert_eq!(gateway.fetch_calls(), 0);
        assert!(orch.transcript(SessionId::new(1))[0].is_placeholder());
    }

    #[tokio::test]
    async fn cancel_after_terminal_is_noop() {
        let (orch, _gateway) = orchestrator(vec![MockTurn::streaming_text(&["done"], 1, 1)]);
        let _ = orch.send_prompt(SendPromptParams::text("hi")).await.unwrap();

        assert!(!orch.cancel());
        assert_eq!(
            orch.current_turn_state(SessionId::new(1)).phase,
            TurnPhase::Complete
        );
    }

    #[tokio::test]
    async fn cancel_without_active_turn_is_noop() {
        let (orch, _gateway) = orchestrator(vec![]);
        assert!(!orch.cancel());
        assert!(!orch.cancel_session(SessionId::new(77)));
        assert_eq!(orch.cancel_all(), 0);
    }

    #[tokio::test]
    async fn rejects_when_no_session_selected() {
        let gateway = Arc::new(MockGateway::new(vec![]));
        let orch = SessionOrchestrator::new(gateway as Arc<dyn ChatGateway>);
        let result = orch.send_prompt(SendPromptParams::text("hi")).await;
        assert!(matches!(result, Err(EngineError::NoSessionSelected)));
    }

    #[tokio::test]
    async fn rejects_empty_prompt_without_regeneration() {
        let (orch, gateway) = orchestrator(vec![]);
        for params in [
            SendPromptParams::default(),
            SendPromptParams::text(""),
            SendPromptParams::text("   \n\t"),
        ] {
            let result = orch.send_prompt(params).await;
            assert!(matches!(result, Err(EngineError::EmptyPrompt)));
        }
        // Validation happened before any I/O.
        assert_eq!(gateway.stream_calls(), 0);
        assert!(orch.transcript(SessionId::new(1)).is_empty());
    }

    #[tokio::test]
    async fn regeneration_synthesizes_no_placeholder() {
        let (orch, gateway) = orchestrator(vec![MockTurn::EventsThenHang(vec![
            ChatEvent::Chunk {
                content: "regenerated".into(),
                thinking: None,
            },
        ])]);

        let task = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move {
                orch.send_prompt(SendPromptParams::regenerate(MessageId::new(8)))
                    .await
            })
        };
        wait_for_streaming(&orch, SessionId::new(1)).await;

        assert!(orch.transcript(SessionId::new(1)).is_empty());
        assert!(orch.cancel());
        let report = task.await.unwrap().unwrap();
        assert_eq!(report.state.phase, TurnPhase::Cancelled);
        drop(gateway);
    }

    #[tokio::test]
    async fn full_replacement_after_stale_placeholders() {
        let (orch, gateway) = orchestrator(vec![
            MockTurn::domain_error("first failure"),
            MockTurn::streaming_text(&["ok"], 1, 1),
        ]);

        // Failed turn leaves its placeholder behind.
        let _ = orch.send_prompt(SendPromptParams::text("first")).await;
        assert_eq!(orch.transcript(SessionId::new(1)).len(), 1);

        // Completed turn replaces everything with the N authoritative rows.
        gateway.push_fetch_result(Ok(vec![
            server_row(1, MessageRole::User, "first"),
            server_row(2, MessageRole::User, "second"),
            server_row(3, MessageRole::Assistant, "ok"),
        ]));
        let _ = orch.send_prompt(SendPromptParams::text("second")).await.unwrap();

        let transcript = orch.transcript(SessionId::new(1));
        assert_eq!(transcript.len(), 3);
        assert!(transcript.iter().all(|row| !row.is_placeholder()));
        assert_eq!(gateway.fetch_calls(), 1);
    }

    #[tokio::test]
    async fn transport_error_mid_stream_becomes_error_terminal() {
        let (orch, _gateway) = orchestrator(vec![MockTurn::Results(vec![
            Ok(ChatEvent::Chunk {
                content: "part".into(),
                thinking: None,
            }),
            Err(GatewayError::StreamInterrupted("connection reset".into())),
        ])]);

        let result = orch.send_prompt(SendPromptParams::text("hi")).await;
        match result {
            Err(EngineError::Gateway(GatewayError::StreamInterrupted(msg))) => {
                assert!(msg.contains("connection reset"));
            }
            other => panic!("expected StreamInterrupted, got {other:?}"),
        }
        let state = orch.current_turn_state(SessionId::new(1));
        assert_eq!(state.phase, TurnPhase::Error);
        assert_eq!(state.content, "part");
    }

    #[tokio::test]
    async fn connect_failure_becomes_error_terminal() {
        let (orch, _gateway) = orchestrator(vec![MockTurn::ConnectError(GatewayError::Network(
            "connection refused".into(),
        ))]);
        let result = orch.send_prompt(SendPromptParams::text("hi")).await;
        assert!(matches!(
            result,
            Err(EngineError::Gateway(GatewayError::Network(_)))
        ));
        assert!(!orch.is_turn_active(SessionId::new(1)));
    }

    #[tokio::test]
    async fn stream_ending_without_completion_is_an_error() {
        let (orch, _gateway) = orchestrator(vec![MockTurn::Events(vec![ChatEvent::Status {
            message: "stream-started".into(),
        }])]);
        let result = orch.send_prompt(SendPromptParams::text("hi")).await;
        match result {
            Err(EngineError::Gateway(GatewayError::StreamInterrupted(msg))) => {
                assert!(msg.contains("before completion"));
            }
            other => panic!("expected StreamInterrupted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn turns_on_distinct_sessions_run_concurrently() {
        let (orch, gateway) = orchestrator(vec![
            MockTurn::EventsThenHang(vec![ChatEvent::Heartbeat]),
            MockTurn::streaming_text(&["done"], 1, 1),
        ]);

        // Session 1 hangs mid-turn.
        let hung = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.send_prompt(SendPromptParams::text("slow")).await })
        };
        wait_for_streaming(&orch, SessionId::new(1)).await;

        // Switching the selection does not cancel session 1's turn.
        orch.select_session(SessionId::new(2));
        assert!(orch.is_turn_active(SessionId::new(1)));

        let report = orch.send_prompt(SendPromptParams::text("fast")).await.unwrap();
        assert_eq!(report.state.phase, TurnPhase::Complete);
        assert_eq!(report.session_id, SessionId::new(2));

        // Session 1 is still mid-flight and needs an explicit cancel.
        assert!(orch.is_turn_active(SessionId::new(1)));
        assert!(orch.cancel_session(SessionId::new(1)));
        let report = hung.await.unwrap().unwrap();
        assert_eq!(report.state.phase, TurnPhase::Cancelled);
        assert_eq!(gateway.stream_calls(), 2);
    }

    #[tokio::test]
    async fn cancel_all_sweeps_every_session() {
        let (orch, _gateway) = orchestrator(vec![
            MockTurn::EventsThenHang(vec![ChatEvent::Heartbeat]),
            MockTurn::EventsThenHang(vec![ChatEvent::Heartbeat]),
        ]);

        let first = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.send_prompt(SendPromptParams::text("one")).await })
        };
        wait_for_streaming(&orch, SessionId::new(1)).await;

        orch.select_session(SessionId::new(2));
        let second = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.send_prompt(SendPromptParams::text("two")).await })
        };
        wait_for_streaming(&orch, SessionId::new(2)).await;

        assert_eq!(orch.cancel_all(), 2);
        assert_eq!(first.await.unwrap().unwrap().state.phase, TurnPhase::Cancelled);
        assert_eq!(second.await.unwrap().unwrap().state.phase, TurnPhase::Cancelled);
    }

    #[tokio::test]
    async fn refetch_failure_keeps_local_rows() {
        let (orch, gateway) = orchestrator(vec![MockTurn::streaming_text(&["ok"], 1, 1)]);
        gateway.push_fetch_result(Err(GatewayError::Network("refetch down".into())));

        // The turn itself still resolves Ok.
        let report = orch.send_prompt(SendPromptParams::text("hi")).await.unwrap();
        assert_eq!(report.state.phase, TurnPhase::Complete);

        // The optimistic row stays visible until a later refetch succeeds.
        let transcript = orch.transcript(SessionId::new(1));
        assert_eq!(transcript.len(), 1);
        assert!(transcript[0].is_placeholder());
    }

    #[tokio::test]
    async fn outcome_counters_recorded() {
        let recorder = Arc::new(MetricsRecorder::new());
        let gateway = Arc::new(MockGateway::new(vec![MockTurn::streaming_text(
            &["ok"],
            2,
            4,
        )]));
        let orch = SessionOrchestrator::new(gateway as Arc<dyn ChatGateway>)
            .with_metrics(Arc::clone(&recorder));
        orch.select_session(SessionId::new(1));

        let _ = orch.send_prompt(SendPromptParams::text("hi")).await.unwrap();
        assert_eq!(
            recorder.counter_value("engine.turns", &[("outcome", "complete")]),
            1
        );
        assert_eq!(
            recorder.histogram_summary("engine.completion_tokens", &[]).count,
            1
        );
    }
}
