//! The streaming chat-turn engine: turn state machine, transcript
//! reconciliation, and the session orchestrator that drives one prompt
//! submission from wire frames to a terminal phase.

pub mod error;
pub mod orchestrator;
pub mod transcript;
pub mod turn;

pub use error::EngineError;
pub use orchestrator::{SendPromptParams, SessionOrchestrator, TurnReport};
pub use transcript::Transcript;
pub use turn::{TurnMachine, TurnPhase, TurnState};
