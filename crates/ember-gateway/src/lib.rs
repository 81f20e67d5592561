//! HTTP gateway to the chat server: the wire-level frame decoder, the
//! stream event interpreter, the streaming chat call, and the plain REST
//! collaborator surface.

pub mod api;
pub mod client;
pub mod events;
pub mod sse;

pub mod mock;

pub use api::{MessagePage, ModelInfo, ServerConfig, ServerHealth, SessionSummary};
pub use client::{EventStream, HttpGateway};
pub use events::{interpret, Decoded};
pub use sse::FrameDecoder;
