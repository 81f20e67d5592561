//! # ember-core
//!
//! Foundation types for the Ember chat client engine.
//!
//! This crate provides the shared vocabulary the other Ember crates depend on:
//!
//! - **Row IDs**: [`ids::SessionId`], [`ids::MessageId`] integer newtypes
//! - **Messages**: [`messages::MessageRow`] mirroring the server's persisted rows
//! - **Stream events**: [`stream::ChatEvent`], one per decoded wire frame
//! - **Token metrics**: [`tokens::TurnMetrics`] per-turn snapshot
//! - **Options**: [`options::GenerationOptions`] request overrides
//! - **Errors**: [`errors::GatewayError`] transport/domain taxonomy
//! - **Gateway seam**: [`gateway::ChatGateway`] trait between engine and transport
//!
//! Foundation crate. Depended on by all other ember crates.

pub mod errors;
pub mod gateway;
pub mod ids;
pub mod messages;
pub mod options;
pub mod stream;
pub mod tokens;
