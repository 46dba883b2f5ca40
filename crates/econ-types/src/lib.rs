//! Shared type definitions for the econ-agents game client.
//!
//! This crate holds the types that cross crate boundaries: the identifiers
//! used on the wire, the server and client message shapes, and the outcome
//! types reported by the game runner.
//!
//! # Modules
//!
//! - [`ids`] -- Integer newtypes for games, phases, and agents
//! - [`messages`] -- Server events/errors, client actions, join payload
//! - [`outcome`] -- Per-agent outcomes and the aggregate game report

pub mod ids;
pub mod messages;
pub mod outcome;

// Re-export all public types at crate root for convenience.
pub use ids::{AgentIndex, GameId, PhaseId};
pub use messages::{Action, GameEvent, JOIN_MESSAGE_TYPE, LoginPayload, ServerMessage};
pub use outcome::{AgentOutcome, AgentReport, FailureReason, GameReport};
