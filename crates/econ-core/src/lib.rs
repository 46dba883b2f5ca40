//! Game client core for econ-agents: state, phases, sessions, and orchestration.
//!
//! Each agent keeps a layered view of the game (meta, private, public),
//! updated from server-pushed events, and is driven through a sequence of
//! phases until the game ends. Many agents run concurrently under one
//! [`GameRunner`], each with its own connection and isolated failures.
//!
//! ```text
//! server --> Session --> Dispatcher --> GameState / PhaseMachine
//!                                          |
//!                         Decider <--------+--> Session --> server
//! ```
//!
//! # Modules
//!
//! - [`state`] -- Field schema and the layered [`GameState`].
//! - [`dispatch`] -- Routes server messages into state and phase updates.
//! - [`phase`] -- Phase state machine with turn-based and continuous policies.
//! - [`session`] -- Join, receive, send, and reconnect over a [`Connector`].
//! - [`decision`] -- [`Decider`] trait with stub and scripted implementations.
//! - [`handlers`] -- Caller-registered reactions to server events.
//! - [`observer`] -- Lifecycle notifications and the tracing observer.
//! - [`agent`] -- The per-agent control loop.
//! - [`game`] -- Concurrent game runner and report.
//! - [`config`] -- Agent and runner configuration.
//!
//! [`GameRunner`]: game::GameRunner
//! [`GameState`]: state::GameState
//! [`Connector`]: session::Connector
//! [`Decider`]: decision::Decider

pub mod agent;
pub mod config;
pub mod decision;
pub mod dispatch;
pub mod game;
pub mod handlers;
pub mod observer;
pub mod phase;
pub mod session;
pub mod state;
