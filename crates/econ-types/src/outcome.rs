//! Terminal outcomes of agents and the aggregate game report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AgentIndex, GameId, PhaseId};

/// Why an agent stopped before the game ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The server rejected the recovery credential during join.
    AuthRejected {
        /// Server-provided reason.
        message: String,
    },
    /// The connection dropped and could not be re-established.
    ConnectionLost {
        /// Description of the last connection failure.
        message: String,
    },
    /// The game runner's overall deadline expired while the agent was running.
    Timeout,
    /// The agent task panicked or was aborted unexpectedly.
    Panicked {
        /// Panic or join error description.
        message: String,
    },
    /// The agent could not continue because of a local protocol failure
    /// (for example an action that could not be encoded).
    Protocol {
        /// Description of the failure.
        message: String,
    },
}

impl core::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::AuthRejected { message } => write!(f, "authentication rejected: {message}"),
            Self::ConnectionLost { message } => write!(f, "connection lost: {message}"),
            Self::Timeout => write!(f, "game timeout"),
            Self::Panicked { message } => write!(f, "agent task failed: {message}"),
            Self::Protocol { message } => write!(f, "protocol error: {message}"),
        }
    }
}

/// Terminal result of one agent's run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum AgentOutcome {
    /// The agent observed the end of the game.
    Completed,
    /// The agent stopped early.
    Failed(FailureReason),
}

impl AgentOutcome {
    /// Whether the agent reached the end of the game.
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// The failure reason, if any.
    pub const fn failure(&self) -> Option<&FailureReason> {
        match self {
            Self::Completed => None,
            Self::Failed(reason) => Some(reason),
        }
    }
}

impl core::fmt::Display for AgentOutcome {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}

/// Per-agent entry of a [`GameReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentReport {
    /// Position of the agent in the credential list (1-based).
    pub agent: AgentIndex,
    /// How the agent finished.
    pub outcome: AgentOutcome,
    /// Phase ids the agent entered, in order.
    pub phases: Vec<PhaseId>,
    /// Number of actions submitted to the server.
    pub actions_submitted: u32,
}

/// Aggregate result of one game run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameReport {
    /// The game that was played.
    pub game_id: GameId,
    /// One entry per agent, in credential order.
    pub agents: Vec<AgentReport>,
    /// When the runner started the agents.
    pub started_at: DateTime<Utc>,
    /// When the last agent finished.
    pub finished_at: DateTime<Utc>,
}

impl GameReport {
    /// A game is successful only if every agent completed.
    pub fn is_success(&self) -> bool {
        self.agents.iter().all(|a| a.outcome.is_completed())
    }

    /// Agents that did not complete, with their reasons.
    pub fn failures(&self) -> impl Iterator<Item = (AgentIndex, &FailureReason)> {
        self.agents
            .iter()
            .filter_map(|a| a.outcome.failure().map(|reason| (a.agent, reason)))
    }

    /// Number of agents that completed.
    pub fn completed_count(&self) -> usize {
        self.agents
            .iter()
            .filter(|a| a.outcome.is_completed())
            .count()
    }
}
