//! Lifecycle notifications for the observability sink.
//!
//! Agents report what they do through an [`Observer`]. The observer is
//! shared by every agent of a game, so implementations take `&self` and
//! must be safe to call from many tasks.

use econ_types::{Action, AgentIndex, FailureReason, PhaseId};
use tracing::{debug, info, warn};

use crate::phase::Transition;

/// One notification from an agent.
#[derive(Debug, Clone, PartialEq)]
pub enum Lifecycle {
    /// The session joined the game.
    Connected,
    /// An event arrived from the server.
    EventReceived {
        /// The event's type.
        event_type: String,
    },
    /// A phase was entered.
    PhaseEntered(Transition),
    /// A phase was left, either for another phase or the end of the game.
    PhaseExited {
        /// The phase that ended.
        phase: PhaseId,
    },
    /// An action was sent to the server.
    ActionSubmitted {
        /// Phase the action was decided in.
        phase: Option<PhaseId>,
        /// The action sent.
        action: Action,
    },
    /// The server answered an outstanding action with an error.
    ActionRejected {
        /// Server-provided reason.
        message: String,
    },
    /// The agent stopped early.
    AgentFailed {
        /// Why it stopped.
        reason: FailureReason,
    },
    /// The agent observed the end of the game.
    AgentCompleted,
}

/// A sink for agent lifecycle notifications.
pub trait Observer: Send + Sync {
    /// Receive one notification from agent `agent`.
    fn notify(&self, agent: AgentIndex, event: &Lifecycle);
}

/// An observer that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpObserver;

impl Observer for NoOpObserver {
    fn notify(&self, _agent: AgentIndex, _event: &Lifecycle) {}
}

/// An observer that forwards notifications to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn notify(&self, agent: AgentIndex, event: &Lifecycle) {
        match event {
            Lifecycle::Connected => info!(agent = %agent, "Joined game"),
            Lifecycle::EventReceived { event_type } => {
                debug!(agent = %agent, event_type = %event_type, "Event received");
            }
            Lifecycle::PhaseEntered(t) => info!(
                agent = %agent,
                phase = %t.to,
                policy = %t.policy,
                reset = t.is_reset,
                "Phase entered"
            ),
            Lifecycle::PhaseExited { phase } => {
                debug!(agent = %agent, phase = %phase, "Phase exited");
            }
            Lifecycle::ActionSubmitted { phase, action } => info!(
                agent = %agent,
                phase = ?phase.map(PhaseId::into_inner),
                action = %action.kind,
                "Action submitted"
            ),
            Lifecycle::ActionRejected { message } => {
                warn!(agent = %agent, reason = %message, "Action rejected by server");
            }
            Lifecycle::AgentFailed { reason } => {
                warn!(agent = %agent, reason = %reason, "Agent failed");
            }
            Lifecycle::AgentCompleted => info!(agent = %agent, "Agent completed"),
        }
    }
}
