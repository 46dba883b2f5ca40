//! Phase state machine.
//!
//! Tracks which phase (round) the agent is in and which advancement policy
//! governs it. The server is authoritative: any phase id it announces is
//! accepted, including a lower one (a reset). Only the terminal
//! [`PhaseState::Ended`] refuses further transitions.

use std::collections::BTreeSet;

use econ_types::PhaseId;

use crate::config::AgentConfig;

/// Errors raised by phase transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PhaseError {
    /// The game is over; no phase can be entered.
    #[error("game has ended, cannot enter phase {attempted}")]
    Ended {
        /// The phase the server tried to start.
        attempted: PhaseId,
    },
}

/// How a phase advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhasePolicy {
    /// The agent acts at most once, on entry.
    TurnBased,
    /// The agent acts repeatedly after random delays until the phase ends.
    Continuous,
}

impl core::fmt::Display for PhasePolicy {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::TurnBased => write!(f, "turn-based"),
            Self::Continuous => write!(f, "continuous"),
        }
    }
}

/// Where the machine is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseState {
    /// No phase has been announced yet.
    NotStarted,
    /// Inside the given phase.
    Active(PhaseId),
    /// The game is over.
    Ended,
}

/// Result of a successful [`PhaseMachine::enter_phase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Phase left, if any.
    pub from: Option<PhaseId>,
    /// Phase entered.
    pub to: PhaseId,
    /// Policy of the entered phase.
    pub policy: PhasePolicy,
    /// The server moved to a lower phase id.
    pub is_reset: bool,
    /// The server re-announced the current phase.
    pub is_repeat: bool,
}

/// Phase tracking for one agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseMachine {
    state: PhaseState,
    continuous: BTreeSet<PhaseId>,
    action_phases: BTreeSet<PhaseId>,
    history: Vec<PhaseId>,
}

impl PhaseMachine {
    /// Build a machine from explicit phase sets, not started.
    pub const fn new(continuous: BTreeSet<PhaseId>, action_phases: BTreeSet<PhaseId>) -> Self {
        Self {
            state: PhaseState::NotStarted,
            continuous,
            action_phases,
            history: Vec::new(),
        }
    }

    /// Build a machine from agent configuration, honoring `initial_phase`.
    pub fn from_config(config: &AgentConfig) -> Self {
        let mut machine = Self::new(
            config.continuous_phases.clone(),
            config.action_phases.clone(),
        );
        if let Some(initial) = config.initial_phase {
            machine.state = PhaseState::Active(initial);
            machine.history.push(initial);
        }
        machine
    }

    /// Current state.
    pub const fn state(&self) -> PhaseState {
        self.state
    }

    /// Current phase, if one is active.
    pub const fn current(&self) -> Option<PhaseId> {
        match self.state {
            PhaseState::Active(id) => Some(id),
            PhaseState::NotStarted | PhaseState::Ended => None,
        }
    }

    /// Whether the game is over.
    pub const fn is_ended(&self) -> bool {
        matches!(self.state, PhaseState::Ended)
    }

    /// Policy for a phase id.
    pub fn policy(&self, id: PhaseId) -> PhasePolicy {
        if self.continuous.contains(&id) {
            PhasePolicy::Continuous
        } else {
            PhasePolicy::TurnBased
        }
    }

    /// Whether the decision collaborator is consulted in phase `id`.
    pub fn requires_action(&self, id: PhaseId) -> bool {
        self.action_phases.is_empty() || self.action_phases.contains(&id)
    }

    /// Enter the phase the server announced.
    ///
    /// A repeat of the current phase is reported with `is_repeat` and not
    /// recorded again in the history.
    ///
    /// # Errors
    ///
    /// Returns [`PhaseError::Ended`] once the game is over.
    pub fn enter_phase(&mut self, id: PhaseId) -> Result<Transition, PhaseError> {
        let from = match self.state {
            PhaseState::Ended => return Err(PhaseError::Ended { attempted: id }),
            PhaseState::NotStarted => None,
            PhaseState::Active(current) => Some(current),
        };
        let is_repeat = from == Some(id);
        let is_reset = from.is_some_and(|current| id < current);
        self.state = PhaseState::Active(id);
        if !is_repeat {
            self.history.push(id);
        }
        Ok(Transition {
            from,
            to: id,
            policy: self.policy(id),
            is_reset,
            is_repeat,
        })
    }

    /// Enter the terminal state. Returns the phase that was active, if any.
    /// Calling it again has no effect.
    pub const fn end(&mut self) -> Option<PhaseId> {
        let exited = self.current();
        self.state = PhaseState::Ended;
        exited
    }

    /// Phase ids entered so far, in order, without repeats.
    pub fn history(&self) -> &[PhaseId] {
        &self.history
    }
}
