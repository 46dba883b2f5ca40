//! Routes decoded server messages to the state model and phase machine.
//!
//! The dispatcher owns one agent's [`GameState`] and [`PhaseMachine`] and is
//! the only code that mutates them. It takes `&mut self`, so messages are
//! processed strictly one at a time in arrival order.

use std::sync::Arc;

use econ_types::{AgentIndex, GameEvent, PhaseId, ServerMessage};
use serde_json::Value;
use tracing::debug;

use crate::config::AgentConfig;
use crate::observer::{Lifecycle, Observer};
use crate::phase::{PhaseError, PhaseMachine, Transition};
use crate::state::{AppliedEvent, GameState, StateValidationError};

/// Errors raised while dispatching one message. None of them stop the agent.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The frame is not a valid server message.
    #[error("undecodable message: {source}")]
    Decode {
        /// The JSON error.
        #[from]
        source: serde_json::Error,
    },

    /// The event did not fit the state schema and was skipped.
    #[error("event '{event_type}' rejected: {source}")]
    State {
        /// Type of the skipped event.
        event_type: String,
        /// The validation failure.
        source: StateValidationError,
    },

    /// A phase-transition event carried no usable phase id.
    #[error("event '{event_type}' has no valid phase id under '{key}'")]
    MissingPhaseId {
        /// Type of the offending event.
        event_type: String,
        /// Key that was expected to hold the id.
        key: String,
    },

    /// The phase machine refused the transition.
    #[error("phase transition refused: {source}")]
    Phase {
        /// The phase error.
        #[from]
        source: PhaseError,
    },
}

/// What a dispatched message did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    /// An ordinary event updated the state.
    Updated(AppliedEvent),
    /// A phase-transition event moved the phase machine.
    PhaseEntered(Transition),
    /// The game-over event ended the game.
    GameOver {
        /// Phase that was active when the game ended.
        last_phase: Option<PhaseId>,
    },
    /// The server sent an error message.
    ServerError(String),
    /// A message type the client does not act on.
    Ignored,
}

/// Per-agent message router.
pub struct Dispatcher {
    agent: AgentIndex,
    state: GameState,
    phases: PhaseMachine,
    phase_transition_event: String,
    phase_identifier_key: String,
    game_over_event: String,
    observer: Arc<dyn Observer>,
}

impl core::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("agent", &self.agent)
            .field("state", &self.state)
            .field("phases", &self.phases)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Build a dispatcher over a fresh state and phase machine.
    pub fn new(
        agent: AgentIndex,
        state: GameState,
        phases: PhaseMachine,
        config: &AgentConfig,
        observer: Arc<dyn Observer>,
    ) -> Self {
        Self {
            agent,
            state,
            phases,
            phase_transition_event: config.phase_transition_event.clone(),
            phase_identifier_key: config.phase_identifier_key.clone(),
            game_over_event: config.game_over_event.clone(),
            observer,
        }
    }

    /// Decode a raw text frame and dispatch it.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Decode`] for malformed frames, otherwise as
    /// [`Dispatcher::dispatch_message`].
    pub fn dispatch(&mut self, raw: &str) -> Result<Dispatched, DispatchError> {
        let message = ServerMessage::decode(raw)?;
        self.dispatch_message(message)
    }

    /// Dispatch an already decoded message.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] if the event fails validation or carries a
    /// bad phase id. The state is unchanged in that case.
    pub fn dispatch_message(&mut self, message: ServerMessage) -> Result<Dispatched, DispatchError> {
        match message {
            ServerMessage::Event(event) => self.dispatch_event(&event),
            ServerMessage::Error { message } => {
                debug!(agent = %self.agent, reason = %message, "Server error message");
                Ok(Dispatched::ServerError(message))
            }
            ServerMessage::Other => Ok(Dispatched::Ignored),
        }
    }

    fn dispatch_event(&mut self, event: &GameEvent) -> Result<Dispatched, DispatchError> {
        self.observer.notify(
            self.agent,
            &Lifecycle::EventReceived {
                event_type: event.event_type.clone(),
            },
        );

        // Read the phase id before touching state so a bad transition leaves
        // nothing half-applied.
        let is_transition = event.event_type == self.phase_transition_event;
        let next_phase = if is_transition {
            Some(self.phase_id(event)?)
        } else {
            None
        };
        if let Some(id) = next_phase
            && self.phases.is_ended()
        {
            return Err(PhaseError::Ended { attempted: id }.into());
        }

        let applied = self
            .state
            .apply(event)
            .map_err(|source| DispatchError::State {
                event_type: event.event_type.clone(),
                source,
            })?;

        if event.event_type == self.game_over_event {
            let last_phase = self.phases.end();
            if let Some(phase) = last_phase {
                self.observer
                    .notify(self.agent, &Lifecycle::PhaseExited { phase });
            }
            return Ok(Dispatched::GameOver { last_phase });
        }

        if let Some(id) = next_phase {
            let transition = self.phases.enter_phase(id)?;
            if !transition.is_repeat {
                if let Some(phase) = transition.from {
                    self.observer
                        .notify(self.agent, &Lifecycle::PhaseExited { phase });
                }
                self.observer
                    .notify(self.agent, &Lifecycle::PhaseEntered(transition));
            }
            return Ok(Dispatched::PhaseEntered(transition));
        }

        Ok(Dispatched::Updated(applied))
    }

    fn phase_id(&self, event: &GameEvent) -> Result<PhaseId, DispatchError> {
        event
            .data
            .get(&self.phase_identifier_key)
            .and_then(Value::as_u64)
            .and_then(|id| u32::try_from(id).ok())
            .map(PhaseId)
            .ok_or_else(|| DispatchError::MissingPhaseId {
                event_type: event.event_type.clone(),
                key: self.phase_identifier_key.clone(),
            })
    }

    /// The agent's state.
    pub const fn state(&self) -> &GameState {
        &self.state
    }

    /// The agent's phase machine.
    pub const fn phases(&self) -> &PhaseMachine {
        &self.phases
    }
}
