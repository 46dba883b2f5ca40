//! Decision collaborator trait and simple implementations.
//!
//! When a phase calls for an action, the agent hands the collaborator a
//! [`DecisionRequest`] (a snapshot of its state plus phase context) and
//! awaits an optional [`Action`]. The collaborator could be a language-model
//! pipeline, a scripted bot, or a test stub; the agent only sees this trait.
//!
//! Failures are never fatal: the agent logs them and skips the turn.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use econ_types::{Action, AgentIndex, GameId, PhaseId};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::phase::PhasePolicy;
use crate::state::StateSnapshot;

/// Errors a decision collaborator may report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecisionError {
    /// The collaborator did not answer in time.
    #[error("decision timed out after {deadline_ms}ms")]
    Timeout {
        /// The deadline in milliseconds.
        deadline_ms: u64,
    },

    /// An internal error in the collaborator.
    #[error("decision source error: {message}")]
    Internal {
        /// Description of the error.
        message: String,
    },
}

/// Everything the collaborator gets to decide on.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionRequest {
    /// The asking agent.
    pub agent: AgentIndex,
    /// The game being played.
    pub game_id: GameId,
    /// The phase the action is for.
    pub phase: PhaseId,
    /// How the phase advances.
    pub policy: PhasePolicy,
    /// The agent's state at the time of asking.
    pub snapshot: StateSnapshot,
    /// Server reason if the previous action was rejected.
    pub rejection: Option<String>,
}

/// A source of agent actions.
pub trait Decider: Send + Sync + 'static {
    /// Produce the action for `request`, or `None` to pass.
    ///
    /// # Errors
    ///
    /// Returns [`DecisionError`] if no decision could be produced. The agent
    /// treats this as passing.
    fn decide(
        &self,
        request: &DecisionRequest,
    ) -> impl Future<Output = Result<Option<Action>, DecisionError>> + Send;
}

/// A decider that always passes.
#[derive(Debug, Clone, Copy, Default)]
pub struct StubDecider;

impl StubDecider {
    /// Create a new stub decider.
    pub const fn new() -> Self {
        Self
    }
}

impl Decider for StubDecider {
    async fn decide(&self, _request: &DecisionRequest) -> Result<Option<Action>, DecisionError> {
        Ok(None)
    }
}

/// Message type and fields of a scripted action.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ActionTemplate {
    /// Outbound message type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Fixed fields sent with the action.
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl ActionTemplate {
    /// A template with no extra fields.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: Map::new(),
        }
    }

    /// Add a fixed field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Instantiate the template for one game.
    pub fn build(&self, game_id: GameId) -> Action {
        Action {
            kind: self.kind.clone(),
            game_id,
            fields: self.fields.clone(),
        }
    }
}

/// A decider that answers each phase with a fixed action.
///
/// Phases without a template fall back to `default`, and pass if there is
/// none.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDecider {
    by_phase: BTreeMap<PhaseId, ActionTemplate>,
    default: Option<ActionTemplate>,
}

impl ScriptedDecider {
    /// A decider with no scripted actions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `phase` with `template`.
    #[must_use]
    pub fn on_phase(mut self, phase: PhaseId, template: ActionTemplate) -> Self {
        self.by_phase.insert(phase, template);
        self
    }

    /// Answer unscripted phases with `template`.
    #[must_use]
    pub fn otherwise(mut self, template: ActionTemplate) -> Self {
        self.default = Some(template);
        self
    }

    fn template(&self, phase: PhaseId) -> Option<&ActionTemplate> {
        self.by_phase.get(&phase).or(self.default.as_ref())
    }
}

impl Decider for ScriptedDecider {
    async fn decide(&self, request: &DecisionRequest) -> Result<Option<Action>, DecisionError> {
        Ok(self
            .template(request.phase)
            .map(|t| t.build(request.game_id)))
    }
}

/// A synchronous decision for one phase.
pub type PhaseHandlerFn =
    Arc<dyn Fn(&DecisionRequest) -> Result<Option<Action>, DecisionError> + Send + Sync>;

/// A decider that routes each phase to a registered closure and asks
/// `fallback` for every other phase.
pub struct PhaseHandlers<D: Decider> {
    by_phase: BTreeMap<PhaseId, PhaseHandlerFn>,
    fallback: D,
}

impl<D: Decider> core::fmt::Debug for PhaseHandlers<D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PhaseHandlers")
            .field("phases", &self.by_phase.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl<D: Decider> PhaseHandlers<D> {
    /// Route nothing yet; every phase goes to `fallback`.
    pub const fn new(fallback: D) -> Self {
        Self {
            by_phase: BTreeMap::new(),
            fallback,
        }
    }

    /// Decide `phase` with `f`. A later registration for the same phase
    /// replaces the earlier one.
    #[must_use]
    pub fn on_phase<F>(mut self, phase: PhaseId, f: F) -> Self
    where
        F: Fn(&DecisionRequest) -> Result<Option<Action>, DecisionError> + Send + Sync + 'static,
    {
        self.by_phase.insert(phase, Arc::new(f));
        self
    }
}

impl<D: Decider> Decider for PhaseHandlers<D> {
    async fn decide(&self, request: &DecisionRequest) -> Result<Option<Action>, DecisionError> {
        match self.by_phase.get(&request.phase) {
            Some(handler) => handler(request),
            None => self.fallback.decide(request).await,
        }
    }
}
