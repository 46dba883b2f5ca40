//! Caller-registered reactions to server events.
//!
//! An [`EventHandlers`] registry holds closures keyed by event type, plus
//! global ones, in three stages:
//!
//! ```text
//! Pre     global, then per type     sees the state before the event
//! Handle  global, then per type     sees the state after the event
//! Post    per type, then global     sees the state after the event
//! ```
//!
//! Every closure may return actions; the agent sends them in registration
//! order once the event is processed. A failing closure is logged and the
//! remaining ones still run. Handle and Post closures are skipped for events
//! the state rejected.

use std::collections::BTreeMap;
use std::sync::Arc;

use econ_types::{Action, AgentIndex, GameEvent, GameId, PhaseId};
use tracing::warn;

use crate::state::GameState;

/// When a handler runs relative to the state update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Before the event is applied.
    Pre,
    /// After the event is applied.
    Handle,
    /// After every `Handle` closure.
    Post,
}

impl core::fmt::Display for Stage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Pre => write!(f, "pre"),
            Self::Handle => write!(f, "handle"),
            Self::Post => write!(f, "post"),
        }
    }
}

/// What a handler gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct EventContext<'a> {
    /// The receiving agent.
    pub agent: AgentIndex,
    /// The game being played.
    pub game_id: GameId,
    /// The agent's current phase.
    pub phase: Option<PhaseId>,
    /// The event being handled.
    pub event: &'a GameEvent,
    /// The agent's state, before or after the event depending on the stage.
    pub state: &'a GameState,
}

/// A handler failure. Logged, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    /// Description of the failure.
    pub message: String,
}

impl HandlerError {
    /// Build an error from any displayable cause.
    pub fn new(cause: impl core::fmt::Display) -> Self {
        Self {
            message: cause.to_string(),
        }
    }
}

/// A registered event handler.
pub type HandlerFn =
    Arc<dyn Fn(&EventContext<'_>) -> Result<Vec<Action>, HandlerError> + Send + Sync>;

#[derive(Clone, Default)]
struct StageHandlers {
    global: Vec<HandlerFn>,
    by_event: BTreeMap<String, Vec<HandlerFn>>,
}

impl StageHandlers {
    fn len(&self) -> usize {
        self.by_event
            .values()
            .map(Vec::len)
            .fold(self.global.len(), usize::saturating_add)
    }
}

/// Registry of event handlers shared by every agent of a game.
#[derive(Clone, Default)]
pub struct EventHandlers {
    pre: StageHandlers,
    handle: StageHandlers,
    post: StageHandlers,
}

impl core::fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventHandlers")
            .field("pre", &self.pre.len())
            .field("handle", &self.handle.len())
            .field("post", &self.post.len())
            .finish()
    }
}

impl EventHandlers {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `f` for events of type `event_type` at `stage`.
    #[must_use]
    pub fn on_event<F>(mut self, stage: Stage, event_type: impl Into<String>, f: F) -> Self
    where
        F: Fn(&EventContext<'_>) -> Result<Vec<Action>, HandlerError> + Send + Sync + 'static,
    {
        self.stage_mut(stage)
            .by_event
            .entry(event_type.into())
            .or_default()
            .push(Arc::new(f));
        self
    }

    /// Register `f` for every event at `stage`.
    #[must_use]
    pub fn on_any<F>(mut self, stage: Stage, f: F) -> Self
    where
        F: Fn(&EventContext<'_>) -> Result<Vec<Action>, HandlerError> + Send + Sync + 'static,
    {
        self.stage_mut(stage).global.push(Arc::new(f));
        self
    }

    /// Drop the handlers of `stage` registered for `event_type`, or the
    /// global ones when `event_type` is `None`.
    pub fn clear(&mut self, stage: Stage, event_type: Option<&str>) {
        let handlers = self.stage_mut(stage);
        match event_type {
            Some(event_type) => {
                handlers.by_event.remove(event_type);
            }
            None => handlers.global.clear(),
        }
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.pre.len() == 0 && self.handle.len() == 0 && self.post.len() == 0
    }

    /// Run the handlers of `stage` for the context's event and collect the
    /// actions they return.
    pub fn run(&self, stage: Stage, context: &EventContext<'_>) -> Vec<Action> {
        let handlers = self.stage(stage);
        let specific = handlers
            .by_event
            .get(&context.event.event_type)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let ordered: Vec<&HandlerFn> = match stage {
            Stage::Pre | Stage::Handle => handlers.global.iter().chain(specific).collect(),
            Stage::Post => specific.iter().chain(&handlers.global).collect(),
        };

        let mut actions = Vec::new();
        for handler in ordered {
            match handler(context) {
                Ok(produced) => actions.extend(produced),
                Err(err) => warn!(
                    agent = %context.agent,
                    stage = %stage,
                    event_type = %context.event.event_type,
                    error = %err,
                    "Event handler failed"
                ),
            }
        }
        actions
    }

    const fn stage(&self, stage: Stage) -> &StageHandlers {
        match stage {
            Stage::Pre => &self.pre,
            Stage::Handle => &self.handle,
            Stage::Post => &self.post,
        }
    }

    const fn stage_mut(&mut self, stage: Stage) -> &mut StageHandlers {
        match stage {
            Stage::Pre => &mut self.pre,
            Stage::Handle => &mut self.handle,
            Stage::Post => &mut self.post,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::state::StateSchema;

    fn tagged(
        tag: &'static str,
    ) -> impl Fn(&EventContext<'_>) -> Result<Vec<Action>, HandlerError> + Send + Sync + 'static {
        move |ctx| Ok(vec![Action::new(tag, ctx.game_id)])
    }

    fn run(handlers: &EventHandlers, stage: Stage, event_type: &str) -> Vec<String> {
        let schema = Arc::new(StateSchema::builder("phase").build().unwrap());
        let state = GameState::new(schema, GameId(2));
        let event = GameEvent::new(event_type, json!({}));
        let context = EventContext {
            agent: AgentIndex(1),
            game_id: GameId(2),
            phase: None,
            event: &event,
            state: &state,
        };
        handlers
            .run(stage, &context)
            .into_iter()
            .map(|action| action.kind)
            .collect()
    }

    #[test]
    fn global_handlers_wrap_specific_ones() {
        let handlers = EventHandlers::new()
            .on_event(Stage::Pre, "offer", tagged("pre-offer"))
            .on_any(Stage::Pre, tagged("pre-any"))
            .on_event(Stage::Handle, "offer", tagged("offer"))
            .on_any(Stage::Handle, tagged("any"))
            .on_any(Stage::Post, tagged("post-any"))
            .on_event(Stage::Post, "offer", tagged("post-offer"));

        assert_eq!(run(&handlers, Stage::Pre, "offer"), vec!["pre-any", "pre-offer"]);
        assert_eq!(run(&handlers, Stage::Handle, "offer"), vec!["any", "offer"]);
        assert_eq!(run(&handlers, Stage::Post, "offer"), vec!["post-offer", "post-any"]);
        assert_eq!(run(&handlers, Stage::Handle, "bid"), vec!["any"]);
    }

    #[test]
    fn failing_handler_does_not_stop_the_rest() {
        let handlers = EventHandlers::new()
            .on_event(Stage::Handle, "offer", |_ctx: &EventContext<'_>| {
                Err(HandlerError::new("boom"))
            })
            .on_event(Stage::Handle, "offer", tagged("accept"));
        assert_eq!(run(&handlers, Stage::Handle, "offer"), vec!["accept"]);
    }

    #[test]
    fn clear_removes_one_slot() {
        let mut handlers = EventHandlers::new()
            .on_event(Stage::Handle, "offer", tagged("offer"))
            .on_any(Stage::Handle, tagged("any"));
        assert!(!handlers.is_empty());

        handlers.clear(Stage::Handle, Some("offer"));
        assert_eq!(run(&handlers, Stage::Handle, "offer"), vec!["any"]);
        handlers.clear(Stage::Handle, None);
        assert!(handlers.is_empty());
    }
}
