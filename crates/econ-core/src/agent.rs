//! Per-agent control loop.
//!
//! An [`AgentManager`] joins the game, then runs a single loop that races
//! three things inside one task:
//!
//! ```text
//! session.receive()  --> dispatch --> phase change? --> start/cancel work
//! pending decision   --> submit action (continuous: re-arm timer)
//! continuous timer   --> request a decision
//! ```
//!
//! Only one message is dispatched at a time. A phase change or the end of
//! the game drops the pending decision and the continuous timer, so a stale
//! action is never submitted.
//!
//! Events also run the registered [`EventHandlers`]; the actions they return
//! and the configured automatic replies are sent after the event is
//! processed. A server `error` counts as a rejection only while the last
//! submitted action has not been followed by any event.

use std::sync::Arc;
use std::time::Duration;

use econ_types::{
    Action, AgentIndex, AgentOutcome, AgentReport, FailureReason, GameEvent, GameId, LoginPayload,
    PhaseId, ServerMessage,
};
use futures::future::{BoxFuture, OptionFuture};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::decision::{Decider, DecisionError, DecisionRequest};
use crate::dispatch::{Dispatched, Dispatcher};
use crate::handlers::{EventContext, EventHandlers, Stage};
use crate::observer::{Lifecycle, Observer};
use crate::phase::{PhaseMachine, PhasePolicy};
use crate::session::{Connector, Session, SessionError};
use crate::state::{GameState, StateSchema};

type PendingDecision = BoxFuture<'static, Result<Option<Action>, DecisionError>>;

/// Runs one agent from join to game over.
pub struct AgentManager<C: Connector, D: Decider> {
    index: AgentIndex,
    login: LoginPayload,
    connector: Arc<C>,
    config: Arc<AgentConfig>,
    schema: Arc<StateSchema>,
    decider: Arc<D>,
    observer: Arc<dyn Observer>,
    handlers: Arc<EventHandlers>,
}

impl<C: Connector, D: Decider> core::fmt::Debug for AgentManager<C, D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AgentManager")
            .field("index", &self.index)
            .field("game_id", &self.login.game_id)
            .finish_non_exhaustive()
    }
}

impl<C: Connector, D: Decider> AgentManager<C, D> {
    /// Assemble an agent. Nothing happens until [`AgentManager::run`].
    pub fn new(
        index: AgentIndex,
        login: LoginPayload,
        connector: Arc<C>,
        config: Arc<AgentConfig>,
        schema: Arc<StateSchema>,
        decider: Arc<D>,
        observer: Arc<dyn Observer>,
    ) -> Self {
        Self {
            index,
            login,
            connector,
            config,
            schema,
            decider,
            observer,
            handlers: Arc::new(EventHandlers::new()),
        }
    }

    /// React to events with `handlers`.
    #[must_use]
    pub fn with_handlers(mut self, handlers: Arc<EventHandlers>) -> Self {
        self.handlers = handlers;
        self
    }

    /// Play until the game ends or the session fails permanently.
    ///
    /// Never returns an error: every failure becomes the report's outcome.
    /// The session is closed on every path.
    pub async fn run(self) -> AgentReport {
        let game_id = self.login.game_id;
        info!(agent = %self.index, game_id = %game_id, "Agent starting");

        let session = Session::connect(
            self.index,
            Arc::clone(&self.connector),
            self.login.clone(),
            self.config.retry,
        )
        .await;
        let mut session = match session {
            Ok(session) => session,
            Err(err) => {
                let outcome = AgentOutcome::Failed(failure_reason(&err));
                return self.finish(outcome, Vec::new(), 0);
            }
        };
        self.observer.notify(self.index, &Lifecycle::Connected);

        let dispatcher = Dispatcher::new(
            self.index,
            GameState::new(Arc::clone(&self.schema), game_id),
            PhaseMachine::from_config(&self.config),
            &self.config,
            Arc::clone(&self.observer),
        );
        let mut run = AgentRun {
            index: self.index,
            game_id,
            config: Arc::clone(&self.config),
            decider: Arc::clone(&self.decider),
            observer: Arc::clone(&self.observer),
            handlers: Arc::clone(&self.handlers),
            dispatcher,
            pending: None,
            pending_phase: None,
            next_tick: None,
            rejection: None,
            action_outstanding: false,
            actions_submitted: 0,
            rng: StdRng::from_os_rng(),
        };

        let outcome = run.drive(&mut session).await;
        session.close().await;

        let phases = run.dispatcher.phases().history().to_vec();
        self.finish(outcome, phases, run.actions_submitted)
    }

    fn finish(
        &self,
        outcome: AgentOutcome,
        phases: Vec<PhaseId>,
        actions_submitted: u32,
    ) -> AgentReport {
        match &outcome {
            AgentOutcome::Completed => {
                self.observer.notify(self.index, &Lifecycle::AgentCompleted);
            }
            AgentOutcome::Failed(reason) => self.observer.notify(
                self.index,
                &Lifecycle::AgentFailed {
                    reason: reason.clone(),
                },
            ),
        }
        info!(
            agent = %self.index,
            outcome = %outcome,
            actions = actions_submitted,
            phases = phases.len(),
            "Agent finished"
        );
        AgentReport {
            agent: self.index,
            outcome,
            phases,
            actions_submitted,
        }
    }
}

/// Mutable state of one running agent.
struct AgentRun<D: Decider> {
    index: AgentIndex,
    game_id: GameId,
    config: Arc<AgentConfig>,
    decider: Arc<D>,
    observer: Arc<dyn Observer>,
    handlers: Arc<EventHandlers>,
    dispatcher: Dispatcher,
    pending: Option<PendingDecision>,
    pending_phase: Option<PhaseId>,
    next_tick: Option<Instant>,
    rejection: Option<String>,
    action_outstanding: bool,
    actions_submitted: u32,
    rng: StdRng,
}

impl<D: Decider> AgentRun<D> {
    async fn drive<C: Connector>(&mut self, session: &mut Session<C>) -> AgentOutcome {
        if let Some(phase) = self.dispatcher.phases().current() {
            self.start_phase(phase);
        }

        loop {
            let deadline = self.next_tick;
            tokio::select! {
                biased;

                received = session.receive() => match received {
                    Ok(message) => {
                        if let Some(outcome) = self.on_message(session, message).await {
                            return outcome;
                        }
                    }
                    Err(err) => return AgentOutcome::Failed(failure_reason(&err)),
                },

                Some(result) = OptionFuture::from(self.pending.as_mut()), if self.pending.is_some() => {
                    self.pending = None;
                    if let Err(err) = self.on_decision(session, result).await {
                        return AgentOutcome::Failed(failure_reason(&err));
                    }
                }

                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.next_tick = None;
                    self.request_decision();
                }
            }
        }
    }

    async fn on_message<C: Connector>(
        &mut self,
        session: &mut Session<C>,
        message: ServerMessage,
    ) -> Option<AgentOutcome> {
        let event_type = message.event_type().map(str::to_owned);
        let event = match &message {
            ServerMessage::Event(event) => {
                // Any event after a submission means the action was accepted.
                self.action_outstanding = false;
                (!self.handlers.is_empty()).then(|| event.clone())
            }
            ServerMessage::Error { .. } | ServerMessage::Other => None,
        };
        let mut outbound = event
            .as_ref()
            .map(|event| self.run_handlers(Stage::Pre, event))
            .unwrap_or_default();

        let dispatched = self.dispatcher.dispatch_message(message);
        let applied = dispatched.is_ok();
        match dispatched {
            Ok(Dispatched::GameOver { last_phase }) => {
                self.cancel_work();
                if let Some(event) = &event {
                    let late = self.run_handlers(Stage::Handle, event).len().saturating_add(
                        self.run_handlers(Stage::Post, event).len(),
                    );
                    if late > 0 || !outbound.is_empty() {
                        debug!(agent = %self.index, "Handler actions after game over not sent");
                    }
                }
                info!(
                    agent = %self.index,
                    last_phase = ?last_phase.map(PhaseId::into_inner),
                    "Game over"
                );
                return Some(AgentOutcome::Completed);
            }
            Ok(Dispatched::PhaseEntered(transition)) if !transition.is_repeat => {
                self.cancel_work();
                self.start_phase(transition.to);
            }
            Ok(Dispatched::ServerError(reason)) => self.on_server_error(reason),
            Ok(Dispatched::PhaseEntered(_) | Dispatched::Updated(_) | Dispatched::Ignored) => {}
            Err(err) => warn!(agent = %self.index, error = %err, "Message skipped"),
        }

        if applied && let Some(event) = &event {
            outbound.extend(self.run_handlers(Stage::Handle, event));
            outbound.extend(self.run_handlers(Stage::Post, event));
        }
        if let Some(reply) = event_type
            .as_deref()
            .and_then(|kind| self.config.event_replies.get(kind))
        {
            outbound.insert(0, Action::new(reply.clone(), self.game_id));
        }

        for action in outbound {
            if let Err(err) = session.send(&action).await {
                return Some(AgentOutcome::Failed(failure_reason(&err)));
            }
            debug!(agent = %self.index, action = %action.kind, "Event response sent");
        }
        None
    }

    fn run_handlers(&self, stage: Stage, event: &GameEvent) -> Vec<Action> {
        let context = EventContext {
            agent: self.index,
            game_id: self.game_id,
            phase: self.dispatcher.phases().current(),
            event,
            state: self.dispatcher.state(),
        };
        self.handlers.run(stage, &context)
    }

    fn on_server_error(&mut self, reason: String) {
        if self.action_outstanding {
            self.action_outstanding = false;
            self.observer.notify(
                self.index,
                &Lifecycle::ActionRejected {
                    message: reason.clone(),
                },
            );
            self.rejection = Some(reason);
        } else {
            warn!(agent = %self.index, reason = %reason, "Server error with no outstanding action");
        }
    }

    async fn on_decision<C: Connector>(
        &mut self,
        session: &mut Session<C>,
        result: Result<Option<Action>, DecisionError>,
    ) -> Result<(), SessionError> {
        let phase = self.pending_phase.take();
        match result {
            Ok(Some(action)) => {
                session.send(&action).await?;
                self.actions_submitted = self.actions_submitted.saturating_add(1);
                self.action_outstanding = true;
                self.observer
                    .notify(self.index, &Lifecycle::ActionSubmitted { phase, action });
            }
            Ok(None) => debug!(agent = %self.index, "Decider passed"),
            Err(err) => warn!(agent = %self.index, error = %err, "Decision failed, skipping turn"),
        }

        if let Some(phase) = phase
            && self.dispatcher.phases().current() == Some(phase)
            && self.dispatcher.phases().policy(phase) == PhasePolicy::Continuous
        {
            self.schedule_tick();
        }
        Ok(())
    }

    fn start_phase(&mut self, phase: PhaseId) {
        let phases = self.dispatcher.phases();
        if !phases.requires_action(phase) {
            debug!(agent = %self.index, phase = %phase, "No action required in phase");
            return;
        }
        match phases.policy(phase) {
            PhasePolicy::TurnBased => self.request_decision(),
            PhasePolicy::Continuous => self.schedule_tick(),
        }
    }

    fn request_decision(&mut self) {
        let phases = self.dispatcher.phases();
        let Some(phase) = phases.current() else {
            return;
        };
        let request = DecisionRequest {
            agent: self.index,
            game_id: self.game_id,
            phase,
            policy: phases.policy(phase),
            snapshot: self.dispatcher.state().snapshot(),
            rejection: self.rejection.take(),
        };
        let decider = Arc::clone(&self.decider);
        let deadline = self.config.decision_timeout();
        self.pending = Some(Box::pin(async move {
            let decision = decider.decide(&request);
            match deadline {
                Some(limit) => tokio::time::timeout(limit, decision)
                    .await
                    .unwrap_or_else(|_elapsed| {
                        Err(DecisionError::Timeout {
                            deadline_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                        })
                    }),
                None => decision.await,
            }
        }));
        self.pending_phase = Some(phase);
        debug!(agent = %self.index, phase = %phase, "Decision requested");
    }

    fn schedule_tick(&mut self) {
        let delay = self.draw_delay();
        self.next_tick = Instant::now().checked_add(delay);
    }

    fn draw_delay(&mut self) -> Duration {
        let min = self.config.min_action_delay();
        let max = self.config.max_action_delay();
        if max <= min {
            min
        } else {
            self.rng.random_range(min..=max)
        }
    }

    fn cancel_work(&mut self) {
        if self.pending.take().is_some() {
            debug!(agent = %self.index, "Pending decision cancelled");
        }
        self.pending_phase = None;
        self.next_tick = None;
    }
}

fn failure_reason(err: &SessionError) -> FailureReason {
    match err {
        SessionError::Auth { message } => FailureReason::AuthRejected {
            message: message.clone(),
        },
        SessionError::Connection { .. }
        | SessionError::RetriesExhausted { .. }
        | SessionError::Closed => FailureReason::ConnectionLost {
            message: err.to_string(),
        },
        SessionError::Encode { .. } => FailureReason::Protocol {
            message: err.to_string(),
        },
    }
}
