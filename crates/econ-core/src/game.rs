//! Runs every agent of one game concurrently and collects their outcomes.
//!
//! Each agent runs on its own tokio task inside a [`JoinSet`]. Agents share
//! nothing mutable: the connector, schema, configuration, decider, and
//! observer are handed out as `Arc`s. A failing or panicking agent is
//! recorded and the others keep playing. An optional overall deadline aborts
//! whatever is still running when it expires.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use econ_types::{AgentIndex, AgentOutcome, AgentReport, FailureReason, GameId, GameReport, LoginPayload};
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::{Instant, timeout_at};
use tracing::{error, info, warn};

use crate::agent::AgentManager;
use crate::config::{AgentConfig, GameRunnerConfig};
use crate::decision::Decider;
use crate::handlers::EventHandlers;
use crate::observer::{Lifecycle, Observer};
use crate::session::Connector;
use crate::state::StateSchema;

/// Orchestrates the agents of one game.
pub struct GameRunner<C: Connector, D: Decider> {
    connector: Arc<C>,
    config: Arc<AgentConfig>,
    schema: Arc<StateSchema>,
    decider: Arc<D>,
    observer: Arc<dyn Observer>,
    handlers: Arc<EventHandlers>,
    runner: GameRunnerConfig,
}

impl<C: Connector, D: Decider> core::fmt::Debug for GameRunner<C, D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GameRunner")
            .field("config", &self.config)
            .field("handlers", &self.handlers)
            .field("runner", &self.runner)
            .finish_non_exhaustive()
    }
}

impl<C: Connector, D: Decider> GameRunner<C, D> {
    /// Build a runner sharing one connector, schema, decider, and observer.
    pub fn new(
        connector: Arc<C>,
        config: Arc<AgentConfig>,
        schema: Arc<StateSchema>,
        decider: Arc<D>,
        observer: Arc<dyn Observer>,
        runner: GameRunnerConfig,
    ) -> Self {
        Self {
            connector,
            config,
            schema,
            decider,
            observer,
            handlers: Arc::new(EventHandlers::new()),
            runner,
        }
    }

    /// Give every agent the same event handlers.
    #[must_use]
    pub fn with_handlers(mut self, handlers: EventHandlers) -> Self {
        self.handlers = Arc::new(handlers);
        self
    }

    /// Run one agent per credential until all have finished.
    ///
    /// Agents are numbered from 1 in credential order; the report lists them
    /// in that order. The game id is taken from the first credential.
    pub async fn run_game(&self, credentials: Vec<LoginPayload>) -> GameReport {
        let game_id = credentials
            .first()
            .map(|login| login.game_id)
            .unwrap_or_default();
        let started_at = Utc::now();
        info!(
            game_id = %game_id,
            agents = credentials.len(),
            max_game_duration_ms = ?self.runner.max_game_duration_ms,
            "Game starting"
        );

        let mut tasks = JoinSet::new();
        let mut indices: HashMap<Id, AgentIndex> = HashMap::new();
        let mut reports: BTreeMap<AgentIndex, AgentReport> = BTreeMap::new();
        let mut order = Vec::with_capacity(credentials.len());

        for (position, login) in credentials.into_iter().enumerate() {
            let index = AgentIndex(position.saturating_add(1));
            let manager = AgentManager::new(
                index,
                login,
                Arc::clone(&self.connector),
                Arc::clone(&self.config),
                Arc::clone(&self.schema),
                Arc::clone(&self.decider),
                Arc::clone(&self.observer),
            )
            .with_handlers(Arc::clone(&self.handlers));
            let handle = tasks.spawn(manager.run());
            indices.insert(handle.id(), index);
            order.push(index);
        }

        let deadline = self
            .runner
            .max_game_duration()
            .and_then(|limit| Instant::now().checked_add(limit));

        loop {
            let next = match deadline {
                Some(deadline) => match timeout_at(deadline, tasks.join_next_with_id()).await {
                    Ok(next) => next,
                    Err(_elapsed) => {
                        warn!(
                            game_id = %game_id,
                            still_running = tasks.len(),
                            "Game deadline reached, aborting remaining agents"
                        );
                        tasks.abort_all();
                        self.drain_aborted(&mut tasks, &indices, &mut reports).await;
                        break;
                    }
                },
                None => tasks.join_next_with_id().await,
            };
            match next {
                None => break,
                Some(Ok((_, report))) => {
                    reports.insert(report.agent, report);
                }
                Some(Err(err)) => {
                    if let Some(index) = indices.get(&err.id()).copied() {
                        reports.insert(index, self.crashed(index, &err));
                    }
                }
            }
        }

        let agents: Vec<AgentReport> = order
            .into_iter()
            .map(|index| {
                reports
                    .remove(&index)
                    .unwrap_or_else(|| self.failed(index, FailureReason::Timeout))
            })
            .collect();
        let report = GameReport {
            game_id,
            agents,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            game_id = %game_id,
            completed = report.completed_count(),
            agents = report.agents.len(),
            success = report.is_success(),
            "Game finished"
        );
        report
    }

    async fn drain_aborted(
        &self,
        tasks: &mut JoinSet<AgentReport>,
        indices: &HashMap<Id, AgentIndex>,
        reports: &mut BTreeMap<AgentIndex, AgentReport>,
    ) {
        while let Some(next) = tasks.join_next_with_id().await {
            match next {
                // Finished between the deadline and the abort.
                Ok((_, report)) => {
                    reports.insert(report.agent, report);
                }
                Err(err) if err.is_cancelled() => {
                    if let Some(index) = indices.get(&err.id()).copied() {
                        reports.insert(index, self.failed(index, FailureReason::Timeout));
                    }
                }
                Err(err) => {
                    if let Some(index) = indices.get(&err.id()).copied() {
                        reports.insert(index, self.crashed(index, &err));
                    }
                }
            }
        }
    }

    fn crashed(&self, index: AgentIndex, err: &JoinError) -> AgentReport {
        error!(agent = %index, error = %err, "Agent task failed");
        let message = if err.is_panic() {
            "agent task panicked".to_owned()
        } else {
            err.to_string()
        };
        self.failed(index, FailureReason::Panicked { message })
    }

    /// Report for an agent whose task did not return its own report.
    fn failed(&self, index: AgentIndex, reason: FailureReason) -> AgentReport {
        self.observer.notify(
            index,
            &Lifecycle::AgentFailed {
                reason: reason.clone(),
            },
        );
        AgentReport {
            agent: index,
            outcome: AgentOutcome::Failed(reason),
            phases: Vec::new(),
            actions_submitted: 0,
        }
    }
}

/// Convenience for building join payloads for one game.
pub fn credentials<I, S>(game_id: GameId, recovery_codes: I) -> Vec<LoginPayload>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    recovery_codes
        .into_iter()
        .map(|code| LoginPayload::join(game_id, code))
        .collect()
}
