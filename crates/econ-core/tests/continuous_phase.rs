//! Continuous phases: timer-driven decisions at randomized intervals.

#![allow(clippy::unwrap_used)]

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use econ_core::config::{AgentConfig, GameRunnerConfig};
use econ_core::game::{GameRunner, credentials};
use econ_core::observer::NoOpObserver;
use econ_core::phase::PhasePolicy;
use econ_core::session::MemoryConnector;
use econ_types::{AgentOutcome, GameId, PhaseId};
use serde_json::json;
use tokio::time::{Instant, timeout_at};

use common::{RecordingDecider, event, expect_join, expect_silence};

fn continuous_config(min_ms: u64, max_ms: u64) -> AgentConfig {
    AgentConfig {
        continuous_phases: BTreeSet::from([PhaseId(1)]),
        action_phases: BTreeSet::from([PhaseId(1)]),
        min_action_delay_ms: min_ms,
        max_action_delay_ms: max_ms,
        ..common::config()
    }
}

#[tokio::test(start_paused = true)]
async fn acts_repeatedly_within_delay_bounds() {
    let (connector, mut server) = MemoryConnector::new();
    let decider = Arc::new(RecordingDecider::acting("trade"));
    let runner = GameRunner::new(
        Arc::new(connector),
        Arc::new(continuous_config(5_000, 10_000)),
        common::schema("phase"),
        Arc::clone(&decider),
        Arc::new(NoOpObserver),
        GameRunnerConfig::default(),
    );
    let game = tokio::spawn(async move {
        runner.run_game(credentials(GameId(1), ["code-a"])).await
    });

    let mut peer = server.accept().await.unwrap();
    expect_join(&mut peer).await;
    let started = Instant::now();
    peer.send_json(&event("phase-transition", json!({"phase": 1})));

    let until = started.checked_add(Duration::from_millis(30_500)).unwrap();
    let mut actions = Vec::new();
    while let Ok(Some(action)) = timeout_at(until, peer.recv_json()).await {
        actions.push(action);
    }
    assert!(
        (3..=6).contains(&actions.len()),
        "expected 3 to 6 actions in 30.5s, got {}",
        actions.len()
    );
    for action in &actions {
        assert_eq!(action, &json!({"type": "trade", "gameId": 1, "phase": 1}));
    }

    // Phase 2 needs no action, so the timer must not fire again.
    peer.send_json(&event("phase-transition", json!({"phase": 2})));
    expect_silence(&mut peer, Duration::from_secs(30)).await;
    peer.send_json(&event("game-over", json!({})));

    let report = game.await.unwrap();
    let agent = report.agents.first().unwrap();
    assert_eq!(agent.outcome, AgentOutcome::Completed);
    assert_eq!(usize::try_from(agent.actions_submitted).unwrap(), actions.len());

    let calls = decider.calls();
    assert_eq!(calls.len(), actions.len());
    let mut previous = started;
    for (at, request) in &calls {
        assert_eq!(request.policy, PhasePolicy::Continuous);
        let gap = at.duration_since(previous);
        assert!(gap >= Duration::from_secs(5), "gap too short: {gap:?}");
        assert!(gap < Duration::from_secs(11), "gap too long: {gap:?}");
        previous = *at;
    }
}

#[tokio::test(start_paused = true)]
async fn timer_keeps_running_when_decider_passes() {
    let (connector, mut server) = MemoryConnector::new();
    let decider = Arc::new(RecordingDecider::passing());
    let runner = GameRunner::new(
        Arc::new(connector),
        Arc::new(continuous_config(1_000, 1_000)),
        common::schema("phase"),
        Arc::clone(&decider),
        Arc::new(NoOpObserver),
        GameRunnerConfig::default(),
    );
    let game = tokio::spawn(async move {
        runner.run_game(credentials(GameId(1), ["code-a"])).await
    });

    let mut peer = server.accept().await.unwrap();
    expect_join(&mut peer).await;
    peer.send_json(&event("phase-transition", json!({"phase": 1})));
    expect_silence(&mut peer, Duration::from_millis(5_500)).await;
    peer.send_json(&event("game-over", json!({})));

    let report = game.await.unwrap();
    assert_eq!(report.agents.first().unwrap().actions_submitted, 0);
    assert_eq!(decider.calls().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn game_over_drops_decision_in_flight() {
    let (connector, mut server) = MemoryConnector::new();
    let decider = Arc::new(RecordingDecider::acting("trade").with_delay(Duration::from_secs(10)));
    let runner = GameRunner::new(
        Arc::new(connector),
        Arc::new(continuous_config(1_000, 1_000)),
        common::schema("phase"),
        Arc::clone(&decider),
        Arc::new(NoOpObserver),
        GameRunnerConfig::default(),
    );
    let game = tokio::spawn(async move {
        runner.run_game(credentials(GameId(1), ["code-a"])).await
    });

    let mut peer = server.accept().await.unwrap();
    expect_join(&mut peer).await;
    peer.send_json(&event("phase-transition", json!({"phase": 1})));
    tokio::time::sleep(Duration::from_secs(3)).await;
    peer.send_json(&event("game-over", json!({})));

    let report = game.await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.agents.first().unwrap().actions_submitted, 0);
    assert_eq!(decider.calls().len(), 1);
    // The client closed the link without sending the stale action.
    assert_eq!(peer.recv().await, None);
}
