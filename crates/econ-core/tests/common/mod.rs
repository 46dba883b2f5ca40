//! Shared fixtures for the integration tests: a recording decider, a
//! recording observer, and helpers for playing the server over memory links.

#![allow(clippy::unwrap_used, clippy::missing_const_for_fn, dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use econ_core::config::{AgentConfig, RetryPolicy};
use econ_core::decision::{Decider, DecisionError, DecisionRequest};
use econ_core::observer::{Lifecycle, Observer};
use econ_core::session::MemoryPeer;
use econ_core::state::{FieldKind, FieldSpec, StateSchema};
use econ_types::{Action, AgentIndex};
use serde_json::{Value, json};
use tokio::time::Instant;

/// Decider that records every request and answers with a fixed action type.
///
/// The action carries the phase it was decided for under `"phase"`.
pub struct RecordingDecider {
    kind: Option<String>,
    delay: Duration,
    calls: Mutex<Vec<(Instant, DecisionRequest)>>,
}

impl RecordingDecider {
    /// Answer every request with an action of type `kind`.
    pub fn acting(kind: &str) -> Self {
        Self {
            kind: Some(kind.to_owned()),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Never act.
    pub fn passing() -> Self {
        Self {
            kind: None,
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Take `delay` to answer.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Requests seen so far, with the time they arrived.
    pub fn calls(&self) -> Vec<(Instant, DecisionRequest)> {
        self.calls.lock().unwrap().clone()
    }
}

impl Decider for RecordingDecider {
    async fn decide(&self, request: &DecisionRequest) -> Result<Option<Action>, DecisionError> {
        {
            let mut calls = self.calls.lock().unwrap();
            calls.push((Instant::now(), request.clone()));
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.kind.as_ref().map(|kind| {
            Action::new(kind.clone(), request.game_id)
                .with_field("phase", request.phase.into_inner())
        }))
    }
}

/// Observer that keeps every notification.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<(AgentIndex, Lifecycle)>>,
}

impl RecordingObserver {
    /// Notifications seen so far.
    pub fn events(&self) -> Vec<(AgentIndex, Lifecycle)> {
        self.events.lock().unwrap().clone()
    }
}

impl Observer for RecordingObserver {
    fn notify(&self, agent: AgentIndex, event: &Lifecycle) {
        self.events.lock().unwrap().push((agent, event.clone()));
    }
}

/// Agent configuration for the tests: no automatic replies, no retries.
pub fn config() -> AgentConfig {
    AgentConfig {
        event_replies: BTreeMap::new(),
        retry: RetryPolicy::none(),
        ..AgentConfig::default()
    }
}

/// A small schema with one private and one public field.
pub fn schema(phase_key: &str) -> Arc<StateSchema> {
    Arc::new(
        StateSchema::builder(phase_key)
            .private(FieldSpec::new("value_signal", FieldKind::Real).event_key("value"))
            .public(FieldSpec::new("tax_rate", FieldKind::Real).event_key("taxRate"))
            .build()
            .unwrap(),
    )
}

/// A server event frame.
pub fn event(kind: &str, data: Value) -> Value {
    json!({"type": "event", "eventType": kind, "data": data})
}

/// Read the join payload and return its recovery code.
pub async fn expect_join(peer: &mut MemoryPeer) -> String {
    let join = peer.recv_json().await.unwrap();
    assert_eq!(join.get("type"), Some(&json!("join")));
    join.get("recovery")
        .and_then(Value::as_str)
        .unwrap()
        .to_owned()
}

/// Assert the client sends nothing within `window`.
pub async fn expect_silence(peer: &mut MemoryPeer, window: Duration) {
    let next = tokio::time::timeout(window, peer.recv()).await;
    assert!(next.is_err(), "unexpected message: {next:?}");
}
