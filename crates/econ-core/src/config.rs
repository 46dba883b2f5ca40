//! Typed configuration for agents and the game runner.
//!
//! These structs deserialize from the `agent` and `runner` sections of the
//! runner binary's YAML file. Every field has a default so a partial file
//! (or none at all) yields a working configuration.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use econ_types::PhaseId;
use serde::Deserialize;

/// Errors raised when a configuration is internally inconsistent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A value is out of range or contradicts another value.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Explanation of what is wrong.
        reason: String,
    },
}

/// Per-agent protocol and pacing settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AgentConfig {
    /// Event type announcing a new phase.
    #[serde(default = "default_phase_transition_event")]
    pub phase_transition_event: String,

    /// Key in the transition event's data holding the new phase id.
    #[serde(default = "default_phase_identifier_key")]
    pub phase_identifier_key: String,

    /// Event type announcing the end of the game.
    #[serde(default = "default_game_over_event")]
    pub game_over_event: String,

    /// Phases in which agents act on a timer rather than once per phase.
    #[serde(default)]
    pub continuous_phases: BTreeSet<PhaseId>,

    /// Phases in which the decision collaborator is consulted.
    /// Empty means every phase.
    #[serde(default)]
    pub action_phases: BTreeSet<PhaseId>,

    /// Lower bound of the continuous-phase action delay.
    #[serde(default = "default_min_action_delay_ms")]
    pub min_action_delay_ms: u64,

    /// Upper bound of the continuous-phase action delay.
    #[serde(default = "default_max_action_delay_ms")]
    pub max_action_delay_ms: u64,

    /// Deadline for one decision call. Absent or zero waits indefinitely.
    #[serde(default)]
    pub decision_timeout_ms: Option<u64>,

    /// Phase the machine starts in. `None` means not started.
    #[serde(default)]
    pub initial_phase: Option<PhaseId>,

    /// Event types answered automatically with a message of the mapped type.
    #[serde(default = "default_event_replies")]
    pub event_replies: BTreeMap<String, String>,

    /// Reconnection settings.
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl AgentConfig {
    /// Check that the delay bounds are ordered and the retry policy is sane.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_action_delay_ms > self.max_action_delay_ms {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "min_action_delay_ms ({}) exceeds max_action_delay_ms ({})",
                    self.min_action_delay_ms, self.max_action_delay_ms
                ),
            });
        }
        if self.phase_identifier_key.is_empty() {
            return Err(ConfigError::Invalid {
                reason: "phase_identifier_key must not be empty".to_owned(),
            });
        }
        if self.phase_transition_event == self.game_over_event {
            return Err(ConfigError::Invalid {
                reason: "phase_transition_event and game_over_event must differ".to_owned(),
            });
        }
        self.retry.validate()
    }

    /// Lower bound of the continuous-phase action delay.
    pub const fn min_action_delay(&self) -> Duration {
        Duration::from_millis(self.min_action_delay_ms)
    }

    /// Upper bound of the continuous-phase action delay.
    pub const fn max_action_delay(&self) -> Duration {
        Duration::from_millis(self.max_action_delay_ms)
    }

    /// The decision deadline, if one is enabled.
    pub fn decision_timeout(&self) -> Option<Duration> {
        self.decision_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            phase_transition_event: default_phase_transition_event(),
            phase_identifier_key: default_phase_identifier_key(),
            game_over_event: default_game_over_event(),
            continuous_phases: BTreeSet::new(),
            action_phases: BTreeSet::new(),
            min_action_delay_ms: default_min_action_delay_ms(),
            max_action_delay_ms: default_max_action_delay_ms(),
            decision_timeout_ms: None,
            initial_phase: None,
            event_replies: default_event_replies(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Bounded exponential backoff for (re)connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetryPolicy {
    /// Attempts allowed after the first failure before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Ceiling for the doubled delay.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// Delay before retry number `attempt` (0-based): the initial backoff
    /// doubled `attempt` times, capped at the maximum.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u64.checked_pow(attempt).unwrap_or(u64::MAX);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the initial backoff exceeds the cap.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "retry.initial_backoff_ms ({}) exceeds retry.max_backoff_ms ({})",
                    self.initial_backoff_ms, self.max_backoff_ms
                ),
            });
        }
        Ok(())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Settings for running a whole game.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GameRunnerConfig {
    /// Overall deadline for the game. Absent or zero disables it.
    #[serde(default)]
    pub max_game_duration_ms: Option<u64>,
}

impl GameRunnerConfig {
    /// The deadline, if one is enabled.
    pub fn max_game_duration(&self) -> Option<Duration> {
        self.max_game_duration_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_phase_transition_event() -> String {
    "phase-transition".to_owned()
}

fn default_phase_identifier_key() -> String {
    "phase".to_owned()
}

fn default_game_over_event() -> String {
    "game-over".to_owned()
}

const fn default_min_action_delay_ms() -> u64 {
    10_000
}

const fn default_max_action_delay_ms() -> u64 {
    20_000
}

fn default_event_replies() -> BTreeMap<String, String> {
    BTreeMap::from([("assign-name".to_owned(), "player-is-ready".to_owned())])
}

const fn default_max_retries() -> u32 {
    5
}

const fn default_initial_backoff_ms() -> u64 {
    500
}

const fn default_max_backoff_ms() -> u64 {
    30_000
}
