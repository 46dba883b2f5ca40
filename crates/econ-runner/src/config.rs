//! Runner configuration loaded from `econ-config.yaml`.
//!
//! The file names the server, the game and its recovery codes, and carries
//! the agent settings, the state schema, and the scripted actions. Every
//! section has defaults; only `recovery_codes` must be filled in.
//!
//! Environment variables override the connection target:
//! - `ECON_SERVER_URL` overrides `server_url`
//! - `ECON_GAME_ID` overrides `game_id`

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use econ_core::config::{AgentConfig, GameRunnerConfig};
use econ_core::decision::{ActionTemplate, ScriptedDecider};
use econ_core::state::{FieldKind, FieldSpec, Partition, StateSchema};
use econ_types::{GameId, LoginPayload, PhaseId};
use serde::Deserialize;
use serde_json::Value;

use crate::error::ConfigError;

/// Top-level runner configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RunnerConfig {
    /// WebSocket URL of the game server.
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Game every agent joins.
    #[serde(default = "default_game_id")]
    pub game_id: u64,

    /// One recovery code per agent, in agent order.
    #[serde(default)]
    pub recovery_codes: Vec<String>,

    /// Protocol and pacing settings shared by all agents.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Game-level settings.
    #[serde(default)]
    pub runner: GameRunnerConfig,

    /// Private and public state fields.
    #[serde(default)]
    pub schema: SchemaConfig,

    /// Scripted actions per phase.
    #[serde(default)]
    pub actions: ActionsConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            game_id: default_game_id(),
            recovery_codes: Vec::new(),
            agent: AgentConfig::default(),
            runner: GameRunnerConfig::default(),
            schema: SchemaConfig::default(),
            actions: ActionsConfig::default(),
        }
    }
}

fn default_server_url() -> String {
    "ws://localhost:8765".to_owned()
}

const fn default_game_id() -> u64 {
    1
}

impl RunnerConfig {
    /// Load and validate the configuration at `path`, then apply
    /// environment overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate a YAML document, then apply environment overrides.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Override the connection target from `ECON_SERVER_URL` and
    /// `ECON_GAME_ID`.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = std::env::var("ECON_SERVER_URL") {
            self.server_url = val;
        }
        if let Ok(val) = std::env::var("ECON_GAME_ID") {
            self.game_id = val.parse().map_err(|err| ConfigError::Invalid {
                reason: format!("invalid ECON_GAME_ID '{val}': {err}"),
            })?;
        }
        Ok(())
    }

    /// Reject configurations that cannot run a game.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.recovery_codes.is_empty() {
            return Err(ConfigError::Invalid {
                reason: "recovery_codes must list at least one agent".to_owned(),
            });
        }
        if let Some(code) = self.recovery_codes.iter().find(|code| code.trim().is_empty()) {
            return Err(ConfigError::Invalid {
                reason: format!("blank recovery code '{code}'"),
            });
        }
        if self.server_url.is_empty() {
            return Err(ConfigError::Invalid {
                reason: "server_url must not be empty".to_owned(),
            });
        }
        self.agent.validate()?;
        Ok(())
    }

    /// The game id as a typed id.
    pub const fn game_id(&self) -> GameId {
        GameId(self.game_id)
    }

    /// Join payloads, one per recovery code.
    pub fn credentials(&self) -> Vec<LoginPayload> {
        econ_core::game::credentials(self.game_id(), self.recovery_codes.iter().cloned())
    }

    /// Build the state schema declared in the `schema` section.
    pub fn state_schema(&self) -> Result<Arc<StateSchema>, ConfigError> {
        let phase_key = &self.agent.phase_identifier_key;
        let mut builder = StateSchema::builder(phase_key);
        for (partition, fields) in [
            (Partition::Private, &self.schema.private),
            (Partition::Public, &self.schema.public),
        ] {
            for field in fields {
                builder = builder.field(partition, field.to_spec());
            }
        }
        Ok(Arc::new(builder.build()?))
    }

    /// Build the decider answering each phase with its scripted action.
    pub fn decider(&self) -> ScriptedDecider {
        let scripted = self
            .actions
            .phases
            .iter()
            .fold(ScriptedDecider::new(), |decider, (phase, template)| {
                decider.on_phase(PhaseId(*phase), template.clone())
            });
        match &self.actions.default {
            Some(template) => scripted.otherwise(template.clone()),
            None => scripted,
        }
    }
}

/// Declared state fields. Meta fields are always the standard set.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SchemaConfig {
    /// Per-agent fields.
    #[serde(default)]
    pub private: Vec<FieldConfig>,

    /// Fields shared by all agents.
    #[serde(default)]
    pub public: Vec<FieldConfig>,
}

/// Value type of a declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KindName {
    /// Whole number.
    Integer,
    /// Floating-point number.
    Real,
    /// String.
    Text,
    /// Boolean.
    Bool,
    /// Ordered list.
    List,
    /// Key-value mapping.
    Mapping,
    /// Any JSON value.
    Any,
    /// Nested record built from `fields`.
    Structured,
}

/// One declared field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FieldConfig {
    /// Field name in the state.
    pub name: String,

    /// Value type.
    pub kind: KindName,

    /// Key in event data, when it differs from the name.
    #[serde(default)]
    pub event_key: Option<String>,

    /// Initial value.
    #[serde(default)]
    pub default: Option<Value>,

    /// Whether `null` is accepted.
    #[serde(default)]
    pub nullable: bool,

    /// Never filled from events.
    #[serde(default)]
    pub exclude_from_mapping: bool,

    /// Only these event types update the field.
    #[serde(default)]
    pub only_events: Vec<String>,

    /// These event types never update the field.
    #[serde(default)]
    pub except_events: Vec<String>,

    /// Append entries instead of replacing, de-duplicated by this key.
    #[serde(default)]
    pub append_log: Option<String>,

    /// Members of a `structured` field.
    #[serde(default)]
    pub fields: Vec<FieldConfig>,
}

impl FieldConfig {
    fn kind(&self) -> FieldKind {
        match self.kind {
            KindName::Integer => FieldKind::Integer,
            KindName::Real => FieldKind::Real,
            KindName::Text => FieldKind::Text,
            KindName::Bool => FieldKind::Bool,
            KindName::List => FieldKind::List,
            KindName::Mapping => FieldKind::Mapping,
            KindName::Any => FieldKind::Any,
            KindName::Structured => {
                FieldKind::structured(self.fields.iter().map(Self::to_spec))
            }
        }
    }

    /// The schema entry this declaration describes.
    pub fn to_spec(&self) -> FieldSpec {
        let mut spec = FieldSpec::new(self.name.clone(), self.kind());
        if let Some(key) = &self.event_key {
            spec = spec.event_key(key.clone());
        }
        if let Some(value) = &self.default {
            spec = spec.default(value.clone());
        }
        if self.nullable {
            spec = spec.nullable();
        }
        if self.exclude_from_mapping {
            spec = spec.exclude_from_mapping();
        }
        if !self.only_events.is_empty() {
            spec = spec.only_events(self.only_events.iter().cloned());
        }
        if !self.except_events.is_empty() {
            spec = spec.except_events(self.except_events.iter().cloned());
        }
        if let Some(round_key) = &self.append_log {
            spec = spec.append_log(round_key.clone());
        }
        spec
    }
}

/// Scripted actions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ActionsConfig {
    /// Action per phase id.
    #[serde(default)]
    pub phases: BTreeMap<u32, ActionTemplate>,

    /// Action for phases not listed; agents pass if absent.
    #[serde(default)]
    pub default: Option<ActionTemplate>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use econ_core::decision::{Decider, DecisionRequest};
    use econ_core::phase::PhasePolicy;
    use econ_core::state::GameState;
    use econ_types::{AgentIndex, GameEvent};
    use serde_json::json;

    use super::*;

    const SAMPLE: &str = r"
server_url: ws://game.local:9000
game_id: 12
recovery_codes: [alpha, beta]
agent:
  continuous_phases: [2]
  min_action_delay_ms: 1000
  max_action_delay_ms: 3000
runner:
  max_game_duration_ms: 600000
schema:
  private:
    - name: value_signal
      kind: real
      event_key: value
  public:
    - name: tax_rate
      kind: real
      event_key: taxRate
      default: 0.0
    - name: history
      kind: list
      append_log: round
      only_events: [round-result]
actions:
  phases:
    1:
      type: choice
      fields:
        choice: cooperate
  default:
    type: pass
";

    fn parse_without_env(yaml: &str) -> Result<RunnerConfig, ConfigError> {
        let config: RunnerConfig = serde_yml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn sample_parses() {
        let config = parse_without_env(SAMPLE).unwrap();
        assert_eq!(config.server_url, "ws://game.local:9000");
        assert_eq!(config.game_id(), GameId(12));
        assert_eq!(config.agent.min_action_delay_ms, 1000);
        assert!(config.agent.continuous_phases.contains(&PhaseId(2)));
        assert_eq!(config.runner.max_game_duration_ms, Some(600_000));
        assert_eq!(config.schema.public.len(), 2);

        let credentials = config.credentials();
        assert_eq!(credentials.len(), 2);
        assert_eq!(credentials.first().unwrap().recovery, "alpha");
        assert_eq!(credentials.first().unwrap().game_id, GameId(12));
    }

    #[test]
    fn defaults_fill_missing_sections() {
        let config = parse_without_env("recovery_codes: [only]").unwrap();
        assert_eq!(config.server_url, "ws://localhost:8765");
        assert_eq!(config.agent, AgentConfig::default());
        assert_eq!(config.runner.max_game_duration(), None);
        assert_eq!(config.actions, ActionsConfig::default());
    }

    #[test]
    fn missing_recovery_codes_rejected() {
        assert!(matches!(
            parse_without_env("game_id: 3"),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn unknown_field_kind_rejected() {
        let yaml = r"
recovery_codes: [a]
schema:
  public:
    - name: weird
      kind: matrix
";
        assert!(matches!(parse_without_env(yaml), Err(ConfigError::Yaml { .. })));
    }

    #[test]
    fn inverted_delays_rejected() {
        let yaml = r"
recovery_codes: [a]
agent:
  min_action_delay_ms: 5000
  max_action_delay_ms: 1000
";
        assert!(matches!(parse_without_env(yaml), Err(ConfigError::Agent(_))));
    }

    #[test]
    fn schema_maps_declared_fields() {
        let config = parse_without_env(SAMPLE).unwrap();
        let schema = config.state_schema().unwrap();
        let mut state = GameState::new(schema, config.game_id());

        state
            .apply(&GameEvent::new(
                "phase-transition",
                json!({"phase": 1, "value": 4.5, "taxRate": 0.2}),
            ))
            .unwrap();
        assert_eq!(state.get(Partition::Private, "value_signal"), Some(&json!(4.5)));
        assert_eq!(state.get(Partition::Public, "tax_rate"), Some(&json!(0.2)));
        assert_eq!(state.get(Partition::Public, "history"), Some(&json!([])));
    }

    #[test]
    fn conflicting_filters_fail_schema_build() {
        let yaml = r"
recovery_codes: [a]
schema:
  public:
    - name: bad
      kind: text
      only_events: [x]
      except_events: [y]
";
        let config = parse_without_env(yaml).unwrap();
        assert!(matches!(config.state_schema(), Err(ConfigError::Schema(_))));
    }

    #[tokio::test]
    async fn decider_follows_scripted_phases() {
        let config = parse_without_env(SAMPLE).unwrap();
        let decider = config.decider();
        let request = |phase| DecisionRequest {
            agent: AgentIndex(1),
            game_id: config.game_id(),
            phase: PhaseId(phase),
            policy: PhasePolicy::TurnBased,
            snapshot: GameState::new(config.state_schema().unwrap(), config.game_id()).snapshot(),
            rejection: None,
        };

        let first = decider.decide(&request(1)).await.unwrap().unwrap();
        assert_eq!(
            first.encode().unwrap(),
            r#"{"type":"choice","gameId":12,"choice":"cooperate"}"#
        );
        let other = decider.decide(&request(5)).await.unwrap().unwrap();
        assert_eq!(other.kind, "pass");
    }
}
