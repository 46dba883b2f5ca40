//! One agent's view of the game: meta, private, and public partitions.
//!
//! Values are stored as JSON and validated against the [`StateSchema`] on
//! every write. Events are applied atomically: all mapped fields are staged
//! on a copy of the state and the copy replaces the original only when every
//! field coerced.

use std::sync::Arc;

use econ_types::{GameEvent, GameId, PhaseId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::schema::{
    FieldSpec, GAME_ID_FIELD, PHASE_FIELD, Partition, StateSchema, coerce_integer,
};

/// Errors raised when an event or write does not fit the schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateValidationError {
    /// A mapped value could not be coerced to the field's kind.
    #[error("{partition}.{field}: {reason}")]
    Coercion {
        /// Partition of the field.
        partition: Partition,
        /// Field name.
        field: String,
        /// Coercion failure.
        reason: String,
    },
    /// A field's transform hook failed.
    #[error("{partition}.{field}: transform failed: {reason}")]
    Transform {
        /// Partition of the field.
        partition: Partition,
        /// Field name.
        field: String,
        /// Hook-provided reason.
        reason: String,
    },
    /// An append-log entry has no round identifier.
    #[error("{partition}.{field}: entry has no '{round_key}' round identifier")]
    MissingRoundId {
        /// Partition of the field.
        partition: Partition,
        /// Field name.
        field: String,
        /// Expected round key.
        round_key: String,
    },
    /// A direct write named a field the schema does not declare.
    #[error("{partition}.{field}: no such field")]
    UnknownField {
        /// Partition written to.
        partition: Partition,
        /// Field name.
        field: String,
    },
    /// A custom event handler rejected the event.
    #[error("handler for '{event_type}' failed: {reason}")]
    Handler {
        /// Event type the handler is registered for.
        event_type: String,
        /// Handler-provided reason.
        reason: String,
    },
}

/// Summary of one successfully applied event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedEvent {
    /// Fields written by field mapping, in update order.
    pub updated: Vec<(Partition, String)>,
    /// Whether a custom handler processed the event instead of field mapping.
    pub handled: bool,
}

/// Serializable copy of a [`GameState`], handed to the decision collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Identity and progress fields.
    pub meta: Map<String, Value>,
    /// Fields visible only to this agent.
    pub private: Map<String, Value>,
    /// Fields visible to every agent.
    pub public: Map<String, Value>,
}

/// The layered game state of one agent.
#[derive(Debug, Clone)]
pub struct GameState {
    schema: Arc<StateSchema>,
    meta: Map<String, Value>,
    private: Map<String, Value>,
    public: Map<String, Value>,
}

impl PartialEq for GameState {
    fn eq(&self, other: &Self) -> bool {
        self.meta == other.meta && self.private == other.private && self.public == other.public
    }
}

impl GameState {
    /// Build a state holding every field's default, with `game_id` set.
    pub fn new(schema: Arc<StateSchema>, game_id: GameId) -> Self {
        let defaults = |partition| {
            schema
                .fields(partition)
                .iter()
                .map(|f: &FieldSpec| (f.name().to_owned(), f.default_value()))
                .collect::<Map<String, Value>>()
        };
        let mut meta = defaults(Partition::Meta);
        meta.insert(GAME_ID_FIELD.to_owned(), Value::from(game_id.into_inner()));
        let private = defaults(Partition::Private);
        let public = defaults(Partition::Public);
        Self {
            schema,
            meta,
            private,
            public,
        }
    }

    /// Rebuild a state from a snapshot.
    ///
    /// Declared fields are validated; keys unknown to the schema are kept as-is
    /// and fields missing from the snapshot take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`StateValidationError::Coercion`] if a declared field holds a
    /// value of the wrong kind.
    pub fn from_snapshot(
        schema: Arc<StateSchema>,
        snapshot: StateSnapshot,
    ) -> Result<Self, StateValidationError> {
        let game_id = snapshot
            .meta
            .get(GAME_ID_FIELD)
            .and_then(Value::as_u64)
            .map(GameId)
            .unwrap_or_default();
        let mut state = Self::new(schema, game_id);
        let StateSnapshot {
            meta,
            private,
            public,
        } = snapshot;
        for (partition, values) in [
            (Partition::Meta, meta),
            (Partition::Private, private),
            (Partition::Public, public),
        ] {
            for (name, value) in values {
                let value = match state.schema.field(partition, &name) {
                    Some(spec) => coerce_field(partition, spec, &value)?,
                    None => value,
                };
                state.partition_mut(partition).insert(name, value);
            }
        }
        Ok(state)
    }

    /// Apply one server event.
    ///
    /// If the schema registers a custom handler for the event type, the handler
    /// runs instead of field mapping. Otherwise every field whose event key is
    /// present in `event.data` (and whose event filters allow this event type)
    /// is updated, partition by partition in meta, private, public order.
    ///
    /// # Errors
    ///
    /// Returns [`StateValidationError`] if any mapped field fails to coerce,
    /// a transform hook fails, or a custom handler rejects the event. The
    /// state is left unchanged in that case.
    pub fn apply(&mut self, event: &GameEvent) -> Result<AppliedEvent, StateValidationError> {
        let schema = Arc::clone(&self.schema);
        let mut staged = self.clone();

        if let Some(handler) = schema.handler(&event.event_type) {
            handler(&mut staged, &event.data)?;
            *self = staged;
            return Ok(AppliedEvent {
                updated: Vec::new(),
                handled: true,
            });
        }

        let mut updated = Vec::new();
        for partition in Partition::ORDER {
            for spec in schema.fields(partition) {
                if !spec.maps_event(&event.event_type) {
                    continue;
                }
                let Some(raw) = event.data.get(spec.key()) else {
                    continue;
                };
                let value = match spec.apply_transform(raw, &staged) {
                    Some(Ok(value)) => value,
                    Some(Err(reason)) => {
                        return Err(StateValidationError::Transform {
                            partition,
                            field: spec.name().to_owned(),
                            reason,
                        });
                    }
                    None => raw.clone(),
                };
                match spec.round_key() {
                    Some(round_key) => {
                        staged.append_entries(partition, spec, round_key, value, &event.data)?;
                    }
                    None => {
                        let value = coerce_field(partition, spec, &value)?;
                        staged
                            .partition_mut(partition)
                            .insert(spec.name().to_owned(), value);
                    }
                }
                updated.push((partition, spec.name().to_owned()));
            }
        }

        *self = staged;
        Ok(AppliedEvent {
            updated,
            handled: false,
        })
    }

    fn append_entries(
        &mut self,
        partition: Partition,
        spec: &FieldSpec,
        round_key: &str,
        value: Value,
        data: &Map<String, Value>,
    ) -> Result<(), StateValidationError> {
        let entries = match value {
            Value::Array(entries) => entries,
            single => vec![single],
        };
        let event_round = data.get(round_key);
        let mut log = match self.partition(partition).get(spec.name()) {
            Some(Value::Array(existing)) => existing.clone(),
            _ => Vec::new(),
        };
        for entry in entries {
            let round = entry
                .get(round_key)
                .or(event_round)
                .map(round_id)
                .ok_or_else(|| StateValidationError::MissingRoundId {
                    partition,
                    field: spec.name().to_owned(),
                    round_key: round_key.to_owned(),
                })?;
            if log
                .iter()
                .any(|e| e.get(round_key).map(round_id).as_ref() == Some(&round))
            {
                continue;
            }
            let entry = match entry {
                Value::Object(mut object) => {
                    object.entry(round_key).or_insert(round);
                    Value::Object(object)
                }
                other => {
                    let mut object = Map::new();
                    object.insert(round_key.to_owned(), round);
                    object.insert("value".to_owned(), other);
                    Value::Object(object)
                }
            };
            log.push(entry);
        }
        self.partition_mut(partition)
            .insert(spec.name().to_owned(), Value::Array(log));
        Ok(())
    }

    /// Write one declared field directly. Used by custom event handlers.
    ///
    /// # Errors
    ///
    /// Returns [`StateValidationError::UnknownField`] if the schema does not
    /// declare the field, or [`StateValidationError::Coercion`] if the value
    /// does not fit its kind.
    pub fn set(
        &mut self,
        partition: Partition,
        name: &str,
        value: &Value,
    ) -> Result<(), StateValidationError> {
        let schema = Arc::clone(&self.schema);
        let spec = schema
            .field(partition, name)
            .ok_or_else(|| StateValidationError::UnknownField {
                partition,
                field: name.to_owned(),
            })?;
        let value = coerce_field(partition, spec, value)?;
        self.partition_mut(partition).insert(name.to_owned(), value);
        Ok(())
    }

    /// Read one field of any partition.
    pub fn get(&self, partition: Partition, name: &str) -> Option<&Value> {
        self.partition(partition).get(name)
    }

    /// Read a meta field.
    pub fn meta(&self, name: &str) -> Option<&Value> {
        self.meta.get(name)
    }

    /// Read a private field.
    pub fn private(&self, name: &str) -> Option<&Value> {
        self.private.get(name)
    }

    /// Read a public field.
    pub fn public(&self, name: &str) -> Option<&Value> {
        self.public.get(name)
    }

    /// The game id set at construction.
    pub fn game_id(&self) -> GameId {
        self.meta
            .get(GAME_ID_FIELD)
            .and_then(Value::as_u64)
            .map(GameId)
            .unwrap_or_default()
    }

    /// The phase recorded in meta (0 before the first transition).
    pub fn phase(&self) -> PhaseId {
        self.meta
            .get(PHASE_FIELD)
            .and_then(Value::as_u64)
            .and_then(|p| u32::try_from(p).ok())
            .map(PhaseId)
            .unwrap_or_default()
    }

    /// The schema this state validates against.
    pub fn schema(&self) -> &Arc<StateSchema> {
        &self.schema
    }

    /// Copy the current values out.
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            meta: self.meta.clone(),
            private: self.private.clone(),
            public: self.public.clone(),
        }
    }

    fn partition(&self, partition: Partition) -> &Map<String, Value> {
        match partition {
            Partition::Meta => &self.meta,
            Partition::Private => &self.private,
            Partition::Public => &self.public,
        }
    }

    fn partition_mut(&mut self, partition: Partition) -> &mut Map<String, Value> {
        match partition {
            Partition::Meta => &mut self.meta,
            Partition::Private => &mut self.private,
            Partition::Public => &mut self.public,
        }
    }
}

fn coerce_field(
    partition: Partition,
    spec: &FieldSpec,
    value: &Value,
) -> Result<Value, StateValidationError> {
    spec.coerce(value)
        .map_err(|reason| StateValidationError::Coercion {
            partition,
            field: spec.name().to_owned(),
            reason,
        })
}

impl StateValidationError {
    /// Build a handler error from any displayable reason.
    pub fn handler(event_type: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Handler {
            event_type: event_type.into(),
            reason: reason.to_string(),
        }
    }
}

/// Round ids compare by value: `1` and `1.0` name the same round.
fn round_id(value: &Value) -> Value {
    coerce_integer(value).unwrap_or_else(|| value.clone())
}
