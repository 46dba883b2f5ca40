//! Declarative field schema for the layered game state.
//!
//! Each partition (meta, private, public) is described by a table of
//! [`FieldSpec`] rows. A row names the state key, the semantic type the
//! stored value must coerce to, the event key it is read from, and the
//! optional filters and hooks that govern when and how it is updated.
//!
//! The table replaces runtime introspection: the state model consults it on
//! every event and never inspects the stored values to decide what to map.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::game::{GameState, StateValidationError};

/// Name of the meta field holding the game id. Never mapped from events.
pub const GAME_ID_FIELD: &str = "game_id";

/// Name of the meta field holding the current phase id.
pub const PHASE_FIELD: &str = "phase";

/// One of the three state partitions.
///
/// The derived ordering is the update order within one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Partition {
    /// Identity and progress: game id, player name/number, players, phase.
    Meta,
    /// Information only this agent sees.
    Private,
    /// Information every agent in the game sees.
    Public,
}

impl Partition {
    /// All partitions in update order.
    pub const ORDER: [Self; 3] = [Self::Meta, Self::Private, Self::Public];

    /// Lowercase name used in logs and errors.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Meta => "meta",
            Self::Private => "private",
            Self::Public => "public",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Semantic type of a state field.
#[derive(Debug, Clone)]
pub enum FieldKind {
    /// Whole number. Integral reals such as `3.0` are accepted.
    Integer,
    /// Any JSON number.
    Real,
    /// String.
    Text,
    /// Boolean.
    Bool,
    /// JSON array.
    List,
    /// JSON object.
    Mapping,
    /// Any JSON value, stored unchecked.
    Any,
    /// JSON object validated against a nested field table.
    Structured(Arc<[FieldSpec]>),
}

impl FieldKind {
    /// Build a structured kind from nested field specs.
    pub fn structured(fields: impl IntoIterator<Item = FieldSpec>) -> Self {
        Self::Structured(fields.into_iter().collect())
    }

    /// Short type name used in validation errors.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Real => "real",
            Self::Text => "string",
            Self::Bool => "bool",
            Self::List => "list",
            Self::Mapping => "mapping",
            Self::Any => "any",
            Self::Structured(_) => "structured",
        }
    }

    /// Value a field of this kind takes when no default is declared.
    pub fn empty_value(&self) -> Value {
        match self {
            Self::Integer => Value::from(0),
            Self::Real => Value::from(0.0),
            Self::Text => Value::String(String::new()),
            Self::Bool => Value::Bool(false),
            Self::List => Value::Array(Vec::new()),
            Self::Mapping => Value::Object(Map::new()),
            Self::Any => Value::Null,
            Self::Structured(fields) => Value::Object(
                fields
                    .iter()
                    .map(|f| (f.name.clone(), f.default_value()))
                    .collect(),
            ),
        }
    }
}

/// Hook computing the stored value of a field from the raw event value.
///
/// Receives the state as already updated for earlier partitions of the same
/// event, so a public field can depend on the new meta phase.
pub type TransformFn = dyn Fn(&Value, &GameState) -> Result<Value, String> + Send + Sync;

/// Custom handler replacing field mapping for one event type.
pub type EventHandlerFn =
    dyn Fn(&mut GameState, &Map<String, Value>) -> Result<(), StateValidationError> + Send + Sync;

#[derive(Clone)]
struct Transform(Arc<TransformFn>);

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Transform(..)")
    }
}

/// Which event types a field listens to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum EventFilter {
    #[default]
    All,
    Only(BTreeSet<String>),
    Except(BTreeSet<String>),
}

/// One row of the schema table.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    name: String,
    kind: FieldKind,
    nullable: bool,
    default: Option<Value>,
    event_key: Option<String>,
    excluded: bool,
    filter: EventFilter,
    conflicting_filters: bool,
    append_round_key: Option<String>,
    transform: Option<Transform>,
}

impl FieldSpec {
    /// A field read from the event key equal to its name.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
            default: None,
            event_key: None,
            excluded: false,
            filter: EventFilter::All,
            conflicting_filters: false,
            append_round_key: None,
            transform: None,
        }
    }

    /// Read the field from `key` instead of its name.
    #[must_use]
    pub fn event_key(mut self, key: impl Into<String>) -> Self {
        self.event_key = Some(key.into());
        self
    }

    /// Declare the default value.
    #[must_use]
    pub fn default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Accept JSON `null`. Without an explicit default the field starts as `null`.
    #[must_use]
    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Never update this field from events.
    #[must_use]
    pub const fn exclude_from_mapping(mut self) -> Self {
        self.excluded = true;
        self
    }

    /// Only map this field from the listed event types.
    #[must_use]
    pub fn only_events<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if matches!(self.filter, EventFilter::Except(_)) {
            self.conflicting_filters = true;
        }
        self.filter = EventFilter::Only(events.into_iter().map(Into::into).collect());
        self
    }

    /// Map this field from every event type except the listed ones.
    #[must_use]
    pub fn except_events<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if matches!(self.filter, EventFilter::Only(_)) {
            self.conflicting_filters = true;
        }
        self.filter = EventFilter::Except(events.into_iter().map(Into::into).collect());
        self
    }

    /// Treat this list as an append-only history keyed by `round_key`.
    ///
    /// Incoming values (a single entry or an array of entries) are appended
    /// unless an entry with the same round identifier is already recorded.
    #[must_use]
    pub fn append_log(mut self, round_key: impl Into<String>) -> Self {
        self.append_round_key = Some(round_key.into());
        self
    }

    /// Compute the stored value from the raw event value and the staged state.
    #[must_use]
    pub fn transform<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value, &GameState) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.transform = Some(Transform(Arc::new(f)));
        self
    }

    /// State key.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared kind.
    pub const fn kind(&self) -> &FieldKind {
        &self.kind
    }

    /// Key the value arrives under in event payloads.
    pub fn key(&self) -> &str {
        self.event_key.as_deref().unwrap_or(&self.name)
    }

    /// Round-identifier key if this is an append-only history field.
    pub fn round_key(&self) -> Option<&str> {
        self.append_round_key.as_deref()
    }

    /// Initial value of the field.
    pub fn default_value(&self) -> Value {
        match &self.default {
            Some(value) => value.clone(),
            None if self.nullable => Value::Null,
            None => self.kind.empty_value(),
        }
    }

    /// Whether an event of type `event_type` may update this field.
    pub fn maps_event(&self, event_type: &str) -> bool {
        if self.excluded {
            return false;
        }
        match &self.filter {
            EventFilter::All => true,
            EventFilter::Only(events) => events.contains(event_type),
            EventFilter::Except(events) => !events.contains(event_type),
        }
    }

    pub(crate) fn apply_transform(
        &self,
        raw: &Value,
        staged: &GameState,
    ) -> Option<Result<Value, String>> {
        self.transform.as_ref().map(|t| (t.0)(raw, staged))
    }

    /// Coerce `value` to this field's kind.
    ///
    /// # Errors
    ///
    /// Returns a description of the mismatch if the value does not fit.
    pub fn coerce(&self, value: &Value) -> Result<Value, String> {
        if value.is_null() {
            return if self.nullable || matches!(self.kind, FieldKind::Any) {
                Ok(Value::Null)
            } else {
                Err(format!("expected {}, found null", self.kind.name()))
            };
        }
        coerce_kind(&self.kind, value)
    }
}

fn coerce_kind(kind: &FieldKind, value: &Value) -> Result<Value, String> {
    let mismatch = || format!("expected {}, found {}", kind.name(), json_type(value));
    match kind {
        FieldKind::Integer => coerce_integer(value).ok_or_else(mismatch),
        FieldKind::Real if value.is_number() => Ok(value.clone()),
        FieldKind::Text if value.is_string() => Ok(value.clone()),
        FieldKind::Bool if value.is_boolean() => Ok(value.clone()),
        FieldKind::List if value.is_array() => Ok(value.clone()),
        FieldKind::Mapping if value.is_object() => Ok(value.clone()),
        FieldKind::Any => Ok(value.clone()),
        FieldKind::Structured(fields) => {
            let Value::Object(object) = value else {
                return Err(mismatch());
            };
            let mut out = object.clone();
            for field in fields.iter() {
                let coerced = match object.get(field.name()) {
                    Some(nested) => field
                        .coerce(nested)
                        .map_err(|e| format!("{}: {e}", field.name()))?,
                    None => field.default_value(),
                };
                out.insert(field.name.clone(), coerced);
            }
            Ok(Value::Object(out))
        }
        FieldKind::Real | FieldKind::Text | FieldKind::Bool | FieldKind::List | FieldKind::Mapping => {
            Err(mismatch())
        }
    }
}

/// Largest magnitude at which every integer is exactly representable as f64.
const MAX_EXACT_FLOAT_INT: f64 = 9_007_199_254_740_992.0;

pub(crate) fn coerce_integer(value: &Value) -> Option<Value> {
    let number = value.as_number()?;
    if number.is_i64() || number.is_u64() {
        return Some(value.clone());
    }
    let float = number.as_f64()?;
    if float.fract() != 0.0 || float.abs() > MAX_EXACT_FLOAT_INT {
        return None;
    }
    // Range-checked above: the value is integral and within i64.
    #[allow(clippy::cast_possible_truncation)]
    let int = float as i64;
    Some(Value::from(int))
}

pub(crate) const fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}

/// Errors raised when a schema table is inconsistent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// Two fields in one partition share a name.
    #[error("duplicate field '{field}' in {partition} partition")]
    DuplicateField {
        /// Partition containing the duplicate.
        partition: Partition,
        /// The duplicated name.
        field: String,
    },
    /// A field declares both an event allow-list and a deny-list.
    #[error("field '{field}' declares both only_events and except_events")]
    ConflictingEventFilters {
        /// The offending field.
        field: String,
    },
    /// An append-only history field is not a list.
    #[error("append-log field '{field}' must be a list")]
    AppendLogNotList {
        /// The offending field.
        field: String,
    },
    /// A field's declared default does not fit its kind.
    #[error("default of field '{field}' is invalid: {reason}")]
    InvalidDefault {
        /// The offending field.
        field: String,
        /// Coercion failure.
        reason: String,
    },
}

#[derive(Clone)]
struct EventHandler(Arc<EventHandlerFn>);

impl fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EventHandler(..)")
    }
}

/// The complete field table for one game's state.
#[derive(Debug, Clone)]
pub struct StateSchema {
    meta: Vec<FieldSpec>,
    private: Vec<FieldSpec>,
    public: Vec<FieldSpec>,
    handlers: BTreeMap<String, EventHandler>,
}

impl StateSchema {
    /// Start a schema with the standard meta fields.
    ///
    /// `phase_key` is the event key carrying the phase id (the configured
    /// phase identifier key).
    pub fn builder(phase_key: &str) -> StateSchemaBuilder {
        StateSchemaBuilder {
            meta: Self::standard_meta(phase_key),
            private: Vec::new(),
            public: Vec::new(),
            handlers: BTreeMap::new(),
        }
    }

    /// The meta fields every game state carries.
    ///
    /// Player name and number arrive as `name` and `number` (the `assign-name`
    /// event); the phase arrives under `phase_key`.
    pub fn standard_meta(phase_key: &str) -> Vec<FieldSpec> {
        vec![
            FieldSpec::new(GAME_ID_FIELD, FieldKind::Integer).exclude_from_mapping(),
            FieldSpec::new("player_name", FieldKind::Text)
                .nullable()
                .event_key("name"),
            FieldSpec::new("player_number", FieldKind::Integer)
                .nullable()
                .event_key("number"),
            FieldSpec::new("players", FieldKind::List),
            FieldSpec::new(PHASE_FIELD, FieldKind::Integer).event_key(phase_key),
        ]
    }

    /// Fields of one partition, in declaration order.
    pub fn fields(&self, partition: Partition) -> &[FieldSpec] {
        match partition {
            Partition::Meta => &self.meta,
            Partition::Private => &self.private,
            Partition::Public => &self.public,
        }
    }

    /// Look up one field.
    pub fn field(&self, partition: Partition, name: &str) -> Option<&FieldSpec> {
        self.fields(partition).iter().find(|f| f.name == name)
    }

    /// Whether a custom handler is registered for `event_type`.
    pub fn has_handler(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    pub(crate) fn handler(&self, event_type: &str) -> Option<&EventHandlerFn> {
        self.handlers.get(event_type).map(|h| h.0.as_ref())
    }
}

/// Builder for [`StateSchema`].
#[derive(Debug, Clone)]
pub struct StateSchemaBuilder {
    meta: Vec<FieldSpec>,
    private: Vec<FieldSpec>,
    public: Vec<FieldSpec>,
    handlers: BTreeMap<String, EventHandler>,
}

impl StateSchemaBuilder {
    /// Add a meta field. A field named like a standard one replaces it.
    #[must_use]
    pub fn meta(mut self, spec: FieldSpec) -> Self {
        self.meta.retain(|f| f.name != spec.name);
        self.meta.push(spec);
        self
    }

    /// Add a private field.
    #[must_use]
    pub fn private(mut self, spec: FieldSpec) -> Self {
        self.private.push(spec);
        self
    }

    /// Add a public field.
    #[must_use]
    pub fn public(mut self, spec: FieldSpec) -> Self {
        self.public.push(spec);
        self
    }

    /// Add a field to the given partition.
    #[must_use]
    pub fn field(self, partition: Partition, spec: FieldSpec) -> Self {
        match partition {
            Partition::Meta => self.meta(spec),
            Partition::Private => self.private(spec),
            Partition::Public => self.public(spec),
        }
    }

    /// Handle `event_type` with custom logic instead of field mapping.
    #[must_use]
    pub fn handler<F>(mut self, event_type: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut GameState, &Map<String, Value>) -> Result<(), StateValidationError>
            + Send
            + Sync
            + 'static,
    {
        self.handlers.insert(event_type.into(), EventHandler(Arc::new(f)));
        self
    }

    /// Validate the table and build the schema.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] for duplicate names, conflicting event
    /// filters, non-list append logs, or defaults that do not fit their kind.
    pub fn build(self) -> Result<StateSchema, SchemaError> {
        for partition in Partition::ORDER {
            let fields = match partition {
                Partition::Meta => &self.meta,
                Partition::Private => &self.private,
                Partition::Public => &self.public,
            };
            validate_fields(partition, fields)?;
        }
        Ok(StateSchema {
            meta: self.meta,
            private: self.private,
            public: self.public,
            handlers: self.handlers,
        })
    }
}

fn validate_fields(partition: Partition, fields: &[FieldSpec]) -> Result<(), SchemaError> {
    let mut seen = BTreeSet::new();
    for field in fields {
        if !seen.insert(field.name.as_str()) {
            return Err(SchemaError::DuplicateField {
                partition,
                field: field.name.clone(),
            });
        }
        if field.conflicting_filters {
            return Err(SchemaError::ConflictingEventFilters {
                field: field.name.clone(),
            });
        }
        if field.append_round_key.is_some() && !matches!(field.kind, FieldKind::List) {
            return Err(SchemaError::AppendLogNotList {
                field: field.name.clone(),
            });
        }
        if let Err(reason) = field.coerce(&field.default_value()) {
            return Err(SchemaError::InvalidDefault {
                field: field.name.clone(),
                reason,
            });
        }
    }
    Ok(())
}
