//! Wire message shapes exchanged with the game server.
//!
//! Every frame is a JSON object discriminated by its `type` field.
//!
//! ```text
//! server -> client   {"type": "event", "eventType": "...", "data": {...}}
//! server -> client   {"type": "error", "message": "..."}
//! client -> server   {"type": "...", "gameId": 1, ...fields}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::GameId;

/// Message type used by the join (login) handshake.
pub const JOIN_MESSAGE_TYPE: &str = "join";

/// An event pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameEvent {
    /// Event name, e.g. `phase-transition` or `assign-name`.
    #[serde(rename = "eventType", default)]
    pub event_type: String,
    /// Event payload. Missing payloads decode as an empty object.
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl GameEvent {
    /// Build an event from a name and a JSON payload.
    ///
    /// Non-object payloads are replaced by an empty object.
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        let data = match data {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            event_type: event_type.into(),
            data,
        }
    }
}

/// A decoded server-to-client frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// A state-bearing event.
    Event(GameEvent),
    /// A server-side error (rejected login or rejected action).
    Error {
        /// Human-readable reason given by the server.
        #[serde(default)]
        message: String,
    },
    /// Any other message type. Ignored by the dispatcher.
    #[serde(other)]
    Other,
}

impl ServerMessage {
    /// Decode a raw text frame.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`serde_json::Error`] if the frame is not a
    /// JSON object with a string `type` field.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Return the event type if this is an event.
    pub fn event_type(&self) -> Option<&str> {
        match self {
            Self::Event(event) => Some(event.event_type.as_str()),
            Self::Error { .. } | Self::Other => None,
        }
    }
}

/// A client-to-server message (an action submission or a protocol reply).
///
/// Serializes flat: `{"type": kind, "gameId": game_id, ...fields}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Message type, e.g. `choice` or `player-is-ready`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Game the message belongs to.
    #[serde(rename = "gameId")]
    pub game_id: GameId,
    /// Type-specific fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Action {
    /// Build an action with no extra fields.
    pub fn new(kind: impl Into<String>, game_id: GameId) -> Self {
        Self {
            kind: kind.into(),
            game_id,
            fields: Map::new(),
        }
    }

    /// Add a type-specific field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Encode as a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns [`serde_json::Error`] if a field value cannot be serialized.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// The join payload an agent presents when (re)connecting.
///
/// The recovery credential is opaque to the client; the server maps it to a
/// role and identity. Extra fields are passed through unchanged for servers
/// that expect more than the credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginPayload {
    /// Message type, normally [`JOIN_MESSAGE_TYPE`].
    #[serde(rename = "type", default = "default_join_type")]
    pub kind: String,
    /// Game to join.
    #[serde(rename = "gameId")]
    pub game_id: GameId,
    /// Recovery credential issued out-of-band.
    pub recovery: String,
    /// Additional login fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_join_type() -> String {
    JOIN_MESSAGE_TYPE.to_owned()
}

impl LoginPayload {
    /// Build a standard join payload.
    pub fn join(game_id: GameId, recovery: impl Into<String>) -> Self {
        Self {
            kind: default_join_type(),
            game_id,
            recovery: recovery.into(),
            extra: Map::new(),
        }
    }

    /// Encode as a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns [`serde_json::Error`] if an extra field cannot be serialized.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
