//! Layered game state and its declarative field schema.

mod game;
pub mod schema;

pub use game::{AppliedEvent, GameState, StateSnapshot, StateValidationError};
pub use schema::{FieldKind, FieldSpec, Partition, SchemaError, StateSchema, StateSchemaBuilder};
