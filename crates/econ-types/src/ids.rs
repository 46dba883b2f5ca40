//! Type-safe numeric identifier wrappers.
//!
//! Games, phases, and agents are all identified by plain integers on the
//! wire. Wrapping them prevents passing a phase number where a game id is
//! expected. All wrappers serialize transparently as the inner integer.

use serde::{Deserialize, Serialize};

/// Generates a transparent newtype wrapper around an integer with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident($inner:ty)
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub $inner);

        impl $name {
            /// Wrap a raw value.
            pub const fn new(value: $inner) -> Self {
                Self(value)
            }

            /// Return the inner value.
            pub const fn into_inner(self) -> $inner {
                self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$inner> for $name {
            fn from(value: $inner) -> Self {
                Self(value)
            }
        }

        impl From<$name> for $inner {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Identifier of a game on the server (`gameId` on the wire).
    GameId(u64)
}

define_id! {
    /// Identifier of a phase (round) within a game.
    ///
    /// Phase ids are normally non-decreasing; a lower id than the current
    /// one is a server-issued reset.
    PhaseId(u32)
}

define_id! {
    /// 1-based position of an agent in the runner's credential list.
    ///
    /// Used as the log label for the agent and as the key in the game report.
    AgentIndex(usize)
}
