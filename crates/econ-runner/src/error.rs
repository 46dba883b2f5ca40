//! Error types for the runner binary.
//!
//! Only configuration can fail before a game starts; once agents run, every
//! failure is recorded in the game report instead.

use econ_core::state::SchemaError;

/// Errors raised while loading or converting the runner configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The `agent` section is inconsistent.
    #[error(transparent)]
    Agent(#[from] econ_core::config::ConfigError),

    /// The `schema` section does not describe a valid state schema.
    #[error("invalid state schema: {0}")]
    Schema(#[from] SchemaError),

    /// Any other inconsistent value.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Explanation of what is wrong.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}
