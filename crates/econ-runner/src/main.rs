//! Entry point for running one economic game with scripted agents.
//!
//! The runner loads `econ-config.yaml`, joins one agent per recovery code,
//! plays until the server ends the game (or the deadline expires), and
//! prints the game report as JSON on stdout.
//!
//! # Architecture
//!
//! ```text
//! YAML config --> GameRunner --> N x AgentManager --> WebSocket --> server
//!                     |
//!                     +--> GameReport (stdout)
//! ```
//!
//! The process exits non-zero when any agent failed.

mod config;
mod error;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use econ_core::game::GameRunner;
use econ_core::observer::TracingObserver;
use econ_core::session::WsConnector;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::RunnerConfig;

/// Application entry point.
///
/// Initializes logging, loads configuration from the file named by
/// `ECON_CONFIG` (default `econ-config.yaml`), runs the game, and prints
/// the report.
///
/// # Errors
///
/// Returns an error if the configuration is unusable or any agent failed.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("econ-runner starting");

    let path = std::env::var("ECON_CONFIG")
        .map_or_else(|_| PathBuf::from("econ-config.yaml"), PathBuf::from);
    let config = RunnerConfig::from_file(&path)
        .with_context(|| format!("loading {}", path.display()))?;
    info!(
        server_url = config.server_url,
        game_id = config.game_id,
        agents = config.recovery_codes.len(),
        max_game_duration_ms = ?config.runner.max_game_duration_ms,
        decision_timeout_ms = ?config.agent.decision_timeout_ms,
        "configuration loaded"
    );

    let schema = config.state_schema()?;
    let runner = GameRunner::new(
        Arc::new(WsConnector::new(config.server_url.clone())),
        Arc::new(config.agent.clone()),
        schema,
        Arc::new(config.decider()),
        Arc::new(TracingObserver),
        config.runner.clone(),
    );

    let report = runner.run_game(config.credentials()).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    let failed = report.agents.len().saturating_sub(report.completed_count());
    anyhow::ensure!(
        report.is_success(),
        "{failed} of {} agents failed",
        report.agents.len()
    );
    Ok(())
}
