//! CLI command implementations.

pub mod admin;
pub mod kyc;
pub mod subscribers;

use std::sync::Arc;

use serde_json::Value;
use sim_portal::Portal;
use sim_portal::admin::AdminError;
use sim_portal::api::ApiError;
use sim_portal::config::{ConfigError, PortalConfig};
use sim_portal::notify::TracingNotifier;
use sim_portal::reconcile::EngineError;
use thiserror::Error;

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Backend call failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Admin call failed.
    #[error(transparent)]
    Admin(#[from] AdminError),

    /// Verification watch could not start.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Reading an input file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Input was rejected before any backend call.
    #[error("{0}")]
    Invalid(String),

    /// The command was interrupted before finishing.
    #[error("Interrupted")]
    Interrupted,
}

/// Portal state for terminal use: notices go to the log and no
/// verification widget can be opened.
pub fn portal(config: PortalConfig) -> Result<Portal, CommandError> {
    Ok(Portal::new(
        config,
        Arc::new(kyc::Headless),
        Arc::new(TracingNotifier),
    )?)
}

/// Write a JSON document to stdout.
#[allow(clippy::print_stdout)]
pub fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => tracing::warn!(error = %e, "Failed to format response"),
    }
}
