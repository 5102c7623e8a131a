use std::path::PathBuf;
use thiserror::Error;

use remedy_agent::{BackendError, ConfigError, Role};
use remedy_logging::LogError;
use remedy_schema::SchemaError;

/// Errors that abort the run for a file instead of ending it in a terminal state
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Log validation error: {0}")]
    Log(#[from] LogError),

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Refusing to write {path}: outside target root {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker task failed: {0}")]
    Task(String),

    #[error("Invalid transition: {0}")]
    Transition(#[from] crate::state::InvalidTransition),
}

/// Why a single role step did not produce a validated value.
///
/// Backend and schema failures become terminal outcomes; the rest abort.
#[derive(Error, Debug)]
pub(crate) enum StepError {
    #[error("{role} backend call failed after {attempts} attempt(s): {source}")]
    Backend {
        role: Role,
        attempts: u32,
        #[source]
        source: BackendError,
    },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Log(#[from] LogError),
}
