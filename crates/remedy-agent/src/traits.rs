use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::Role;

/// Errors raised while building a backend from configuration.
/// None of these ever involve a network call.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Backend credential not set: export {0} or add it to .env")]
    MissingCredential(String),

    #[error("Invalid backend configuration: {0}")]
    Invalid(String),
}

/// Errors that can occur while talking to the LLM backend
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Backend request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Backend network error: {0}")]
    Network(String),

    #[error("Backend returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Backend rate limited the request")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Backend response was not understood: {0}")]
    MalformedResponse(String),
}

impl BackendError {
    /// Whether the orchestrator may try the same request again
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::Timeout(_) | BackendError::Network(_) => true,
            BackendError::RateLimited { .. } => true,
            BackendError::Status { status, .. } => *status == 408 || *status >= 500,
            BackendError::MalformedResponse(_) => false,
        }
    }

    /// Server-provided wait hint, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            BackendError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Stateless adapter from a role-specific prompt to raw backend text.
///
/// Implementations carry no memory between calls: every piece of context
/// a role needs travels in `prompt`. Retries are the caller's business.
#[async_trait]
pub trait RoleClient: Send + Sync {
    /// Send `prompt` under `role`'s system instruction and return the raw reply
    async fn invoke(&self, role: Role, prompt: &str) -> Result<String, BackendError>;

    /// Backend model identifier used for `role`
    fn model_for(&self, role: Role) -> &str;
}
