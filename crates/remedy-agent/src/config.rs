use std::collections::HashMap;
use std::time::Duration;

use crate::{ConfigError, Role};

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_API_KEY_ENV: &str = "OPENROUTER_API_KEY";
pub const DEFAULT_MODEL: &str = "google/gemini-2.0-flash-001";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Configuration for the HTTP backend shared by all three roles
#[derive(Clone)]
pub struct BackendConfig {
    pub api_key: String,
    pub base_url: String,
    /// Bound on every request; a call still pending at this point is abandoned
    pub timeout: Duration,
    /// Model used by roles without an override
    pub model: String,
    /// Per-role model overrides
    pub role_models: HashMap<Role, String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("model", &self.model)
            .field("role_models", &self.role_models)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl BackendConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            model: DEFAULT_MODEL.to_string(),
            role_models: HashMap::new(),
            temperature: 0.3,
            max_tokens: 4096,
        }
    }

    /// Read the credential from `var`. Fails before anything touches the network.
    pub fn from_env(var: &str) -> Result<Self, ConfigError> {
        match std::env::var(var) {
            Ok(key) if !key.trim().is_empty() => Ok(Self::new(key.trim())),
            _ => Err(ConfigError::MissingCredential(var.to_string())),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_role_model(mut self, role: Role, model: impl Into<String>) -> Self {
        self.role_models.insert(role, model.into());
        self
    }

    /// Effective model for `role`: role override, then the shared model
    pub fn model_for(&self, role: Role) -> &str {
        self.role_models
            .get(&role)
            .map(String::as_str)
            .unwrap_or(&self.model)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingCredential("api_key".to_string()));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "base_url must be an http(s) URL, got {:?}",
                self.base_url
            )));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::Invalid("timeout must be non-zero".to_string()));
        }
        Ok(())
    }
}
