//! Project configuration file support for remedy.
//!
//! Loads configuration from `remedy.toml` in the target directory.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use remedy_agent::Role;
use remedy_core::{LoopPolicy, RetryPolicy, SchemaFailure, SourceFilter};

/// Project-level configuration loaded from `remedy.toml`
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Global default model (applies to every role)
    pub model: Option<String>,
    /// OpenAI-compatible endpoint, e.g. `https://openrouter.ai/api/v1`
    pub base_url: Option<String>,
    /// Environment variable holding the API key
    pub api_key_env: Option<String>,
    /// Per-request backend timeout, e.g. `"90s"`
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    pub max_iterations: Option<usize>,
    pub short_circuit_clean: Option<bool>,
    pub keep_rejected_candidate: Option<bool>,
    pub on_schema_error: Option<SchemaFailure>,
    /// Command run on each candidate before judging
    pub test_command: Option<String>,
    pub extensions: Option<Vec<String>>,
    pub exclude_prefixes: Option<Vec<String>>,
    pub apply: Option<bool>,
    /// Keep `<name>.backup` copies of files replaced by `apply`
    pub backup: Option<bool>,
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub auditor: RoleConfig,
    #[serde(default)]
    pub fixer: RoleConfig,
    #[serde(default)]
    pub judge: RoleConfig,
}

/// Configuration for a specific role
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RoleConfig {
    /// Model to use for this role
    pub model: Option<String>,
}

/// Backoff for backend failures
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    pub max_attempts: Option<u32>,
    #[serde(default, with = "humantime_serde")]
    pub base_delay: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub max_delay: Option<Duration>,
}

/// The config file name
pub const CONFIG_FILE_NAME: &str = "remedy.toml";

impl ProjectConfig {
    /// Load configuration from the target directory.
    ///
    /// Returns:
    /// - `Ok(Some(config))` if file exists and parses successfully
    /// - `Ok(None)` if file does not exist
    /// - `Err(...)` if file exists but fails to parse (hard error)
    pub fn load(target_dir: &Path) -> Result<Option<Self>> {
        let config_path = target_dir.join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let config: ProjectConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        Ok(Some(config))
    }

    /// Get the effective model for `role`.
    /// Priority: [role].model > global model > None
    pub fn role_model(&self, role: Role) -> Option<&str> {
        let table = match role {
            Role::Auditor => &self.auditor,
            Role::Fixer => &self.fixer,
            Role::Judge => &self.judge,
        };
        table.model.as_deref().or(self.model.as_deref())
    }

    /// Loop policy with every configured value applied over the defaults
    pub fn loop_policy(&self) -> LoopPolicy {
        let defaults = LoopPolicy::default();
        let retry_defaults = RetryPolicy::default();
        LoopPolicy {
            max_iterations: self.max_iterations.unwrap_or(defaults.max_iterations),
            short_circuit_clean: self
                .short_circuit_clean
                .unwrap_or(defaults.short_circuit_clean),
            keep_rejected_candidate: self
                .keep_rejected_candidate
                .unwrap_or(defaults.keep_rejected_candidate),
            on_schema_error: self.on_schema_error.unwrap_or(defaults.on_schema_error),
            retry: RetryPolicy {
                max_attempts: self.retry.max_attempts.unwrap_or(retry_defaults.max_attempts),
                base_delay: self.retry.base_delay.unwrap_or(retry_defaults.base_delay),
                max_delay: self.retry.max_delay.unwrap_or(retry_defaults.max_delay),
            },
            apply: self.apply.unwrap_or(defaults.apply),
            backup: self.backup.unwrap_or(defaults.backup),
        }
    }

    pub fn source_filter(&self) -> SourceFilter {
        let defaults = SourceFilter::default();
        SourceFilter {
            extensions: self.extensions.clone().unwrap_or(defaults.extensions),
            exclude_prefixes: self
                .exclude_prefixes
                .clone()
                .unwrap_or(defaults.exclude_prefixes),
        }
    }
}
