mod config;
mod openrouter;
mod traits;

pub use config::{
    BackendConfig, DEFAULT_API_KEY_ENV, DEFAULT_BASE_URL, DEFAULT_MODEL, DEFAULT_TIMEOUT,
};
pub use openrouter::OpenRouterClient;
pub use remedy_schema::Role;
pub use traits::{BackendError, ConfigError, RoleClient};
