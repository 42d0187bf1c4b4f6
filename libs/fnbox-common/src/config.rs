// Service configuration shared by the API and the CLI.
// Every value comes from the environment with a local-development default.

use crate::types::Isolation;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Which metadata store backs the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Memory,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub redis_url: String,
    pub bind_addr: String,
    pub store: StoreBackend,
    pub languages_path: PathBuf,
    pub workspace_root: Option<PathBuf>,
    pub isolation: Isolation,
    pub log_json: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            bind_addr: "0.0.0.0:8000".to_string(),
            store: StoreBackend::Redis,
            languages_path: PathBuf::from("config/languages.json"),
            workspace_root: None,
            isolation: Isolation::Container,
            log_json: false,
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup, so tests need not touch the process env
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("REDIS_URL") {
            config.redis_url = url;
        }
        if let Some(addr) = lookup("FNBOX_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(store) = lookup("FNBOX_STORE") {
            config.store = match store.to_lowercase().as_str() {
                "redis" => StoreBackend::Redis,
                "memory" => StoreBackend::Memory,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "FNBOX_STORE",
                        value: store,
                    })
                }
            };
        }
        if let Some(path) = lookup("FNBOX_LANGUAGES") {
            config.languages_path = PathBuf::from(path);
        }
        if let Some(root) = lookup("FNBOX_WORKSPACE_ROOT") {
            config.workspace_root = Some(PathBuf::from(root));
        }
        if let Some(isolation) = lookup("FNBOX_ISOLATION") {
            config.isolation = isolation
                .parse::<Isolation>()
                .map_err(|_| ConfigError::InvalidValue {
                    key: "FNBOX_ISOLATION",
                    value: isolation.clone(),
                })?;
        }
        if let Some(format) = lookup("FNBOX_LOG_FORMAT") {
            config.log_json = format.eq_ignore_ascii_case("json");
        }

        Ok(config)
    }
}
