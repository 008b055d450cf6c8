use crate::error::{QuotaError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    pub database_url: String,
    pub max_connections: u32,
    /// How long a writer waits for a locked ledger before giving up
    pub busy_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// When false, every capability check is allowed (local development only)
    pub enabled: bool,
    pub service_url: String,
    pub service_id: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| QuotaError::Config(e.to_string()))?;

        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| QuotaError::Config(e.to_string()))
    }

    /// Layer defaults, an optional TOML file and `QUOTA__SECTION__KEY`
    /// environment overrides, in that order.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let defaults = config::Config::try_from(&Config::default())
            .map_err(|e| QuotaError::Config(e.to_string()))?;

        config::Config::builder()
            .add_source(defaults)
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(
                config::Environment::with_prefix("QUOTA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| QuotaError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.max_connections == 0 {
            return Err(QuotaError::Config(
                "storage.max_connections must be at least 1".to_string(),
            ));
        }
        if self.auth.enabled && self.auth.service_url.is_empty() {
            return Err(QuotaError::Config(
                "auth.service_url is required when auth is enabled".to_string(),
            ));
        }
        match self.logging.format.as_str() {
            "pretty" | "compact" | "json" => Ok(()),
            other => Err(QuotaError::Config(format!(
                "unknown logging.format: {}",
                other
            ))),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                database_url: "sqlite://quota.db".to_string(),
                max_connections: 8,
                busy_timeout_secs: 10,
            },
            auth: AuthConfig {
                enabled: true,
                service_url: "http://localhost:8081".to_string(),
                service_id: "svc_quota".to_string(),
                timeout_secs: 30,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}
