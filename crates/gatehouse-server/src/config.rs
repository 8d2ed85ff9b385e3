use std::net::{IpAddr, SocketAddr};

use gatehouse_auth::AuthConfig;
use gatehouse_auth_postgres::PostgresConfig;
use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        self.addr()?;
        if self.server.port == 0 {
            return Err(ConfigLoadError::Invalid("server.port must be > 0".into()));
        }
        if self.server.body_limit_bytes == 0 {
            return Err(ConfigLoadError::Invalid(
                "server.body_limit_bytes must be > 0".into(),
            ));
        }
        if self.storage.backend == StorageBackend::Postgres
            && self.storage.postgres.url.trim().is_empty()
        {
            return Err(ConfigLoadError::Invalid(
                "storage.postgres.url is required for the postgres backend".into(),
            ));
        }
        self.auth
            .validate()
            .map_err(|e| ConfigLoadError::Invalid(e.to_string()))
    }

    /// Listen address. `server.host` must be an IP literal.
    pub fn addr(&self) -> Result<SocketAddr, ConfigLoadError> {
        let ip: IpAddr = self.server.host.parse().map_err(|_| {
            ConfigLoadError::Invalid(format!(
                "server.host must be an IP address, got '{}'",
                self.server.host
            ))
        })?;
        Ok(SocketAddr::new(ip, self.server.port))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_body_limit() -> usize {
    64 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Which identity directory backs the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Postgres,
    /// Process-local; data is lost on restart.
    Memory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default)]
    pub postgres: PostgresConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("config build error: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub mod loader {
    use super::{AppConfig, ConfigLoadError};
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_PATH: &str = "gatehouse.toml";

    /// Loads the file (if it exists), then `GATEHOUSE__*` overrides, then validates.
    pub fn load_config(path: Option<&str>) -> Result<AppConfig, ConfigLoadError> {
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
        let mut builder = Config::builder();
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., GATEHOUSE__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("GATEHOUSE")
                .prefix_separator("__")
                .try_parsing(true)
                .separator("__"),
        );
        let merged: AppConfig = builder.build()?.try_deserialize()?;
        merged.validate()?;
        Ok(merged)
    }
}
