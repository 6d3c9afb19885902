//! For reading application configuration.

use serde::Deserialize;
use std::time::Duration;

/// Application configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    /// Server address.
    pub address: String,
    /// Server http port.
    pub http_port: u16,
    /// How long a request may take before it is aborted.
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,
    /// The maximum number of requests handled at once.
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_concurrency_limit() -> usize {
    500
}

/// Which document store backs the service.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Documents in PostgreSQL.
    #[default]
    Postgres,
    /// Documents in process memory, lost on restart.
    Memory,
}

/// Database configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct DatabaseConfig {
    /// The store backend.
    #[serde(default)]
    pub backend: StoreBackend,
    /// The database username.
    pub username: String,
    /// The database password.
    pub password: String,
    /// The database port.
    pub port: u16,
    /// The database name.
    pub database_name: String,
    /// The database host.
    pub host: String,
    /// The size of the connection pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    100
}

/// Logging configuration.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, used when `RUST_LOG` is not set.
    pub level: Option<String>,
    /// Write hourly rolling JSON logs to this directory.
    pub directory: Option<String>,
    /// Export spans to an OTLP collector at this endpoint.
    pub otlp_endpoint: Option<String>,
}

/// Retrieve [`Config`] from the default configuration file.
#[tracing::instrument]
pub fn load_config() -> Result<Config, config::ConfigError> {
    load_config_from("config")
}

/// Retrieve [`Config`] from the named configuration file, overridden by `APP__*` variables.
pub fn load_config_from(name: &str) -> Result<Config, config::ConfigError> {
    config::Config::builder()
        .add_source(config::File::with_name(name))
        .add_source(config::Environment::with_prefix("app").separator("__"))
        .build()?
        .try_deserialize()
}
