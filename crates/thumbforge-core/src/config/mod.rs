//! Application configuration schemas.
//!
//! All configuration structs are deserialized from TOML files via the
//! `config` crate. Each sub-module represents a logical configuration
//! section, and every field carries a default so an empty file is valid.

pub mod logging;
pub mod storage;
pub mod thumbnail;
pub mod tools;
pub mod worker;

use serde::{Deserialize, Serialize};
use validator::Validate;

use self::logging::LoggingConfig;
use self::storage::StorageConfig;
use self::thumbnail::ThumbnailConfig;
use self::tools::ToolsConfig;
use self::worker::WorkerConfig;

use crate::error::AppError;

/// Environment variable naming the overlay file (`config/{env}.toml`).
pub const ENV_VAR: &str = "THUMBFORGE_ENV";

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Source and thumbnail directories, URL prefix, path mapping table.
    #[serde(default)]
    pub storage: StorageConfig,
    /// External conversion tool locations and limits.
    #[serde(default)]
    pub tools: ToolsConfig,
    /// Thumbnail defaults and pipeline tuning.
    #[serde(default)]
    pub thumbnail: ThumbnailConfig,
    /// Background worker and queue settings.
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Optional Postgres persistence.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database connection pool configuration.
///
/// When `url` is unset the server keeps job status and thumbnail URLs in
/// memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL.
    #[serde(default)]
    pub url: Option<String>,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    /// Idle connection timeout in seconds.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_seconds: default_connect_timeout(),
            idle_timeout_seconds: default_idle_timeout(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    ///
    /// Merges `path` with an environment overlay (`config/{env}.toml`, env
    /// taken from `THUMBFORGE_ENV`) and environment variables prefixed with
    /// `THUMBFORGE__`. Missing files are not an error.
    pub fn load(path: &str) -> Result<Self, AppError> {
        let env = std::env::var(ENV_VAR).unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("THUMBFORGE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        let app: Self = config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))?;

        app.validate()?;
        Ok(app)
    }

    /// Validate every section that declares constraints.
    pub fn validate(&self) -> Result<(), AppError> {
        self.tools.validate()?;
        self.thumbnail.validate()?;
        self.worker.validate()?;
        Ok(())
    }
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_idle_timeout() -> u64 {
    300
}
