//! CLI command definitions and dispatch.

pub mod config;
pub mod delete;
pub mod generate;
pub mod jobs;
pub mod presets;
pub mod probe;

use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::output::OutputFormat;
use thumbforge_core::config::AppConfig;
use thumbforge_core::error::AppError;
use thumbforge_engine::{ConfigPathResolver, EngineConfig, ThumbnailEngine};

/// Thumbforge: thumbnail generation administration
#[derive(Debug, Parser)]
#[command(name = "thumbforge", version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Detect external conversion tools
    Probe,
    /// List size presets
    Presets,
    /// Generate one thumbnail
    Generate(generate::GenerateArgs),
    /// Delete every cached thumbnail of a file
    Delete(delete::DeleteArgs),
    /// Persisted job status and migrations
    Jobs(jobs::JobsArgs),
    /// Configuration management
    Config(config::ConfigArgs),
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(&self) -> Result<(), AppError> {
        match &self.command {
            Commands::Probe => probe::execute(&self.config, self.format).await,
            Commands::Presets => presets::execute(&self.config, self.format).await,
            Commands::Generate(args) => generate::execute(args, &self.config, self.format).await,
            Commands::Delete(args) => delete::execute(args, &self.config).await,
            Commands::Jobs(args) => jobs::execute(args, &self.config, self.format).await,
            Commands::Config(args) => config::execute(args, &self.config, self.format).await,
        }
    }
}

/// Helper: load configuration from file
pub fn load_config(config_path: &str) -> Result<AppConfig, AppError> {
    AppConfig::load(config_path)
}

/// Helper: probe tools and build an engine from config
pub async fn create_engine(config: &AppConfig) -> ThumbnailEngine {
    let resolver = ConfigPathResolver::from_config(&config.storage);
    ThumbnailEngine::start(EngineConfig::from_app(config), Arc::new(resolver)).await
}

/// Helper: create database pool from config, if one is configured
pub async fn create_db_pool(
    config: &AppConfig,
) -> Result<Option<thumbforge_database::DatabasePool>, AppError> {
    if config.database.url.is_none() {
        return Ok(None);
    }
    let pool = thumbforge_database::DatabasePool::connect(&config.database).await?;
    Ok(Some(pool))
}
