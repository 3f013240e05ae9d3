//! Persisted job status commands.

use clap::{Args, Subcommand};
use serde::Serialize;
use tabled::Tabled;

use crate::output::{self, OutputFormat};
use thumbforge_core::error::AppError;
use thumbforge_core::traits::job_store::JobStatusStore;
use thumbforge_core::types::FileId;
use thumbforge_database::ThumbnailJobRepository;
use thumbforge_database::migration::run_migrations;

/// Arguments for job commands
#[derive(Debug, Args)]
pub struct JobsArgs {
    /// Jobs subcommand
    #[command(subcommand)]
    pub command: JobsCommand,
}

/// Job subcommands
#[derive(Debug, Subcommand)]
pub enum JobsCommand {
    /// Count jobs by status
    Status,
    /// Show the latest job of a file
    Show {
        /// File ID
        file_id: String,
    },
    /// Run database migrations
    Migrate,
}

#[derive(Debug, Serialize, Tabled)]
struct StatusRow {
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Jobs")]
    count: i64,
}

/// Execute job commands
pub async fn execute(
    args: &JobsArgs,
    config_path: &str,
    format: OutputFormat,
) -> Result<(), AppError> {
    let config = super::load_config(config_path)?;
    let pool = super::create_db_pool(&config)
        .await?
        .ok_or_else(|| AppError::configuration("Job status is only persisted with database.url set"))?;
    let repo = ThumbnailJobRepository::new(pool.pool().clone());

    match &args.command {
        JobsCommand::Status => {
            let rows: Vec<StatusRow> = repo
                .count_by_status()
                .await?
                .into_iter()
                .map(|(status, count)| StatusRow {
                    status: status.to_string(),
                    count,
                })
                .collect();
            output::print_list(&rows, format);
            if format == OutputFormat::Table {
                output::print_kv("Worker Enabled", &config.worker.enabled.to_string());
                output::print_kv("Concurrency", &config.worker.concurrency.to_string());
            }
        }
        JobsCommand::Show { file_id } => {
            let file_id: FileId = file_id
                .parse()
                .map_err(|e| AppError::validation(format!("Invalid file ID '{}': {}", file_id, e)))?;
            match repo.find_by_file(file_id).await? {
                Some(record) => output::print_item(&record, format),
                None => output::print_warning(&format!("No job recorded for file {}", file_id)),
            }
        }
        JobsCommand::Migrate => {
            run_migrations(pool.pool()).await?;
            output::print_success("Migrations applied");
        }
    }

    pool.close().await;
    Ok(())
}
