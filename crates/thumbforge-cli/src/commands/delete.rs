//! Thumbnail deletion command.

use clap::Args;

use crate::output;
use thumbforge_core::error::AppError;
use thumbforge_core::traits::metadata::MetadataStore;
use thumbforge_core::types::FileId;
use thumbforge_database::FileMetadataRepository;

/// Arguments for the delete command
#[derive(Debug, Args)]
pub struct DeleteArgs {
    /// File ID whose thumbnails are removed
    pub file_id: String,
}

/// Execute the delete command
pub async fn execute(args: &DeleteArgs, config_path: &str) -> Result<(), AppError> {
    let file_id: FileId = args
        .file_id
        .parse()
        .map_err(|e| AppError::validation(format!("Invalid file ID '{}': {}", args.file_id, e)))?;

    let config = super::load_config(config_path)?;
    let engine = super::create_engine(&config).await;
    let removed = engine.delete_thumbnails(file_id).await?;

    if let Some(pool) = super::create_db_pool(&config).await? {
        FileMetadataRepository::new(pool.pool().clone())
            .clear_thumbnail_url(file_id)
            .await?;
        pool.close().await;
    }

    output::print_success(&format!("Removed {} thumbnails of file {}", removed, file_id));
    Ok(())
}
