//! Size preset listing.

use serde::Serialize;
use tabled::Tabled;

use crate::output::{self, OutputFormat};
use thumbforge_core::error::AppError;
use thumbforge_core::types::{SizePreset, ThumbnailOptions};

/// One row of the preset table
#[derive(Debug, Serialize, Tabled)]
struct PresetRow {
    #[tabled(rename = "Preset")]
    name: &'static str,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Format")]
    format: String,
    #[tabled(rename = "Fit")]
    fit: String,
    #[tabled(rename = "On upload")]
    on_upload: bool,
    #[tabled(rename = "Queued")]
    queued: bool,
}

/// Execute the presets command
pub async fn execute(config_path: &str, format: OutputFormat) -> Result<(), AppError> {
    let config = super::load_config(config_path)?;
    let thumbnail = &config.thumbnail;

    let rows: Vec<PresetRow> = SizePreset::ALL
        .iter()
        .map(|preset| {
            let options = ThumbnailOptions::from_preset(*preset, thumbnail);
            PresetRow {
                name: preset.name(),
                size: options.size_spec(),
                format: options.format.to_string(),
                fit: format!("{:?}", options.fit).to_lowercase(),
                on_upload: thumbnail.upload_presets.contains(preset),
                queued: thumbnail.queued_preset == *preset,
            }
        })
        .collect();

    output::print_list(&rows, format);
    Ok(())
}
