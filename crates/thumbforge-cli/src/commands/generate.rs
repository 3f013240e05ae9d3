//! One-shot thumbnail generation.

use std::path::{Path, PathBuf};

use clap::Args;

use crate::output::{self, OutputFormat};
use thumbforge_core::error::AppError;
use thumbforge_core::types::{FileId, FitMode, SizePreset, ThumbnailFormat};

/// Arguments for the generate command
#[derive(Debug, Args)]
pub struct GenerateArgs {
    /// Source file
    pub source: PathBuf,
    /// MIME type (guessed from the extension when omitted)
    #[arg(short, long)]
    pub mime: Option<String>,
    /// File ID used in the cache name (random when omitted)
    #[arg(long)]
    pub file_id: Option<String>,
    /// Size preset
    #[arg(short, long, default_value = "medium")]
    pub preset: String,
    /// Override width
    #[arg(long)]
    pub width: Option<u32>,
    /// Override height
    #[arg(long)]
    pub height: Option<u32>,
    /// Output format: webp, png, jpg
    #[arg(long)]
    pub output_format: Option<String>,
    /// Fit mode: cover, contain, fill, inside, outside
    #[arg(long)]
    pub fit: Option<String>,
    /// Quality 1-100
    #[arg(short, long)]
    pub quality: Option<u8>,
}

/// Execute the generate command
pub async fn execute(
    args: &GenerateArgs,
    config_path: &str,
    format: OutputFormat,
) -> Result<(), AppError> {
    let config = super::load_config(config_path)?;

    let file_id = match &args.file_id {
        Some(raw) => raw
            .parse::<FileId>()
            .map_err(|e| AppError::validation(format!("Invalid file ID '{}': {}", raw, e)))?,
        None => FileId::new(),
    };
    let mime = match &args.mime {
        Some(mime) => mime.clone(),
        None => guess_mime(&args.source).ok_or_else(|| {
            AppError::validation(format!(
                "Cannot guess the MIME type of '{}', pass --mime",
                args.source.display()
            ))
        })?,
    };

    let engine = super::create_engine(&config).await;
    let mut options = engine.options(SizePreset::from_name(&args.preset));
    if let Some(width) = args.width {
        options.width = width;
    }
    if let Some(height) = args.height {
        options.height = height;
    }
    if let Some(raw) = &args.output_format {
        options = options.with_format(raw.parse::<ThumbnailFormat>()?);
    }
    if let Some(raw) = &args.fit {
        options = options.with_fit(raw.parse::<FitMode>()?);
    }
    if let Some(quality) = args.quality {
        options.quality = quality;
    }

    let result = engine.generate(&args.source, &mime, file_id, options).await;
    if result.success {
        output::print_item(&result, format);
        Ok(())
    } else {
        let message = result
            .error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "Thumbnail generation failed".to_string());
        Err(AppError::external_service(message))
    }
}

/// MIME type guessed from the file extension.
fn guess_mime(path: &Path) -> Option<String> {
    mime_guess::from_path(path)
        .first()
        .map(|mime| mime.essence_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess_mime() {
        assert_eq!(guess_mime(Path::new("a/Photo.JPG")).as_deref(), Some("image/jpeg"));
        assert_eq!(guess_mime(Path::new("doc.pdf")).as_deref(), Some("application/pdf"));
        assert_eq!(guess_mime(Path::new("clip.mp4")).as_deref(), Some("video/mp4"));
        assert_eq!(guess_mime(Path::new("README")), None);
    }
}
