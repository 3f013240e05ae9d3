//! Tool detection command.

use std::sync::Arc;

use serde::Serialize;
use tabled::Tabled;

use crate::output::{self, OutputFormat};
use thumbforge_core::error::AppError;
use thumbforge_engine::{CapabilityDetector, SystemRunner, Tool};

/// One row of the probe report
#[derive(Debug, Serialize, Tabled)]
struct ToolRow {
    #[tabled(rename = "Tool")]
    tool: String,
    #[tabled(rename = "Candidates")]
    candidates: String,
    #[tabled(rename = "Available")]
    program: String,
}

/// Execute the probe command
pub async fn execute(config_path: &str, format: OutputFormat) -> Result<(), AppError> {
    let config = super::load_config(config_path)?;
    let detector = CapabilityDetector::new(Arc::new(SystemRunner::new()), config.tools.clone());
    let capabilities = detector.detect().await;

    let rows: Vec<ToolRow> = capabilities
        .summary()
        .into_iter()
        .map(|(tool, program)| ToolRow {
            tool: tool.to_string(),
            candidates: tool.candidates(&config.tools).join(", "),
            program: program.unwrap_or("-").to_string(),
        })
        .collect();
    output::print_list(&rows, format);

    let missing: Vec<String> = Tool::ALL
        .iter()
        .filter(|tool| !capabilities.has(**tool))
        .map(|tool| tool.to_string())
        .collect();
    if !missing.is_empty() && format == OutputFormat::Table {
        output::print_warning(&format!(
            "Missing tools: {}. Affected pipelines fall back or fail.",
            missing.join(", ")
        ));
    }
    Ok(())
}
