use super::{AnalysisReport, OutputGenerator};
use anyhow::{Context, Result};

pub struct JsonOutput;

impl OutputGenerator for JsonOutput {
    fn generate(&self, report: &AnalysisReport) -> Result<String> {
        serde_json::to_string_pretty(report).context("Failed to serialize report")
    }

    fn file_extension(&self) -> &str {
        "json"
    }
}
