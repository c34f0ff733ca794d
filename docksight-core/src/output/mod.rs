pub mod json;
pub mod markdown;

use crate::pipeline::AnalysisResult;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use json::JsonOutput;
use markdown::MarkdownOutput;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisReport {
    pub metadata: ReportMetadata,
    pub result: AnalysisResult,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportMetadata {
    pub generated_at: String,
    pub container: String,
    pub provider: String,
    pub model_limit: usize,
    /// `docker logs` or the path of the file that was read.
    pub input_source: String,
}

impl AnalysisReport {
    pub fn new(metadata: ReportMetadata, result: AnalysisResult) -> Self {
        Self { metadata, result }
    }
}

impl ReportMetadata {
    pub fn now(container: &str, provider: &str, model_limit: usize, input_source: &str) -> Self {
        Self {
            generated_at: chrono::Utc::now().to_rfc3339(),
            container: container.to_string(),
            provider: provider.to_string(),
            model_limit,
            input_source: input_source.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Markdown,
    Json,
}

impl OutputFormat {
    pub fn file_extension(&self) -> &'static str {
        match self {
            OutputFormat::Markdown => "md",
            OutputFormat::Json => "json",
        }
    }

    /// Guess the format from an output path's extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_lowercase().as_str() {
            "md" | "markdown" => Some(OutputFormat::Markdown),
            "json" => Some(OutputFormat::Json),
            _ => None,
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown output format '{}' (expected markdown or json)", other)),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Markdown => write!(f, "markdown"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

pub trait OutputGenerator {
    fn generate(&self, report: &AnalysisReport) -> Result<String>;
    fn file_extension(&self) -> &str;
}

pub fn render_report(report: &AnalysisReport, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Markdown => MarkdownOutput.generate(report),
        OutputFormat::Json => JsonOutput.generate(report),
    }
}

pub fn save_report(content: &str, output_path: &Path) -> Result<()> {
    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create report directory {}", parent.display()))?;
    }
    std::fs::write(output_path, content)
        .with_context(|| format!("Failed to write report to {}", output_path.display()))?;
    Ok(())
}

#[cfg(test)]
pub(crate) fn sample_report() -> AnalysisReport {
    use crate::filter::FilterOutcome;

    AnalysisReport {
        metadata: ReportMetadata {
            generated_at: "2024-05-01T12:00:00+00:00".to_string(),
            container: "web".to_string(),
            provider: "mock".to_string(),
            model_limit: 128_000,
            input_source: "docker logs".to_string(),
        },
        result: AnalysisResult {
            analysis: "The database connection pool is exhausted.".to_string(),
            tokens_used: 1234,
            chunks_used: 3,
            original_count: 900,
            processed_count: 640,
            deduplicated: true,
            filter_outcome: FilterOutcome {
                total_lines: 700,
                excluded_lines: 60,
                kept_lines: 640,
            },
        },
    }
}
