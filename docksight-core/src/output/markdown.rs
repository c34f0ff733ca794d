use super::{AnalysisReport, OutputGenerator};
use anyhow::Result;
use std::fmt::Write;

pub struct MarkdownOutput;

impl OutputGenerator for MarkdownOutput {
    fn generate(&self, report: &AnalysisReport) -> Result<String> {
        let meta = &report.metadata;
        let result = &report.result;
        let outcome = &result.filter_outcome;
        let mut out = String::new();

        writeln!(out, "# Log analysis: {}", meta.container)?;
        writeln!(out)?;
        writeln!(out, "| | |")?;
        writeln!(out, "|---|---|")?;
        writeln!(out, "| Generated | {} |", meta.generated_at)?;
        writeln!(out, "| Source | {} |", meta.input_source)?;
        writeln!(out, "| Provider | {} |", meta.provider)?;
        writeln!(out, "| Context limit | {} tokens |", meta.model_limit)?;
        writeln!(out, "| Records | {} read, {} analyzed |", result.original_count, result.processed_count)?;
        if result.deduplicated {
            writeln!(out, "| Repeats | collapsed into `[REPEAT xN]` markers |")?;
        }
        if outcome.excluded_lines > 0 {
            writeln!(out, "| Filtered | {} of {} lines excluded |", outcome.excluded_lines, outcome.total_lines)?;
        }
        writeln!(
            out,
            "| Requests | {} (~{} tokens) |",
            strategy_label(result.chunks_used),
            result.tokens_used
        )?;
        writeln!(out)?;
        writeln!(out, "## Analysis")?;
        writeln!(out)?;
        writeln!(out, "{}", result.analysis.trim_end())?;

        Ok(out)
    }

    fn file_extension(&self) -> &str {
        "md"
    }
}

fn strategy_label(chunks_used: usize) -> String {
    match chunks_used {
        0 => "none".to_string(),
        1 => "single request".to_string(),
        n => format!("{} chunks + synthesis", n),
    }
}
