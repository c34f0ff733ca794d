// Docksight Library - container log reduction and token-budgeted analysis
//
// The core turns an unbounded stream of container log records into one or
// more LLM requests that fit a model's context window. The CLI binary wires
// it to docker, configuration and report output.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info};

pub mod ai_provider;
pub mod chunk;
pub mod config;
pub mod dedup;
pub mod filter;
pub mod input;
pub mod knowledge;
pub mod output;
pub mod pipeline;
pub mod prompts;
pub mod record;
pub mod tokens;

pub use ai_provider::{
    create_provider, create_provider_with_options, AIError, Completion, CompletionProvider, ErrorCategory,
    MockProvider, ProviderOptions, TokenUsage,
};
pub use chunk::{split_into_chunks, Chunk};
pub use config::Config;
pub use dedup::{deduplicate, deduplicate_with_threshold, DEDUP_THRESHOLD};
pub use filter::{FilterError, FilterOutcome, FilterSet, LineFilter};
pub use input::{capture_container_logs, parse_docker_line, read_log_file, CaptureOptions};
pub use knowledge::{KnowledgeBase, KnowledgeEntry, RetentionPolicy};
pub use output::{render_report, save_report, AnalysisReport, OutputFormat, ReportMetadata};
pub use pipeline::{
    AnalysisResult, Pipeline, PipelineError, CHUNK_SIZE_DIVISOR, DEFAULT_MODEL_CONTEXT_LIMIT,
    RESPONSE_RESERVE_TOKENS, SYSTEM_PROMPT_RESERVE_TOKENS,
};
pub use prompts::{PromptBuilder, PromptError, PromptTemplates, TemplatePrompts};
pub use record::{format_records, LogRecord, LogSource};
pub use tokens::{HeuristicEstimator, TokenEstimator};

/// Overrides applied on top of the configuration when building a pipeline.
#[derive(Debug, Clone, Default)]
pub struct PipelineOverrides {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub context_limit: Option<usize>,
    pub request_timeout_secs: Option<u64>,
}

/// Build a [`Pipeline`] with every collaborator taken from `config`.
///
/// Fails on an unknown provider, a missing API key, a bad filter pattern or
/// a prompt template with an unknown placeholder.
pub fn pipeline_from_config(config: &Config, overrides: PipelineOverrides) -> Result<Pipeline> {
    let provider_name = overrides.provider.unwrap_or_else(|| config.default_provider());
    let api_key = config.get_api_key(&provider_name);
    let options = config.provider_options(&provider_name, overrides.model);
    debug!("Provider options for {}: {:?}", provider_name, options.model);

    let provider = create_provider_with_options(&provider_name, api_key.as_deref(), options)
        .with_context(|| format!("Failed to set up provider '{}'", provider_name))?;
    let filters = config.build_filter_set().context("Invalid filter configuration")?;
    let prompts = config.prompt_builder().context("Invalid prompt template")?;
    let estimator = HeuristicEstimator::new().with_chars_per_token(config.chars_per_token());
    let model_limit = overrides.context_limit.unwrap_or_else(|| config.context_limit());

    info!(
        "Pipeline ready: provider {}, context limit {}, {} filtered containers",
        provider.get_provider_name(),
        model_limit,
        filters.len()
    );

    let mut pipeline = Pipeline::new(Arc::from(provider))
        .with_estimator(Arc::new(estimator))
        .with_prompts(Arc::new(prompts))
        .with_filters(Arc::new(filters))
        .with_model_limit(model_limit);

    let timeout = match overrides.request_timeout_secs {
        Some(0) => None,
        Some(secs) => Some(std::time::Duration::from_secs(secs)),
        None => config.request_timeout(),
    };
    if let Some(timeout) = timeout {
        pipeline = pipeline.with_request_timeout(timeout);
    }

    Ok(pipeline)
}
