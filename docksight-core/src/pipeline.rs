//! Token-budgeted analysis pipeline.
//!
//! One call to [`Pipeline::analyze`] deduplicates and filters a container's
//! records, measures them against the model's context window and then either
//! sends everything in a single request or summarizes the log chunk by chunk
//! and synthesizes the summaries into one analysis.

use crate::ai_provider::{AIError, CompletionProvider};
use crate::chunk::{split_into_chunks, Chunk};
use crate::dedup::deduplicate;
use crate::filter::{FilterOutcome, FilterSet};
use crate::prompts::{PromptBuilder, PromptError, TemplatePrompts};
use crate::record::{format_records, LogRecord};
use crate::tokens::{HeuristicEstimator, TokenEstimator};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Completion headroom kept free in every request.
pub const RESPONSE_RESERVE_TOKENS: usize = 4096;

/// Minimum budget set aside for the system prompt, whatever its estimate.
pub const SYSTEM_PROMPT_RESERVE_TOKENS: usize = 1000;

/// Chunks get `available / CHUNK_SIZE_DIVISOR` tokens, leaving room for
/// estimation error and the chunk prompt's own text.
pub const CHUNK_SIZE_DIVISOR: i64 = 2;

pub const DEFAULT_MODEL_CONTEXT_LIMIT: usize = 128_000;

pub const NO_LOGS_ANALYSIS: &str = "No logs to analyze";
pub const NOTHING_PROCESSED_ANALYSIS: &str = "No logs could be processed";

/// Outcome of one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub analysis: String,
    pub tokens_used: usize,
    pub chunks_used: usize,
    pub original_count: usize,
    pub processed_count: usize,
    pub deduplicated: bool,
    pub filter_outcome: FilterOutcome,
}

impl AnalysisResult {
    fn trivial(
        analysis: &str,
        original_count: usize,
        processed_count: usize,
        deduplicated: bool,
        filter_outcome: FilterOutcome,
    ) -> Self {
        Self {
            analysis: analysis.to_string(),
            tokens_used: 0,
            chunks_used: 0,
            original_count,
            processed_count,
            deduplicated,
            filter_outcome,
        }
    }
}

/// Prompt that failed to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptStage {
    System,
    User,
    Chunk,
    Synthesis,
}

impl fmt::Display for PromptStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptStage::System => write!(f, "system"),
            PromptStage::User => write!(f, "user"),
            PromptStage::Chunk => write!(f, "chunk"),
            PromptStage::Synthesis => write!(f, "synthesis"),
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("failed to build {stage} prompt: {source}")]
    Prompt {
        stage: PromptStage,
        #[source]
        source: PromptError,
    },
    #[error("direct analysis failed: {source}")]
    Analysis {
        #[source]
        source: AIError,
    },
    #[error("summarizing chunk {index} of {total} ({records} records, ~{tokens} tokens) failed: {source}")]
    ChunkSummary {
        index: usize,
        total: usize,
        records: usize,
        tokens: usize,
        #[source]
        source: AIError,
    },
    #[error("synthesizing {summaries} chunk summaries failed: {source}")]
    Synthesis {
        summaries: usize,
        #[source]
        source: AIError,
    },
}

impl PipelineError {
    /// The provider error behind this failure, if any.
    pub fn ai_error(&self) -> Option<&AIError> {
        match self {
            PipelineError::Prompt { .. } => None,
            PipelineError::Analysis { source }
            | PipelineError::ChunkSummary { source, .. }
            | PipelineError::Synthesis { source, .. } => Some(source),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Direct,
    Chunked,
}

/// Token accounting behind the strategy decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetPlan {
    pub system_tokens: usize,
    pub user_overhead_tokens: usize,
    pub log_tokens: usize,
    pub total_tokens: usize,
    /// May be zero or negative when the fixed reserves eat the whole window.
    pub available_tokens: i64,
    pub strategy: Strategy,
}

impl BudgetPlan {
    /// Per-chunk token limit for the chunked strategy; `None` when the
    /// budget leaves no room for any chunk.
    pub fn chunk_limit(&self) -> Option<usize> {
        let limit = self.available_tokens / CHUNK_SIZE_DIVISOR;
        if limit > 0 {
            Some(limit as usize)
        } else {
            None
        }
    }
}

/// The analysis orchestrator. All collaborators are injected; cloning is
/// cheap and clones share them.
#[derive(Clone)]
pub struct Pipeline {
    provider: Arc<dyn CompletionProvider>,
    estimator: Arc<dyn TokenEstimator>,
    prompts: Arc<dyn PromptBuilder>,
    filters: Arc<FilterSet>,
    model_limit: usize,
    request_timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self {
            provider,
            estimator: Arc::new(HeuristicEstimator::new()),
            prompts: Arc::new(TemplatePrompts::new()),
            filters: Arc::new(FilterSet::new()),
            model_limit: DEFAULT_MODEL_CONTEXT_LIMIT,
            request_timeout: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn with_prompts(mut self, prompts: Arc<dyn PromptBuilder>) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_filters(mut self, filters: Arc<FilterSet>) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_model_limit(mut self, model_limit: usize) -> Self {
        self.model_limit = model_limit;
        self
    }

    /// Abort any single provider request that runs longer than `timeout`.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn model_limit(&self) -> usize {
        self.model_limit
    }

    pub fn provider_name(&self) -> &str {
        self.provider.get_provider_name()
    }

    /// Run the full pipeline over one container's records.
    pub async fn analyze(&self, source_id: &str, records: Vec<LogRecord>) -> Result<AnalysisResult, PipelineError> {
        let original_count = records.len();
        if original_count == 0 {
            info!("No log records for {}, skipping analysis", source_id);
            return Ok(AnalysisResult::trivial(
                NO_LOGS_ANALYSIS,
                0,
                0,
                false,
                FilterOutcome::default(),
            ));
        }

        let (records, filter_outcome) = self.preprocess(source_id, records);
        let processed_count = records.len();
        let deduplicated = filter_outcome.total_lines < original_count;

        if records.is_empty() {
            info!("Every log record for {} was filtered out", source_id);
            return Ok(AnalysisResult::trivial(
                NO_LOGS_ANALYSIS,
                original_count,
                0,
                deduplicated,
                filter_outcome,
            ));
        }

        let system_prompt = self
            .prompts
            .system_prompt(source_id)
            .map_err(|source| PipelineError::Prompt {
                stage: PromptStage::System,
                source,
            })?;
        let log_text = format_records(&records);
        let plan = self.plan_budget(source_id, &system_prompt, &log_text, processed_count)?;

        info!(
            "Budget for {}: {} tokens total ({} system, {} prompt, {} logs), {} available, limit {} -> {:?}",
            source_id,
            plan.total_tokens,
            plan.system_tokens,
            plan.user_overhead_tokens,
            plan.log_tokens,
            plan.available_tokens,
            self.model_limit,
            plan.strategy
        );

        let (analysis, tokens_used, chunks_used) = match plan.strategy {
            Strategy::Direct => {
                let (analysis, tokens) = self
                    .analyze_direct(source_id, &system_prompt, &log_text, processed_count)
                    .await?;
                (analysis, tokens, 1)
            }
            Strategy::Chunked => {
                drop(log_text);
                let chunks = match plan.chunk_limit() {
                    Some(limit) => split_into_chunks(records, limit, self.estimator.as_ref()),
                    None => Vec::new(),
                };

                if chunks.is_empty() {
                    warn!(
                        "No room for any chunk of {} logs ({} tokens available)",
                        source_id, plan.available_tokens
                    );
                    return Ok(AnalysisResult::trivial(
                        NOTHING_PROCESSED_ANALYSIS,
                        original_count,
                        processed_count,
                        deduplicated,
                        filter_outcome,
                    ));
                }

                let chunks_used = chunks.len();
                let (analysis, tokens) = self.analyze_chunked(source_id, &system_prompt, &chunks).await?;
                (analysis, tokens, chunks_used)
            }
        };

        info!(
            "Analysis of {} finished: {} chunks, ~{} tokens",
            source_id, chunks_used, tokens_used
        );

        Ok(AnalysisResult {
            analysis,
            tokens_used,
            chunks_used,
            original_count,
            processed_count,
            deduplicated,
            filter_outcome,
        })
    }

    /// Deduplicate, then apply the source's line filter.
    fn preprocess(&self, source_id: &str, records: Vec<LogRecord>) -> (Vec<LogRecord>, FilterOutcome) {
        let original = records.len();
        let deduped = deduplicate(records);
        let (kept, outcome) = self.filters.apply(source_id, deduped);

        debug!(
            "Pre-processed {} logs: {} records, {} after dedup, {} excluded by filters, {} kept",
            source_id, original, outcome.total_lines, outcome.excluded_lines, outcome.kept_lines
        );
        (kept, outcome)
    }

    /// Measure the request against the model limit and pick a strategy.
    pub fn plan_budget(
        &self,
        source_id: &str,
        system_prompt: &str,
        log_text: &str,
        record_count: usize,
    ) -> Result<BudgetPlan, PipelineError> {
        let template = self
            .prompts
            .user_prompt(source_id, "", record_count)
            .map_err(|source| PipelineError::Prompt {
                stage: PromptStage::User,
                source,
            })?;

        let system_tokens = self.estimator.estimate_system_prompt_tokens(system_prompt);
        let user_overhead_tokens = self.estimator.estimate_user_prompt_tokens(&template);
        let log_tokens = self.estimator.count_tokens(log_text);
        let total_tokens = system_tokens + user_overhead_tokens + log_tokens;

        let available_tokens = self.model_limit as i64
            - RESPONSE_RESERVE_TOKENS as i64
            - system_tokens.max(SYSTEM_PROMPT_RESERVE_TOKENS) as i64;

        let strategy = if total_tokens + RESPONSE_RESERVE_TOKENS <= self.model_limit {
            Strategy::Direct
        } else {
            Strategy::Chunked
        };

        Ok(BudgetPlan {
            system_tokens,
            user_overhead_tokens,
            log_tokens,
            total_tokens,
            available_tokens,
            strategy,
        })
    }

    async fn analyze_direct(
        &self,
        source_id: &str,
        system_prompt: &str,
        log_text: &str,
        record_count: usize,
    ) -> Result<(String, usize), PipelineError> {
        let user_prompt = self
            .prompts
            .user_prompt(source_id, log_text, record_count)
            .map_err(|source| PipelineError::Prompt {
                stage: PromptStage::User,
                source,
            })?;

        let completion = self
            .guarded(self.provider.analyze(source_id, system_prompt, &user_prompt))
            .await
            .map_err(|source| PipelineError::Analysis { source })?;

        debug!(
            "Direct analysis of {} used {} prompt + {} completion tokens",
            source_id, completion.usage.prompt_tokens, completion.usage.completion_tokens
        );
        Ok((completion.text, completion.usage.total_tokens))
    }

    async fn analyze_chunked(
        &self,
        source_id: &str,
        system_prompt: &str,
        chunks: &[Chunk],
    ) -> Result<(String, usize), PipelineError> {
        let mut summaries: Vec<String> = Vec::with_capacity(chunks.len());
        let mut tokens_used = 0usize;

        for chunk in chunks {
            info!(
                "Summarizing chunk {}/{} of {} ({} records, ~{} tokens)",
                chunk.index + 1,
                chunk.total,
                source_id,
                chunk.len(),
                chunk.token_count
            );

            let chunk_prompt = self
                .prompts
                .chunk_prompt(source_id, &chunk.format(), chunk.index, chunk.total)
                .map_err(|source| PipelineError::Prompt {
                    stage: PromptStage::Chunk,
                    source,
                })?;

            let summary = self
                .guarded(self.provider.summarize_chunk(source_id, system_prompt, &chunk_prompt))
                .await
                .map_err(|source| PipelineError::ChunkSummary {
                    index: chunk.index,
                    total: chunk.total,
                    records: chunk.len(),
                    tokens: chunk.token_count,
                    source,
                })?;

            // Summaries carry no usage block, so charge estimated in + out.
            tokens_used += self.estimator.count_tokens(&chunk_prompt) + self.estimator.count_tokens(&summary);
            summaries.push(summary);
        }

        info!("Synthesizing {} chunk summaries for {}", summaries.len(), source_id);
        let synthesis_prompt = self
            .prompts
            .synthesis_prompt(source_id, &summaries)
            .map_err(|source| PipelineError::Prompt {
                stage: PromptStage::Synthesis,
                source,
            })?;

        let completion = self
            .guarded(self.provider.analyze(source_id, system_prompt, &synthesis_prompt))
            .await
            .map_err(|source| PipelineError::Synthesis {
                summaries: summaries.len(),
                source,
            })?;

        tokens_used += completion.usage.total_tokens;
        Ok((completion.text, tokens_used))
    }

    /// Race a provider request against cancellation and the request timeout.
    async fn guarded<T, F>(&self, request: F) -> Result<T, AIError>
    where
        F: Future<Output = Result<T, AIError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(AIError::Cancelled);
        }

        let timed = async {
            match self.request_timeout {
                Some(limit) => match tokio::time::timeout(limit, request).await {
                    Ok(result) => result,
                    Err(_) => Err(AIError::Timeout(limit)),
                },
                None => request.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                warn!("Provider request cancelled");
                Err(AIError::Cancelled)
            }
            result = timed => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai_provider::{MockCall, MockProvider, TokenUsage};
    use crate::tokens::{SYSTEM_PROMPT_OVERHEAD_TOKENS, USER_PROMPT_OVERHEAD_TOKENS};
    use std::collections::HashMap;

    /// One token per byte.
    struct ByteEstimator;

    impl TokenEstimator for ByteEstimator {
        fn count_tokens(&self, text: &str) -> usize {
            text.len()
        }
    }

    /// Prompts with trivially predictable sizes.
    struct PlainPrompts;

    impl PromptBuilder for PlainPrompts {
        fn system_prompt(&self, _source_id: &str) -> Result<String, PromptError> {
            Ok("system".to_string())
        }

        fn user_prompt(&self, _source_id: &str, log_text: &str, _count: usize) -> Result<String, PromptError> {
            Ok(format!("analyze:{}", log_text))
        }

        fn chunk_prompt(&self, _source_id: &str, text: &str, index: usize, total: usize) -> Result<String, PromptError> {
            Ok(format!("chunk {}/{}:{}", index, total, text))
        }

        fn synthesis_prompt(&self, _source_id: &str, summaries: &[String]) -> Result<String, PromptError> {
            Ok(summaries.join("\n"))
        }
    }

    struct BrokenPrompts;

    impl PromptBuilder for BrokenPrompts {
        fn system_prompt(&self, _source_id: &str) -> Result<String, PromptError> {
            Err(PromptError::UnknownPlaceholder {
                template: "system",
                placeholder: "nope".to_string(),
            })
        }

        fn user_prompt(&self, _: &str, _: &str, _: usize) -> Result<String, PromptError> {
            Ok(String::new())
        }

        fn chunk_prompt(&self, _: &str, _: &str, _: usize, _: usize) -> Result<String, PromptError> {
            Ok(String::new())
        }

        fn synthesis_prompt(&self, _: &str, _: &[String]) -> Result<String, PromptError> {
            Ok(String::new())
        }
    }

    const SYSTEM_COST: usize = 6 + SYSTEM_PROMPT_OVERHEAD_TOKENS;
    const USER_OVERHEAD: usize = 8 + USER_PROMPT_OVERHEAD_TOKENS;

    fn pipeline(provider: Arc<MockProvider>, model_limit: usize) -> Pipeline {
        Pipeline::new(provider)
            .with_estimator(Arc::new(ByteEstimator))
            .with_prompts(Arc::new(PlainPrompts))
            .with_model_limit(model_limit)
    }

    fn fixed_provider() -> Arc<MockProvider> {
        Arc::new(
            MockProvider::new()
                .with_analysis("final analysis")
                .with_usage(TokenUsage::new(100, 20)),
        )
    }

    /// `count` distinct records whose formatted cost is exactly 25 bytes.
    fn records_25(count: usize) -> Vec<LogRecord> {
        (0..count)
            .map(|i| LogRecord::primary(format!("record-{:04} padding-xxxx", i)))
            .collect()
    }

    /// Limit that forces the chunked path with the given chunk limit.
    fn chunked_limit(chunk_limit: usize) -> usize {
        RESPONSE_RESERVE_TOKENS + SYSTEM_PROMPT_RESERVE_TOKENS + chunk_limit * CHUNK_SIZE_DIVISOR as usize
    }

    #[test]
    fn test_fixture_sizes() {
        assert_eq!(records_25(1)[0].format().len(), 25);
    }

    #[tokio::test]
    async fn test_zero_records_no_calls() {
        let provider = fixed_provider();
        let result = pipeline(provider.clone(), DEFAULT_MODEL_CONTEXT_LIMIT)
            .analyze("web", Vec::new())
            .await
            .unwrap();

        assert_eq!(result.analysis, "No logs to analyze");
        assert_eq!(result.tokens_used, 0);
        assert_eq!(result.chunks_used, 0);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_direct_path() {
        let provider = fixed_provider();
        let records = vec![
            LogRecord::primary("hello"),
            LogRecord::primary("hello"),
            LogRecord::primary("world"),
        ];
        let result = pipeline(provider.clone(), DEFAULT_MODEL_CONTEXT_LIMIT)
            .analyze("web", records)
            .await
            .unwrap();

        assert_eq!(result.chunks_used, 1);
        assert_eq!(result.analysis, "final analysis");
        assert_eq!(result.tokens_used, 120);
        assert_eq!(result.original_count, 3);
        assert_eq!(result.processed_count, 3);
        assert!(!result.deduplicated);

        let calls = provider.calls();
        assert_eq!(calls.len(), 1);
        match &calls[0] {
            MockCall::Analyze { user_prompt, source_id } => {
                assert_eq!(source_id, "web");
                assert_eq!(user_prompt, "analyze:hello\nhello\nworld\n");
            }
            other => panic!("unexpected call {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_direct_boundary_is_inclusive() {
        let records = records_25(4);
        let exact = SYSTEM_COST + USER_OVERHEAD + 100 + RESPONSE_RESERVE_TOKENS;

        let direct = pipeline(fixed_provider(), exact).analyze("web", records.clone()).await.unwrap();
        assert_eq!(direct.chunks_used, 1);

        // One token short: chunked, and the fixed reserves leave nothing for chunks
        let provider = fixed_provider();
        let degenerate = pipeline(provider.clone(), exact - 1).analyze("web", records).await.unwrap();
        assert_eq!(degenerate.analysis, "No logs could be processed");
        assert_eq!(degenerate.chunks_used, 0);
        assert_eq!(degenerate.tokens_used, 0);
        assert_eq!(degenerate.processed_count, 4);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_chunked_path() {
        let provider = fixed_provider();
        let records = records_25(48);
        let result = pipeline(provider.clone(), chunked_limit(50))
            .analyze("web", records)
            .await
            .unwrap();

        assert_eq!(result.chunks_used, 24);
        assert_eq!(result.analysis, "final analysis");

        let calls = provider.calls();
        assert_eq!(calls.len(), 25);
        assert_eq!(provider.summarize_calls(), 24);

        let mut expected_tokens = 0;
        for (i, call) in calls[..24].iter().enumerate() {
            match call {
                MockCall::Summarize { chunk_prompt, .. } => {
                    assert!(chunk_prompt.starts_with(&format!("chunk {}/24:", i)));
                    let summary = format!("Summary {}: {} prompt lines", i + 1, chunk_prompt.lines().count());
                    expected_tokens += chunk_prompt.len() + summary.len();
                }
                other => panic!("expected summarize call, got {:?}", other),
            }
        }
        match &calls[24] {
            MockCall::Analyze { user_prompt, .. } => {
                assert!(user_prompt.starts_with("Summary 1:"));
                assert!(user_prompt.contains("Summary 24:"));
            }
            other => panic!("expected synthesis call, got {:?}", other),
        }
        assert_eq!(result.tokens_used, expected_tokens + 120);
    }

    #[tokio::test]
    async fn test_chunk_failure_aborts() {
        let provider = Arc::new(MockProvider::new().failing_summary_at(2));
        let err = pipeline(provider.clone(), chunked_limit(50))
            .analyze("web", records_25(48))
            .await
            .unwrap_err();

        match &err {
            PipelineError::ChunkSummary { index, total, records, tokens, .. } => {
                assert_eq!(*index, 2);
                assert_eq!(*total, 24);
                assert_eq!(*records, 2);
                assert_eq!(*tokens, 50);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(err.to_string().contains("chunk 2 of 24"));
        assert_eq!(err.ai_error().map(|e| e.category()), Some(crate::ai_provider::ErrorCategory::RateLimit));
        // Nothing after the failing chunk was requested
        assert_eq!(provider.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_synthesis_failure() {
        let provider = Arc::new(MockProvider::new().failing_analysis());
        let err = pipeline(provider, chunked_limit(50))
            .analyze("web", records_25(48))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Synthesis { summaries: 24, .. }));
    }

    #[tokio::test]
    async fn test_direct_failure() {
        let provider = Arc::new(MockProvider::new().failing_analysis());
        let err = pipeline(provider, DEFAULT_MODEL_CONTEXT_LIMIT)
            .analyze("web", records_25(2))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Analysis { .. }));
        assert_eq!(err.ai_error().and_then(|e| e.code()), Some("mock_failure".to_string()));
    }

    #[tokio::test]
    async fn test_prompt_error_propagates() {
        let provider = fixed_provider();
        let err = pipeline(provider.clone(), DEFAULT_MODEL_CONTEXT_LIMIT)
            .with_prompts(Arc::new(BrokenPrompts))
            .analyze("web", records_25(2))
            .await
            .unwrap_err();

        match err {
            PipelineError::Prompt { stage, source } => {
                assert_eq!(stage, PromptStage::System);
                assert!(matches!(source, PromptError::UnknownPlaceholder { .. }));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_dedup_and_filter_counts() {
        let mut patterns: HashMap<String, Vec<String>> = HashMap::new();
        patterns.insert("web".to_string(), vec!["^healthcheck".to_string()]);
        let filters = Arc::new(FilterSet::from_patterns(&patterns).unwrap());

        let records = vec![
            LogRecord::primary("retrying"),
            LogRecord::primary("retrying"),
            LogRecord::primary("retrying"),
            LogRecord::primary("healthcheck ok"),
            LogRecord::primary("failed to connect"),
        ];

        let provider = fixed_provider();
        let result = pipeline(provider.clone(), DEFAULT_MODEL_CONTEXT_LIMIT)
            .with_filters(filters)
            .analyze("web", records)
            .await
            .unwrap();

        assert!(result.deduplicated);
        assert_eq!(result.original_count, 5);
        assert_eq!(result.processed_count, 2);
        assert_eq!(
            result.filter_outcome,
            FilterOutcome {
                total_lines: 3,
                excluded_lines: 1,
                kept_lines: 2
            }
        );
        match &provider.calls()[0] {
            MockCall::Analyze { user_prompt, .. } => {
                assert_eq!(user_prompt, "analyze:[REPEAT x3] retrying\nfailed to connect\n");
            }
            other => panic!("unexpected call {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_everything_filtered() {
        let mut patterns: HashMap<String, Vec<String>> = HashMap::new();
        patterns.insert("web".to_string(), vec![".".to_string()]);
        let filters = Arc::new(FilterSet::from_patterns(&patterns).unwrap());

        let provider = fixed_provider();
        let result = pipeline(provider.clone(), DEFAULT_MODEL_CONTEXT_LIMIT)
            .with_filters(filters)
            .analyze("web", records_25(3))
            .await
            .unwrap();

        assert_eq!(result.analysis, "No logs to analyze");
        assert_eq!(result.filter_outcome.excluded_lines, 3);
        assert_eq!(result.original_count, 3);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let provider = fixed_provider();
        let pipeline = pipeline(provider, DEFAULT_MODEL_CONTEXT_LIMIT);
        pipeline.cancellation_token().cancel();

        let err = pipeline.analyze("web", records_25(2)).await.unwrap_err();
        assert!(matches!(err.ai_error(), Some(AIError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancel_in_flight() {
        let provider = Arc::new(MockProvider::new().with_delay(Duration::from_secs(30)));
        let token = CancellationToken::new();
        let pipeline = pipeline(provider, chunked_limit(50)).with_cancellation(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let started = std::time::Instant::now();
        let err = pipeline.analyze("web", records_25(48)).await.unwrap_err();
        canceller.await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        match err {
            PipelineError::ChunkSummary { index, source, .. } => {
                assert_eq!(index, 0);
                assert!(matches!(source, AIError::Cancelled));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let provider = Arc::new(MockProvider::new().with_delay(Duration::from_secs(30)));
        let err = pipeline(provider, DEFAULT_MODEL_CONTEXT_LIMIT)
            .with_request_timeout(Duration::from_millis(20))
            .analyze("web", records_25(2))
            .await
            .unwrap_err();

        match err {
            PipelineError::Analysis { source } => {
                assert!(matches!(source, AIError::Timeout(_)));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_plan_budget_numbers() {
        let p = pipeline(fixed_provider(), 10_000);
        let plan = p.plan_budget("web", "system", &"x".repeat(100), 4).unwrap();
        assert_eq!(plan.system_tokens, SYSTEM_COST);
        assert_eq!(plan.user_overhead_tokens, USER_OVERHEAD);
        assert_eq!(plan.log_tokens, 100);
        assert_eq!(plan.total_tokens, SYSTEM_COST + USER_OVERHEAD + 100);
        assert_eq!(
            plan.available_tokens,
            10_000 - RESPONSE_RESERVE_TOKENS as i64 - SYSTEM_PROMPT_RESERVE_TOKENS as i64
        );
        assert_eq!(plan.strategy, Strategy::Direct);
        assert_eq!(plan.chunk_limit(), Some((plan.available_tokens / 2) as usize));
    }

    #[test]
    fn test_system_prompt_cost_never_undercut() {
        let p = pipeline(fixed_provider(), 20_000);

        // Above the reserve the real cost is subtracted
        let long = "s".repeat(3_000 - SYSTEM_PROMPT_OVERHEAD_TOKENS);
        let plan = p.plan_budget("web", &long, "x", 1).unwrap();
        assert_eq!(plan.system_tokens, 3_000);
        assert_eq!(plan.available_tokens, 20_000 - RESPONSE_RESERVE_TOKENS as i64 - 3_000);

        // Below it the fixed margin is held back, which is never more than plain subtraction allows
        let plan = p.plan_budget("web", "system", "x", 1).unwrap();
        let plain = 20_000 - RESPONSE_RESERVE_TOKENS as i64 - plan.system_tokens as i64;
        assert!(plan.available_tokens < plain);
        assert_eq!(plan.available_tokens, plain - (SYSTEM_PROMPT_RESERVE_TOKENS - plan.system_tokens) as i64);
    }

    #[test]
    fn test_negative_budget_has_no_chunk_limit() {
        let p = pipeline(fixed_provider(), 100);
        let plan = p.plan_budget("web", "system", "x", 1).unwrap();
        assert!(plan.available_tokens < 0);
        assert_eq!(plan.strategy, Strategy::Chunked);
        assert_eq!(plan.chunk_limit(), None);
    }
}
