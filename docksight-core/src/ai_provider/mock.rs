//! Offline provider with scripted behaviour.
//!
//! Used by the test suite and by `--provider mock` dry runs, where the whole
//! pipeline runs without network access.

use crate::ai_provider::{AIError, Completion, CompletionProvider, TokenUsage};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// One request observed by a [`MockProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Analyze { source_id: String, user_prompt: String },
    Summarize { source_id: String, chunk_prompt: String },
}

pub struct MockProvider {
    analysis: String,
    usage: Option<TokenUsage>,
    fail_summary_at: Option<usize>,
    fail_analysis: bool,
    delay: Option<Duration>,
    calls: Mutex<Vec<MockCall>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            analysis: "Mock analysis: no provider was contacted.".to_string(),
            usage: None,
            fail_summary_at: None,
            fail_analysis: false,
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_analysis(mut self, analysis: impl Into<String>) -> Self {
        self.analysis = analysis.into();
        self
    }

    /// Report this usage from every `analyze` call instead of deriving it
    /// from prompt length.
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Fail the summarize call with this 0-based call index.
    pub fn failing_summary_at(mut self, index: usize) -> Self {
        self.fail_summary_at = Some(index);
        self
    }

    pub fn failing_analysis(mut self) -> Self {
        self.fail_analysis = true;
        self
    }

    /// Sleep before answering, to exercise timeouts and cancellation.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.lock_calls().clone()
    }

    pub fn summarize_calls(&self) -> usize {
        self.lock_calls()
            .iter()
            .filter(|c| matches!(c, MockCall::Summarize { .. }))
            .count()
    }

    fn lock_calls(&self) -> std::sync::MutexGuard<'_, Vec<MockCall>> {
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CompletionProvider for MockProvider {
    async fn analyze(
        &self,
        source_id: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<Completion, AIError> {
        self.lock_calls().push(MockCall::Analyze {
            source_id: source_id.to_string(),
            user_prompt: user_prompt.to_string(),
        });
        self.pause().await;

        if self.fail_analysis {
            return Err(AIError::ProviderError {
                status: 500,
                code: Some("mock_failure".to_string()),
                message: "scripted analysis failure".to_string(),
            });
        }

        let usage = self.usage.unwrap_or_else(|| {
            TokenUsage::new(
                (system_prompt.len() + user_prompt.len()) / 4,
                self.analysis.len() / 4,
            )
        });
        debug!("Mock analysis for {} ({} tokens)", source_id, usage.total_tokens);

        Ok(Completion {
            text: self.analysis.clone(),
            usage,
        })
    }

    async fn summarize_chunk(
        &self,
        source_id: &str,
        _system_prompt: &str,
        chunk_prompt: &str,
    ) -> Result<String, AIError> {
        let index = {
            let mut calls = self.lock_calls();
            let index = calls
                .iter()
                .filter(|c| matches!(c, MockCall::Summarize { .. }))
                .count();
            calls.push(MockCall::Summarize {
                source_id: source_id.to_string(),
                chunk_prompt: chunk_prompt.to_string(),
            });
            index
        };
        self.pause().await;

        if self.fail_summary_at == Some(index) {
            return Err(AIError::RateLimited);
        }

        Ok(format!(
            "Summary {}: {} prompt lines",
            index + 1,
            chunk_prompt.lines().count()
        ))
    }

    fn get_provider_name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_calls_in_order() {
        let provider = MockProvider::new();
        provider.summarize_chunk("web", "sys", "a\nb").await.unwrap();
        provider.analyze("web", "sys", "user").await.unwrap();

        let calls = provider.calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(calls[0], MockCall::Summarize { .. }));
        assert!(matches!(calls[1], MockCall::Analyze { .. }));
        assert_eq!(provider.summarize_calls(), 1);
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let provider = MockProvider::new().failing_summary_at(1).failing_analysis();
        assert!(provider.summarize_chunk("x", "", "one").await.is_ok());
        assert!(provider.summarize_chunk("x", "", "two").await.is_err());
        assert!(provider.analyze("x", "", "").await.is_err());
    }

    #[tokio::test]
    async fn test_fixed_usage() {
        let provider = MockProvider::new()
            .with_analysis("done")
            .with_usage(TokenUsage::new(10, 5));
        let completion = provider.analyze("x", "sys", "user").await.unwrap();
        assert_eq!(completion.text, "done");
        assert_eq!(completion.usage.total_tokens, 15);
    }
}
