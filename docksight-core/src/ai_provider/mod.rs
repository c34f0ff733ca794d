use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

#[cfg(feature = "ai-providers")]
pub mod claude;
pub mod mock;
#[cfg(feature = "ai-providers")]
pub mod openrouter;

#[cfg(feature = "ai-providers")]
pub use claude::ClaudeProvider;
pub use mock::{MockCall, MockProvider};
#[cfg(feature = "ai-providers")]
pub use openrouter::OpenRouterProvider;

#[derive(Error, Debug)]
pub enum AIError {
    #[cfg(feature = "ai-providers")]
    #[error("API request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Authentication failed")]
    AuthenticationError,
    #[error("Rate limited")]
    RateLimited,
    #[error("Provider returned HTTP {status}: {message}")]
    ProviderError {
        status: u16,
        code: Option<String>,
        message: String,
    },
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Request cancelled")]
    Cancelled,
    #[error("No API key configured for provider {0}")]
    MissingApiKey(String),
    #[error("Provider not supported: {0}")]
    UnsupportedProvider(String),
}

/// Coarse classification of an [`AIError`], stable enough to match on or log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Authentication,
    RateLimit,
    Provider,
    InvalidResponse,
    Timeout,
    Cancelled,
    Configuration,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Provider => "provider",
            ErrorCategory::InvalidResponse => "invalid_response",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Cancelled => "cancelled",
            ErrorCategory::Configuration => "configuration",
        };
        f.write_str(tag)
    }
}

impl AIError {
    pub fn message(&self) -> String {
        self.to_string()
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            #[cfg(feature = "ai-providers")]
            AIError::RequestError(e) if e.is_timeout() => ErrorCategory::Timeout,
            #[cfg(feature = "ai-providers")]
            AIError::RequestError(_) => ErrorCategory::Network,
            AIError::InvalidResponse(_) => ErrorCategory::InvalidResponse,
            AIError::AuthenticationError => ErrorCategory::Authentication,
            AIError::RateLimited => ErrorCategory::RateLimit,
            AIError::ProviderError { .. } => ErrorCategory::Provider,
            AIError::Timeout(_) => ErrorCategory::Timeout,
            AIError::Cancelled => ErrorCategory::Cancelled,
            AIError::MissingApiKey(_) | AIError::UnsupportedProvider(_) => ErrorCategory::Configuration,
        }
    }

    /// Provider-specific error code, when the provider reported one.
    pub fn code(&self) -> Option<String> {
        match self {
            AIError::ProviderError { code, status, .. } => {
                code.clone().or_else(|| Some(status.to_string()))
            }
            AIError::AuthenticationError => Some("401".to_string()),
            AIError::RateLimited => Some("429".to_string()),
            _ => None,
        }
    }
}

/// Token accounting as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

impl TokenUsage {
    pub fn new(prompt_tokens: usize, completion_tokens: usize) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// A full analysis response: the model's text plus its reported usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

/// Request/response contract with a language model. Implementations never
/// retry internally; every failure goes straight back to the caller.
#[async_trait::async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn analyze(
        &self,
        source_id: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<Completion, AIError>;

    /// Summarize one chunk of a larger log. Usage is not reported.
    async fn summarize_chunk(
        &self,
        source_id: &str,
        system_prompt: &str,
        chunk_prompt: &str,
    ) -> Result<String, AIError>;

    fn get_provider_name(&self) -> &str;
}

/// Settings shared by the HTTP providers.
#[derive(Debug, Clone, Default)]
pub struct ProviderOptions {
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub timeout: Option<Duration>,
}

pub fn create_provider(provider_name: &str, api_key: Option<&str>) -> Result<Box<dyn CompletionProvider>, AIError> {
    create_provider_with_options(provider_name, api_key, ProviderOptions::default())
}

pub fn create_provider_with_options(
    provider_name: &str,
    api_key: Option<&str>,
    options: ProviderOptions,
) -> Result<Box<dyn CompletionProvider>, AIError> {
    info!("Creating AI provider: {} with model: {:?}", provider_name, options.model);
    let name = provider_name.to_lowercase();

    if name == "mock" {
        debug!("Initializing offline mock provider");
        return Ok(Box::new(MockProvider::new()));
    }

    #[cfg(feature = "ai-providers")]
    {
        let require_key = || {
            api_key
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .ok_or_else(|| AIError::MissingApiKey(name.clone()))
        };

        match name.as_str() {
            "openrouter" => {
                debug!("Initializing OpenRouter provider");
                let provider = OpenRouterProvider::new(require_key()?)?.with_options(options);
                return Ok(Box::new(provider));
            }
            "openai" => {
                debug!("Initializing OpenAI provider");
                let provider = OpenRouterProvider::openai(require_key()?)?.with_options(options);
                return Ok(Box::new(provider));
            }
            "claude" | "anthropic" => {
                debug!("Initializing Claude/Anthropic provider");
                let provider = ClaudeProvider::new(require_key()?)?.with_options(options);
                return Ok(Box::new(provider));
            }
            _ => {}
        }
    }

    #[cfg(not(feature = "ai-providers"))]
    let _ = (api_key, options);

    error!("Unsupported AI provider: {}", provider_name);
    Err(AIError::UnsupportedProvider(provider_name.to_string()))
}

/// Pull `error.code` / `error.type` and `error.message` out of a JSON error
/// body. Both OpenAI-style and Anthropic-style bodies nest them under `error`.
pub(crate) fn parse_error_body(body: &str) -> (Option<String>, String) {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));

    let code = error.and_then(|e| {
        e.get("code")
            .or_else(|| e.get("type"))
            .and_then(|c| match c {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
    });

    let message = error
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string());

    (code, message)
}
