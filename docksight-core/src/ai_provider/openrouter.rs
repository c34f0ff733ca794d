use crate::ai_provider::{parse_error_body, AIError, Completion, CompletionProvider, ProviderOptions, TokenUsage};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
    total_tokens: Option<usize>,
}

/// Chat-completions client for OpenRouter and any other OpenAI-compatible
/// endpoint (OpenAI itself, local gateways).
pub struct OpenRouterProvider {
    client: Client,
    api_key: String,
    name: &'static str,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
}

impl OpenRouterProvider {
    pub fn new(api_key: String) -> Result<Self, AIError> {
        Ok(Self {
            client: Client::builder().build()?,
            api_key,
            name: "openrouter",
            base_url: OPENROUTER_BASE_URL.to_string(),
            model: "deepseek/deepseek-chat-v3.1:free".to_string(), // Default model
            max_tokens: 2000,
            temperature: 0.1,
            timeout: Duration::from_secs(120),
        })
    }

    /// Same client pointed at api.openai.com.
    pub fn openai(api_key: String) -> Result<Self, AIError> {
        let mut provider = Self::new(api_key)?;
        provider.name = "openai";
        provider.base_url = OPENAI_BASE_URL.to_string();
        provider.model = "gpt-4o-mini".to_string();
        Ok(provider)
    }

    pub fn with_model(mut self, model: String) -> Self {
        self.model = model;
        self
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_options(mut self, options: ProviderOptions) -> Self {
        if let Some(model) = options.model {
            self = self.with_model(model);
        }
        if let Some(base_url) = options.base_url {
            self = self.with_base_url(base_url);
        }
        if let Some(max_tokens) = options.max_tokens {
            self.max_tokens = max_tokens;
        }
        if let Some(temperature) = options.temperature {
            self.temperature = temperature;
        }
        if let Some(timeout) = options.timeout {
            self.timeout = timeout;
        }
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<ChatResponse, AIError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        debug!("Sending {} request to {}", self.name, self.endpoint());
        let response = self
            .client
            .post(self.endpoint())
            .timeout(self.timeout)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", "https://github.com/docksight/docksight")
            .header("X-Title", "Docksight")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Failed to send {} request: {}", self.name, e);
                AIError::RequestError(e)
            })?;

        let status = response.status();
        debug!("{} response status: {}", self.name, status);

        if status == 401 {
            error!("{} authentication failed", self.name);
            return Err(AIError::AuthenticationError);
        }

        if status == 429 {
            warn!("{} rate limit exceeded", self.name);
            return Err(AIError::RateLimited);
        }

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!("{} API error: {} - {}", self.name, status, error_text);
            let (code, message) = parse_error_body(&error_text);
            return Err(AIError::ProviderError {
                status: status.as_u16(),
                code,
                message,
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            error!("Failed to parse {} response: {}", self.name, e);
            AIError::InvalidResponse(format!("Failed to parse response: {}", e))
        })?;

        if parsed.choices.is_empty() {
            error!("No choices in {} response", self.name);
            return Err(AIError::InvalidResponse("No choices in response".to_string()));
        }

        Ok(parsed)
    }
}

fn into_completion(response: ChatResponse) -> Result<Completion, AIError> {
    let usage = match response.usage {
        Some(u) => TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens.unwrap_or(u.prompt_tokens + u.completion_tokens),
        },
        None => {
            warn!("Provider response carried no usage block");
            TokenUsage::default()
        }
    };

    let text = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| AIError::InvalidResponse("Empty message content".to_string()))?;

    Ok(Completion { text, usage })
}

#[async_trait::async_trait]
impl CompletionProvider for OpenRouterProvider {
    async fn analyze(
        &self,
        source_id: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<Completion, AIError> {
        info!("Starting {} analysis of {} with model: {}", self.name, source_id, self.model);
        let response = self.complete(system_prompt, user_prompt).await?;
        into_completion(response)
    }

    async fn summarize_chunk(
        &self,
        source_id: &str,
        system_prompt: &str,
        chunk_prompt: &str,
    ) -> Result<String, AIError> {
        debug!("Requesting chunk summary for {} ({} chars)", source_id, chunk_prompt.len());
        let response = self.complete(system_prompt, chunk_prompt).await?;
        into_completion(response).map(|c| c.text)
    }

    fn get_provider_name(&self) -> &str {
        self.name
    }
}
