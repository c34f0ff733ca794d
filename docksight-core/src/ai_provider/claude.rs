use crate::ai_provider::{parse_error_body, AIError, Completion, CompletionProvider, ProviderOptions, TokenUsage};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";

#[derive(Debug, Serialize)]
struct ClaudeRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<ClaudeMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ClaudeMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    content: Vec<ClaudeContent>,
    usage: Option<ClaudeUsage>,
}

#[derive(Debug, Deserialize)]
struct ClaudeContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ClaudeUsage {
    input_tokens: usize,
    output_tokens: usize,
}

pub struct ClaudeProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
}

impl ClaudeProvider {
    pub fn new(api_key: String) -> Result<Self, AIError> {
        Ok(Self {
            client: Client::builder().build()?,
            api_key,
            base_url: ANTHROPIC_BASE_URL.to_string(),
            model: "claude-3-5-haiku-latest".to_string(),
            max_tokens: 2000,
            temperature: 0.1,
            timeout: Duration::from_secs(120),
        })
    }

    pub fn with_model(mut self, model: String) -> Self {
        self.model = model;
        self
    }

    pub fn with_options(mut self, options: ProviderOptions) -> Self {
        if let Some(model) = options.model {
            self.model = model;
        }
        if let Some(base_url) = options.base_url {
            self.base_url = base_url.trim_end_matches('/').to_string();
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

    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<Completion, AIError> {
        let request = ClaudeRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: self.temperature, // Low temperature for factual responses
            system: system_prompt,
            messages: vec![ClaudeMessage {
                role: "user",
                content: user_prompt,
            }],
        };

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .timeout(self.timeout)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        debug!("Claude response status: {}", status);

        if status == 401 {
            return Err(AIError::AuthenticationError);
        }

        if status == 429 {
            warn!("Claude rate limit exceeded");
            return Err(AIError::RateLimited);
        }

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!("Claude API error: {} - {}", status, error_text);
            let (code, message) = parse_error_body(&error_text);
            return Err(AIError::ProviderError {
                status: status.as_u16(),
                code,
                message,
            });
        }

        let parsed: ClaudeResponse = response
            .json()
            .await
            .map_err(|e| AIError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        into_completion(parsed)
    }
}

fn into_completion(response: ClaudeResponse) -> Result<Completion, AIError> {
    let text: String = response
        .content
        .iter()
        .filter(|c| c.kind == "text")
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    if text.trim().is_empty() {
        return Err(AIError::InvalidResponse("No content in response".to_string()));
    }

    let usage = response
        .usage
        .map(|u| TokenUsage::new(u.input_tokens, u.output_tokens))
        .unwrap_or_default();

    Ok(Completion { text, usage })
}

#[async_trait::async_trait]
impl CompletionProvider for ClaudeProvider {
    async fn analyze(
        &self,
        source_id: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<Completion, AIError> {
        info!("Starting Claude analysis of {} with model: {}", source_id, self.model);
        self.complete(system_prompt, user_prompt).await
    }

    async fn summarize_chunk(
        &self,
        source_id: &str,
        system_prompt: &str,
        chunk_prompt: &str,
    ) -> Result<String, AIError> {
        debug!("Requesting Claude chunk summary for {}", source_id);
        self.complete(system_prompt, chunk_prompt).await.map(|c| c.text)
    }

    fn get_provider_name(&self) -> &str {
        "claude"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claude_provider_creation() {
        let provider = ClaudeProvider::new("test_key".to_string()).unwrap();
        assert_eq!(provider.api_key, "test_key");
        assert_eq!(provider.model, "claude-3-5-haiku-latest");
    }

    #[test]
    fn test_claude_provider_with_model() {
        let provider = ClaudeProvider::new("test_key".to_string())
            .unwrap()
            .with_model("claude-3-opus-20240229".to_string());
        assert_eq!(provider.model, "claude-3-opus-20240229");
    }

    #[test]
    fn test_completion_joins_text_blocks() {
        let body = r#"{
            "content": [
                {"type": "text", "text": "First part"},
                {"type": "tool_use", "id": "x"},
                {"type": "text", "text": "Second part"}
            ],
            "usage": {"input_tokens": 900, "output_tokens": 100}
        }"#;
        let response: ClaudeResponse = serde_json::from_str(body).unwrap();
        let completion = into_completion(response).unwrap();
        assert_eq!(completion.text, "First part\nSecond part");
        assert_eq!(completion.usage.total_tokens, 1000);
    }

    #[test]
    fn test_no_text_is_invalid() {
        let response: ClaudeResponse = serde_json::from_str(r#"{"content": []}"#).unwrap();
        assert!(matches!(into_completion(response), Err(AIError::InvalidResponse(_))));
    }
}
