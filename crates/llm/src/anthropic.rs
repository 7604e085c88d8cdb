//! Anthropic Claude provider (Messages API).

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{LlmError, LlmResult};

use super::provider::{AIMessage, AIProvider, AIResponse, AIRole, GenerateOptions, TokenUsage};

/// Anthropic API endpoint
const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

/// Anthropic API version
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Default model
const DEFAULT_MODEL: &str = "claude-3-5-haiku-20241022";

/// Default request timeout. Analysis prompts are large and responses long.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);

/// Fallback wait when a 429 carries no retry-after header.
const DEFAULT_RETRY_AFTER_SECS: u64 = 10;

/// Supported Anthropic models
const SUPPORTED_MODELS: &[&str] = &[
    "claude-sonnet-4-5-20250929",
    "claude-opus-4-1-20250805",
    "claude-sonnet-4-20250514",
    "claude-3-7-sonnet-20250219",
    "claude-3-5-haiku-20241022",
    "claude-3-haiku-20240307",
    // Short names for convenience
    "opus",
    "sonnet",
    "haiku",
];

/// Map short names to their canonical API identifiers.
fn normalize_model(model: &str) -> &str {
    match model {
        "opus" => "claude-opus-4-1-20250805",
        "sonnet" => "claude-sonnet-4-5-20250929",
        "haiku" => "claude-3-5-haiku-20241022",
        _ => model,
    }
}

/// Anthropic API request message
#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

/// Anthropic API request
#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
}

/// Anthropic API response content block
#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: String,
}

/// Anthropic API usage
#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

/// Anthropic API response
#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    model: String,
    usage: AnthropicUsage,
}

/// Anthropic API error
#[derive(Debug, Deserialize)]
struct AnthropicError {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

/// Anthropic API error response
#[derive(Debug, Deserialize)]
struct AnthropicErrorResponse {
    error: AnthropicError,
}

/// Anthropic Claude provider.
pub struct AnthropicProvider {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider with an API key.
    pub fn new(api_key: impl Into<String>) -> LlmResult<Self> {
        Ok(Self {
            client: build_client(DEFAULT_TIMEOUT)?,
            api_key: Some(api_key.into()),
            base_url: ANTHROPIC_API_URL.to_string(),
        })
    }

    /// Create from the `ANTHROPIC_API_KEY` environment variable.
    ///
    /// A missing key is not an error here; calls fail with
    /// [`LlmError::NotConfigured`] instead.
    pub fn from_env() -> LlmResult<Self> {
        Ok(Self {
            client: build_client(DEFAULT_TIMEOUT)?,
            api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
            base_url: ANTHROPIC_API_URL.to_string(),
        })
    }

    /// Set a custom base URL.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Replace the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> LlmResult<Self> {
        self.client = build_client(timeout)?;
        Ok(self)
    }

    /// Convert messages to Anthropic format, extracting system messages.
    fn convert_messages(messages: &[AIMessage]) -> (Option<String>, Vec<AnthropicMessage>) {
        let mut system: Option<String> = None;
        let mut converted = Vec::new();

        for msg in messages {
            match msg.role {
                AIRole::System => {
                    // Anthropic takes a single system field; join multiples
                    system = Some(match system {
                        Some(existing) => format!("{existing}\n\n{}", msg.content),
                        None => msg.content.clone(),
                    });
                }
                AIRole::User => converted.push(AnthropicMessage {
                    role: "user",
                    content: msg.content.clone(),
                }),
            }
        }

        (system, converted)
    }
}

fn build_client(timeout: Duration) -> LlmResult<Client> {
    Ok(Client::builder().timeout(timeout).build()?)
}

fn retry_after_secs(response: &reqwest::Response) -> u64 {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

#[async_trait]
impl AIProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn supported_models(&self) -> Vec<&str> {
        SUPPORTED_MODELS.to_vec()
    }

    async fn generate_text(
        &self,
        model: &str,
        messages: &[AIMessage],
        options: &GenerateOptions,
    ) -> LlmResult<AIResponse> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| LlmError::NotConfigured("ANTHROPIC_API_KEY not set".to_string()))?;

        let (system, converted_messages) = Self::convert_messages(messages);

        let request = AnthropicRequest {
            model: normalize_model(model).to_string(),
            messages: converted_messages,
            max_tokens: options.max_tokens.unwrap_or(4096),
            system,
            temperature: options.temperature,
            top_p: options.top_p,
            top_k: options.top_k,
            stop_sequences: options.stop_sequences.clone(),
        };

        tracing::debug!(
            model = %request.model,
            metadata = ?options.metadata,
            "Calling Claude API"
        );

        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = retry_after_secs(&response);
            tracing::warn!(retry_after_secs, "Anthropic API rate limited");
            return Err(LlmError::RateLimited { retry_after_secs });
        }

        let body = response.text().await?;

        if !status.is_success() {
            let message = match serde_json::from_str::<AnthropicErrorResponse>(&body) {
                Ok(error_response) => format!(
                    "{} - {}",
                    error_response.error.error_type, error_response.error.message
                ),
                Err(_) => body,
            };
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: AnthropicResponse = serde_json::from_str(&body)?;

        let text = parsed
            .content
            .iter()
            .filter(|block| block.content_type == "text")
            .map(|block| block.text.as_str())
            .collect::<String>();

        let usage = TokenUsage::new(parsed.usage.input_tokens, parsed.usage.output_tokens);
        tracing::debug!(
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            chars = text.len(),
            "Claude API call complete"
        );

        Ok(AIResponse {
            text,
            usage,
            model: parsed.model,
            provider: "anthropic".to_string(),
        })
    }
}

/// Get the default Anthropic model.
pub fn default_model() -> &'static str {
    DEFAULT_MODEL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_name() {
        let provider = AnthropicProvider::new("test-key").unwrap();
        assert_eq!(provider.name(), "anthropic");
        assert!(provider.is_configured());
    }

    #[test]
    fn test_supported_models() {
        let provider = AnthropicProvider::new("test-key").unwrap();
        assert!(provider.supports_model("claude-3-5-haiku-20241022"));
        assert!(provider.supports_model("haiku"));
        assert!(!provider.supports_model("gpt-4"));
    }

    #[test]
    fn test_normalize_model() {
        assert_eq!(normalize_model("haiku"), "claude-3-5-haiku-20241022");
        assert_eq!(
            normalize_model("claude-sonnet-4-20250514"),
            "claude-sonnet-4-20250514"
        );
    }

    #[test]
    fn test_message_conversion() {
        let messages = vec![
            AIMessage::system("You are an SEO analyst"),
            AIMessage::system("Answer in English"),
            AIMessage::user("Analyze this"),
            AIMessage::user("Stay within the format"),
        ];

        let (system, converted) = AnthropicProvider::convert_messages(&messages);

        assert_eq!(
            system,
            Some("You are an SEO analyst\n\nAnswer in English".to_string())
        );
        assert_eq!(converted.len(), 2);
        assert!(converted.iter().all(|m| m.role == "user"));
        assert_eq!(converted[1].content, "Stay within the format");
    }
}
