//! Text-completion provider abstraction.
//!
//! Every model-backed step of the pipeline (routing, query generation,
//! repair, answer synthesis) goes through a [`CompletionProvider`]. The
//! provider is constructed once from [`CompletionConfig`] and injected into
//! each component, which keeps prompts testable with scripted fakes.
//!
//! # Providers
//!
//! | Config Value | Provider |
//! |-------------|----------|
//! | `"disabled"` | [`DisabledCompletion`] |
//! | `"openai"` | [`ChatCompletionsProvider`] against `https://api.openai.com/v1` (or `url`) |
//! | `"ollama"` | [`ChatCompletionsProvider`] against `http://localhost:11434/v1` (or `url`) |
//!
//! # Retry Strategy
//!
//! - HTTP 429 and 5xx → retry with exponential backoff (1s, 2s, 4s, … capped at 2^5)
//! - Timeouts and connection errors → retry
//! - Other 4xx → fail immediately
//!
//! When retries run out the last error is returned as a [`ProviderError`],
//! never swallowed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::CompletionConfig;
use crate::error::ProviderError;

/// A chat-style text completion backend.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Model identifier, for logs.
    fn model_name(&self) -> &str;

    /// Complete a system + user prompt pair and return the reply text.
    async fn complete(&self, system_prompt: &str, user_prompt: &str)
        -> Result<String, ProviderError>;
}

/// Provider used when `completion.provider = "disabled"`; every call fails.
pub struct DisabledCompletion;

#[async_trait]
impl CompletionProvider for DisabledCompletion {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _system: &str, _user: &str) -> Result<String, ProviderError> {
        Err(ProviderError::Config(
            "completion provider is disabled; set [completion] provider in config".to_string(),
        ))
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible `POST {base}/chat/completions` client.
///
/// Works against OpenAI itself and any server exposing the same API
/// (Ollama's `/v1`, LM Studio, vLLM).
pub struct ChatCompletionsProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_retries: u32,
    timeout_secs: u64,
}

impl ChatCompletionsProvider {
    pub fn new(config: &CompletionConfig) -> Result<Self, ProviderError> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| ProviderError::Config("completion.model required".to_string()))?;

        let default_url = match config.provider.as_str() {
            "ollama" => "http://localhost:11434/v1",
            _ => "https://api.openai.com/v1",
        };
        let base_url = config
            .url
            .clone()
            .unwrap_or_else(|| default_url.to_string())
            .trim_end_matches('/')
            .to_string();

        let api_key = std::env::var("OPENAI_API_KEY").ok();
        if config.provider == "openai" && config.url.is_none() && api_key.is_none() {
            return Err(ProviderError::Config(
                "OPENAI_API_KEY environment variable not set".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProviderError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            api_key,
            model,
            temperature: config.temperature,
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
        })
    }

    async fn send_once(&self, body: &ChatRequest<'_>) -> Result<String, ProviderError> {
        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, self.timeout_secs))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::RateLimited(text));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, self.timeout_secs))?;
        parse_chat_response(&text)
    }
}

#[async_trait]
impl CompletionProvider for ChatCompletionsProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, ProviderError> {
        let mut messages = Vec::with_capacity(2);
        if !system_prompt.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: system_prompt,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: user_prompt,
        });
        let body = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
        };

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            match self.send_once(&body).await {
                Ok(text) => {
                    debug!(model = %self.model, attempt, "completion succeeded");
                    return Ok(text);
                }
                Err(e) if e.is_transient() => {
                    warn!(model = %self.model, attempt, error = %e, "completion failed, retrying");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| {
            ProviderError::Unavailable("completion failed after retries".to_string())
        }))
    }
}

/// Extract `choices[0].message.content` from a chat-completions body.
fn parse_chat_response(body: &str) -> Result<String, ProviderError> {
    let parsed: ChatResponse = serde_json::from_str(body).map_err(|e| {
        let preview: String = body.chars().take(200).collect();
        ProviderError::Malformed(format!("{}: {}", e, preview))
    })?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| ProviderError::Malformed("response has no message content".to_string()))
}

/// Create the [`CompletionProvider`] selected by configuration.
pub fn create_completion(
    config: &CompletionConfig,
) -> Result<Box<dyn CompletionProvider>, ProviderError> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledCompletion)),
        "openai" | "ollama" => Ok(Box::new(ChatCompletionsProvider::new(config)?)),
        other => Err(ProviderError::Config(format!(
            "Unknown completion provider: {}",
            other
        ))),
    }
}
