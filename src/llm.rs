//! Chat-completion provider abstraction.
//!
//! [`ChatProvider`] is the seam the fact-check orchestrator talks through;
//! [`OpenAiChat`] is the production implementation. Requests always run in
//! JSON mode with a low temperature so the model's output stays inside the
//! structured verdict contract.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::config::LlmConfig;
use crate::models::TokenUsage;

/// Default API endpoint; overridable for tests and proxies.
pub const OPENAI_API_BASE: &str = "https://api.openai.com";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("OPENAI_API_KEY environment variable not set")]
    MissingApiKey,
    #[error("chat request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("chat API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("malformed chat response: {0}")]
    Malformed(String),
}

/// A completed chat turn: the raw text plus provider accounting.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub usage: TokenUsage,
}

/// One-shot structured chat completion.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<ChatResponse, LlmError>;
    fn model_name(&self) -> &str;
}

/// Chat provider backed by the OpenAI `/v1/chat/completions` endpoint.
pub struct OpenAiChat {
    model: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiChat {
    /// Build a client from configuration. Requires `OPENAI_API_KEY`.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| LlmError::MissingApiKey)?;
        Self::new(config, api_key)
    }

    pub fn new(config: &LlmConfig, api_key: String) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            api_key,
            base_url: OPENAI_API_BASE.to_string(),
            client,
        })
    }

    /// Point the client at a different endpoint (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl ChatProvider for OpenAiChat {
    async fn complete(&self, system: &str, user: &str) -> Result<ChatResponse, LlmError> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });
        let url = format!("{}/v1/chat/completions", self.base_url);

        let mut last_err: Option<LlmError> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let response = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match response {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_chat_response(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let api_err = LlmError::Api {
                        status: status.as_u16(),
                        body: body_text,
                    };

                    // Rate limits and server errors are transient.
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(api_err);
                        continue;
                    }
                    return Err(api_err);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| LlmError::Malformed("chat failed after retries".to_string())))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn parse_chat_response(json: &serde_json::Value) -> Result<ChatResponse, LlmError> {
    let content = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| LlmError::Malformed("missing choices[0].message.content".to_string()))?
        .to_string();

    let model = json
        .get("model")
        .and_then(|m| m.as_str())
        .unwrap_or_default()
        .to_string();

    let usage = json
        .get("usage")
        .map(|u| TokenUsage {
            prompt_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            completion_tokens: u
                .get("completion_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32,
            total_tokens: u.get("total_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        })
        .unwrap_or_default();

    Ok(ChatResponse {
        content,
        model,
        usage,
    })
}
