//! Structured-judgment client.
//!
//! Both AI stages of the pipeline (performance scoring and story analysis)
//! consume the same contract: hand over a system prompt and a user prompt,
//! get back one JSON document as a string. Any OpenAI-compatible
//! chat/completions endpoint satisfies it; the provider is configuration.

use async_trait::async_trait;
use serde_json::Value;

#[derive(thiserror::Error, Debug)]
pub enum JudgmentError {
    #[error("Request failed")]
    Request(#[from] reqwest::Error),
    #[error("Request failed with status {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("Failed to parse JSON")]
    Parse(#[from] serde_json::Error),
    #[error("Response carried no content")]
    MissingContent,
    #[error("No API key configured")]
    MissingApiKey,
}

/// One structured-judgment call: prompts in, a JSON string out.
///
/// Implementations must treat a timeout or malformed payload as an `Err`;
/// callers fall back to deterministic-only behavior on any failure.
#[async_trait]
pub trait JudgmentProvider: Send + Sync {
    async fn complete_json(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, JudgmentError>;
}

/// OpenAI-compatible chat/completions client.
#[derive(Debug, Clone)]
pub struct ChatCompletionClient {
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
    client: reqwest::Client,
}

impl ChatCompletionClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        max_tokens: u32,
        temperature: f64,
        timeout_ms: u64,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            max_tokens,
            temperature,
            client,
        }
    }

    /// Build a client from config, or `None` when no API key is available.
    pub fn from_config(config: &crate::config::JudgeConfig) -> Option<Self> {
        let api_key = config.api_key.as_deref()?;
        if api_key.is_empty() {
            return None;
        }
        Some(Self::new(
            config.base_url.clone(),
            api_key,
            config.model.clone(),
            config.max_tokens,
            config.temperature,
            config.timeout_ms,
        ))
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl JudgmentProvider for ChatCompletionClient {
    async fn complete_json(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, JudgmentError> {
        if self.api_key.is_empty() {
            return Err(JudgmentError::MissingApiKey);
        }

        let url = format!("{}/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_prompt },
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "response_format": { "type": "json_object" },
        });

        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let detail: String = res
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(300)
                .collect();
            return Err(JudgmentError::Status {
                status: status.as_u16(),
                detail,
            });
        }

        let value: Value = res.json().await?;
        let content = value
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or(JudgmentError::MissingContent)?;

        Ok(content.to_string())
    }
}
