use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use thiserror::Error;

use crate::core::config::AiSettings;
use crate::services::retry::Retryable;

#[derive(Debug, Error)]
pub enum AiRequestError {
    #[error("completion transport error: {0}")]
    Transport(String),
    #[error("completion request timed out after {0:?}")]
    Timeout(Duration),
    #[error("completion API returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("completion response has no message content")]
    MissingContent,
    #[error("completion content is not a JSON object")]
    Malformed,
}

impl Retryable for AiRequestError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS
                    || *status == StatusCode::REQUEST_TIMEOUT
                    || status.is_server_error()
            }
            _ => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
    /// JPEG bytes, base64-encoded. Sent as an inline data URL when present.
    pub image_base64: Option<String>,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl CompletionRequest {
    pub fn payload(&self) -> Value {
        let user_content = match &self.image_base64 {
            Some(image) => json!([
                {"type": "text", "text": self.user_prompt},
                {
                    "type": "image_url",
                    "image_url": {"url": format!("data:image/jpeg;base64,{image}")}
                }
            ]),
            None => Value::String(self.user_prompt.clone()),
        };

        json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": self.system_prompt},
                {"role": "user", "content": user_content}
            ],
            "max_completion_tokens": self.max_tokens,
            "temperature": self.temperature,
            "response_format": {"type": "json_object"}
        })
    }
}

/// A single chat-completion round trip. Implementations return the raw
/// message content; parsing and retries belong to the caller.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, AiRequestError>;
}

#[derive(Debug, Clone)]
pub struct OpenAiCompletionClient {
    client: Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl OpenAiCompletionClient {
    pub fn from_settings(settings: &AiSettings) -> Result<Self> {
        let timeout = Duration::from_secs(settings.request_timeout);
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30).min(timeout))
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_key: settings.openai_api_key.clone(),
            base_url: settings.openai_base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, AiRequestError> {
        let url = format!("{}/chat/completions", self.base_url);
        tracing::debug!(
            model = %request.model,
            with_image = request.image_base64.is_some(),
            "Sending completion request"
        );

        let send = self.client.post(&url).bearer_auth(&self.api_key).json(&request.payload()).send();
        let response = match tokio::time::timeout(self.timeout, send).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) if err.is_timeout() => return Err(AiRequestError::Timeout(self.timeout)),
            Ok(Err(err)) => return Err(AiRequestError::Transport(err.to_string())),
            Err(_) => return Err(AiRequestError::Timeout(self.timeout)),
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiRequestError::Status { status, body });
        }

        let body: Value =
            response.json().await.map_err(|err| AiRequestError::Transport(err.to_string()))?;

        if let Some(tokens) =
            body.get("usage").and_then(|usage| usage.get("total_tokens")).and_then(Value::as_u64)
        {
            tracing::debug!(model = %request.model, tokens, "Completion received");
        }

        message_content(&body).ok_or(AiRequestError::MissingContent)
    }
}

fn message_content(body: &Value) -> Option<String> {
    body.get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .map(ToString::to_string)
}
