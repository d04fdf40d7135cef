//! Chat-completion capability used for classification and metadata extraction.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::config::CompletionSettings;
use crate::TARGET_LLM_REQUEST;

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Structured-output mode requested from the completion endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    JsonObject,
}

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("completion endpoint returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("completion response missing message content")]
    MissingContent,
}

/// A single request/response chat-completion call. No streaming; retries, if
/// any, belong to the caller.
#[async_trait]
pub trait TextCompleter: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        response_format: Option<ResponseFormat>,
    ) -> Result<String, CompletionError>;
}

/// Reqwest-backed client for an OpenAI-compatible chat-completions endpoint.
pub struct CompletionClient {
    client: reqwest::Client,
    settings: CompletionSettings,
}

impl CompletionClient {
    pub fn new(settings: CompletionSettings) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()?;
        Ok(CompletionClient { client, settings })
    }
}

#[async_trait]
impl TextCompleter for CompletionClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        response_format: Option<ResponseFormat>,
    ) -> Result<String, CompletionError> {
        let mut payload = json!({
            "model": self.settings.model,
            "temperature": self.settings.temperature,
            "messages": messages,
        });
        if let Some(ResponseFormat::JsonObject) = response_format {
            payload["response_format"] = json!({"type": "json_object"});
        }

        let endpoint = format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        );
        debug!(target: TARGET_LLM_REQUEST, "Sending completion request to {}", endpoint);

        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.settings.api_key)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CompletionError::Status(response.status()));
        }

        let body: Value = response.json().await?;
        let content = body
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .ok_or(CompletionError::MissingContent)?;

        debug!(target: TARGET_LLM_REQUEST, "Completion response received ({} bytes)", content.len());
        Ok(content.to_string())
    }
}
