//! Content retrieval through a reader service that converts a web page into
//! article text.

use async_trait::async_trait;
use reqwest::{header, StatusCode};
use serde_json::Value;
use std::sync::Mutex;
use thiserror::Error;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

use crate::config::ReaderSettings;
use crate::TARGET_WEB_REQUEST;

const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Fetched article content. `text` is always non-empty; a response without
/// extractable text is a fetch failure.
#[derive(Debug, Clone)]
pub struct ArticleContent {
    pub url: String,
    pub title: Option<String>,
    pub text: String,
    pub summary: Option<String>,
    pub raw_payload: Value,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("reader request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("reader returned status {0}")]
    Status(StatusCode),
    #[error("reader response contained no article text")]
    EmptyContent,
    #[error("reader request failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: usize,
        #[source]
        source: Box<FetchError>,
    },
}

/// Capability for turning a URL into article content.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<ArticleContent, FetchError>;
}

/// Whether requests carry the configured bearer token. A single 401 response
/// permanently degrades the client to anonymous requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Authorized,
    Anonymous,
}

pub struct ReaderClient {
    client: reqwest::Client,
    settings: ReaderSettings,
    auth_mode: Mutex<AuthMode>,
}

impl ReaderClient {
    pub fn new(settings: ReaderSettings) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .gzip(true)
            .build()?;
        let auth_mode = if settings.api_key.is_some() {
            AuthMode::Authorized
        } else {
            AuthMode::Anonymous
        };
        Ok(ReaderClient {
            client,
            settings,
            auth_mode: Mutex::new(auth_mode),
        })
    }

    pub fn auth_mode(&self) -> AuthMode {
        *self.auth_mode.lock().unwrap()
    }

    fn request_url(&self, target_url: &str) -> String {
        format!(
            "{}/{}",
            self.settings.base_url.trim_end_matches('/'),
            target_url
        )
    }

    async fn fetch_once(&self, target_url: &str) -> Result<ArticleContent, FetchError> {
        let mut request = self
            .client
            .get(self.request_url(target_url))
            .header(header::ACCEPT, "application/json, text/plain");

        if self.auth_mode() == AuthMode::Authorized {
            if let Some(key) = &self.settings.api_key {
                request = request.bearer_auth(key);
            }
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED && self.auth_mode() == AuthMode::Authorized {
            warn!(
                target: TARGET_WEB_REQUEST,
                "Reader rejected the configured token for {}; continuing without authorization",
                target_url
            );
            *self.auth_mode.lock().unwrap() = AuthMode::Anonymous;
            return Err(FetchError::Status(status));
        }

        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_lowercase())
            .unwrap_or_default();

        if content_type.contains("application/json") {
            let data: Value = response.json().await?;
            parse_json_payload(target_url, data)
        } else {
            let text = response.text().await?;
            if text.trim().is_empty() {
                return Err(FetchError::EmptyContent);
            }
            let raw_payload = serde_json::json!({ "content": text });
            Ok(ArticleContent {
                url: target_url.to_string(),
                title: None,
                text,
                summary: None,
                raw_payload,
            })
        }
    }
}

fn string_field(data: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        data.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    })
}

fn parse_json_payload(target_url: &str, data: Value) -> Result<ArticleContent, FetchError> {
    let text = string_field(&data, &["data", "text", "content"]).ok_or(FetchError::EmptyContent)?;
    let title = string_field(&data, &["title", "heading"]);
    let summary = string_field(&data, &["summary"]);

    Ok(ArticleContent {
        url: target_url.to_string(),
        title,
        text,
        summary,
        raw_payload: data,
    })
}

#[async_trait]
impl ContentFetcher for ReaderClient {
    async fn fetch(&self, url: &str) -> Result<ArticleContent, FetchError> {
        let attempts = self.settings.max_retries + 1;
        let mut last_error: Option<FetchError> = None;

        for attempt in 1..=attempts {
            debug!(target: TARGET_WEB_REQUEST, "Fetching {} (attempt {}/{})", url, attempt, attempts);
            match self.fetch_once(url).await {
                Ok(content) => return Ok(content),
                // A payload without text will not improve on retry.
                Err(FetchError::EmptyContent) => return Err(FetchError::EmptyContent),
                Err(err) => {
                    warn!(
                        target: TARGET_WEB_REQUEST,
                        "Reader request for {} failed (attempt {}/{}): {}", url, attempt, attempts, err
                    );
                    last_error = Some(err);
                }
            }
            if attempt < attempts {
                sleep(RETRY_DELAY).await;
            }
        }

        Err(FetchError::RetriesExhausted {
            attempts,
            source: Box::new(last_error.unwrap_or(FetchError::EmptyContent)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_payload_prefers_data_field() {
        let payload = json!({
            "data": "Body text",
            "title": "A Title",
            "summary": "Short summary"
        });
        let content = parse_json_payload("https://example.com", payload).unwrap();
        assert_eq!(content.text, "Body text");
        assert_eq!(content.title.as_deref(), Some("A Title"));
        assert_eq!(content.summary.as_deref(), Some("Short summary"));
    }

    #[test]
    fn json_payload_without_text_is_an_error() {
        let payload = json!({ "title": "No body here" });
        let err = parse_json_payload("https://example.com", payload).unwrap_err();
        assert!(matches!(err, FetchError::EmptyContent));
    }

    #[test]
    fn blank_strings_are_treated_as_missing() {
        let payload = json!({ "data": "   ", "content": "Actual body" });
        let content = parse_json_payload("https://example.com", payload).unwrap();
        assert_eq!(content.text, "Actual body");
    }
}
