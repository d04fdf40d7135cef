//! Structured metadata extraction for classified articles.
//!
//! One bounded-retry completion call produces the structured fields, then a
//! deterministic pass canonicalizes repository links, backfills references
//! from the article text, detects dataset mentions, and annotates which
//! optional fields stayed empty.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::classify::{ClassifiedArticle, PrimaryTopic};
use crate::llm::{CompletionError, ResponseFormat, TextCompleter};
use crate::prompts;
use crate::TARGET_LLM_REQUEST;

const DATASET_HINTS: [&str; 3] = ["dataset", "corpus", "benchmark"];

static LINK_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s)\]>"']+"#).expect("valid link pattern"));

/// Hosting service a repository reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RepositoryProvider {
    Github,
    HuggingfaceModel,
    HuggingfaceDataset,
    HuggingfaceSpace,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryReference {
    pub url: String,
    pub provider: RepositoryProvider,
    pub reason: String,
}

/// Structured metadata for one newsletter entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub topic: PrimaryTopic,
    pub title: String,
    pub authors: Vec<String>,
    pub organizations: Vec<String>,
    pub recommendation: String,
    pub subtopics: Vec<String>,
    pub repositories: Vec<RepositoryReference>,
    pub datasets: Vec<String>,
    pub attachments: Vec<String>,
    pub missing_optional_fields: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ReplyError {
    #[error("reply was not valid JSON: {0}")]
    Json(serde_json::Error),
    #[error("reply did not match the metadata schema: {0}")]
    Schema(serde_json::Error),
    #[error("reply failed conformance: {0}")]
    Conformance(&'static str),
}

#[derive(Debug, Error)]
pub enum MetadataExtractionError {
    #[error("completion request failed after {attempts} attempts: {source}")]
    Completion {
        attempts: usize,
        #[source]
        source: CompletionError,
    },
    #[error("completion reply was unusable after {attempts} attempts: {source}")]
    InvalidReply {
        attempts: usize,
        #[source]
        source: ReplyError,
    },
}

/// The JSON shape requested from the completion provider.
#[derive(Debug, Deserialize)]
struct MetadataReply {
    title: String,
    #[serde(default)]
    authors: Vec<String>,
    #[serde(default)]
    organizations: Vec<String>,
    recommendation: String,
    #[serde(default)]
    subtopics: Vec<String>,
    #[serde(default)]
    repositories: Vec<RepositoryCandidate>,
    #[serde(default)]
    attachments: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RepositoryCandidate {
    url: String,
    #[serde(default)]
    reason: Option<String>,
}

/// Decode the raw reply and check it conforms to the expected shape. The
/// decode and the conformance check are separate steps so a malformed reply
/// is distinguishable from a structurally valid but unusable one.
fn validate_reply(raw: &str) -> Result<MetadataReply, ReplyError> {
    let value: serde_json::Value = serde_json::from_str(raw).map_err(ReplyError::Json)?;
    let reply: MetadataReply = serde_json::from_value(value).map_err(ReplyError::Schema)?;
    if reply.title.trim().is_empty() {
        return Err(ReplyError::Conformance("title is blank"));
    }
    if reply.recommendation.trim().is_empty() {
        return Err(ReplyError::Conformance("recommendation is blank"));
    }
    Ok(reply)
}

#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    pub max_attempts: usize,
    pub max_snippet_chars: usize,
    pub recommendation_word_limit: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        ExtractionConfig {
            max_attempts: 2,
            max_snippet_chars: 1600,
            recommendation_word_limit: 100,
        }
    }
}

pub struct MetadataExtractor {
    completer: Arc<dyn TextCompleter>,
    config: ExtractionConfig,
}

impl MetadataExtractor {
    pub fn new(completer: Arc<dyn TextCompleter>, config: ExtractionConfig) -> Self {
        MetadataExtractor { completer, config }
    }

    pub async fn extract(
        &self,
        article: &ClassifiedArticle,
    ) -> Result<MetadataRecord, MetadataExtractionError> {
        let reply = self.request_metadata(article).await?;
        let record = self.build_record(article, reply);
        Ok(annotate_missing_optional(enrich_with_detections(
            article, record,
        )))
    }

    async fn request_metadata(
        &self,
        article: &ClassifiedArticle,
    ) -> Result<MetadataReply, MetadataExtractionError> {
        let attempts = self.config.max_attempts.max(1);
        let messages = prompts::metadata_messages(article, self.config.max_snippet_chars);

        for attempt in 1..=attempts {
            let raw = match self
                .completer
                .complete(&messages, Some(ResponseFormat::JsonObject))
                .await
            {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(
                        target: TARGET_LLM_REQUEST,
                        "Metadata extraction attempt {}/{} failed: {}", attempt, attempts, err
                    );
                    if attempt == attempts {
                        return Err(MetadataExtractionError::Completion {
                            attempts,
                            source: err,
                        });
                    }
                    continue;
                }
            };

            match validate_reply(&raw) {
                Ok(reply) => return Ok(reply),
                Err(err) => {
                    warn!(
                        target: TARGET_LLM_REQUEST,
                        "Metadata extraction attempt {}/{} failed: {}", attempt, attempts, err
                    );
                    if attempt == attempts {
                        return Err(MetadataExtractionError::InvalidReply {
                            attempts,
                            source: err,
                        });
                    }
                }
            }
        }

        unreachable!("extraction attempt loop always returns")
    }

    fn build_record(&self, article: &ClassifiedArticle, reply: MetadataReply) -> MetadataRecord {
        let recommendation =
            truncate_words(&reply.recommendation, self.config.recommendation_word_limit);
        let repositories = canonicalize_candidates(reply.repositories);

        MetadataRecord {
            topic: article.topic,
            title: reply.title.trim().to_string(),
            authors: clean_strings(reply.authors),
            organizations: clean_strings(reply.organizations),
            recommendation,
            subtopics: normalize_subtopics(article.topic, reply.subtopics),
            repositories,
            datasets: Vec::new(),
            attachments: clean_strings(reply.attachments),
            missing_optional_fields: Vec::new(),
        }
    }
}

fn clean_strings(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}

/// Subtopics from the provider are kept only for paper entries.
fn normalize_subtopics(topic: PrimaryTopic, subtopics: Vec<String>) -> Vec<String> {
    if topic != PrimaryTopic::Papers {
        return Vec::new();
    }
    clean_strings(subtopics)
}

/// Hard-truncate to a word limit, appending an ellipsis when shortened.
fn truncate_words(text: &str, limit: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= limit {
        return text.trim().to_string();
    }
    info!("Truncated recommendation from {} to {} words", words.len(), limit);
    format!("{}…", words[..limit].join(" "))
}

/// Canonicalize a repository URL into `{root}/{owner}/{name}` form.
pub fn canonicalize_repository(raw: &str) -> Option<(String, RepositoryProvider)> {
    let trimmed = raw.trim().trim_end_matches(['.', ',', ';', ':']);
    let parsed = Url::parse(trimmed).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    let segments: Vec<&str> = parsed
        .path_segments()?
        .filter(|segment| !segment.is_empty())
        .collect();

    if host == "github.com" || host == "www.github.com" {
        if segments.len() < 2 {
            return None;
        }
        let repo = segments[1].trim_end_matches(".git");
        if repo.is_empty() {
            return None;
        }
        return Some((
            format!("https://github.com/{}/{}", segments[0], repo),
            RepositoryProvider::Github,
        ));
    }

    if host == "huggingface.co" || host == "www.huggingface.co" {
        return match segments.as_slice() {
            ["datasets", owner, name, ..] => Some((
                format!("https://huggingface.co/datasets/{}/{}", owner, name),
                RepositoryProvider::HuggingfaceDataset,
            )),
            ["spaces", owner, name, ..] => Some((
                format!("https://huggingface.co/spaces/{}/{}", owner, name),
                RepositoryProvider::HuggingfaceSpace,
            )),
            [owner, name, ..] if *owner != "datasets" && *owner != "spaces" => Some((
                format!("https://huggingface.co/{}/{}", owner, name),
                RepositoryProvider::HuggingfaceModel,
            )),
            _ => None,
        };
    }

    None
}

fn canonicalize_candidates(candidates: Vec<RepositoryCandidate>) -> Vec<RepositoryReference> {
    let mut references: Vec<RepositoryReference> = Vec::new();
    for candidate in candidates {
        let Some((url, provider)) = canonicalize_repository(&candidate.url) else {
            debug!("Discarding unusable repository candidate: {}", candidate.url);
            continue;
        };
        if references.iter().any(|existing| existing.url == url) {
            continue;
        }
        let reason = candidate
            .reason
            .map(|reason| reason.trim().to_string())
            .filter(|reason| !reason.is_empty())
            .unwrap_or_else(|| "Referenced by the article".to_string());
        references.push(RepositoryReference {
            url,
            provider,
            reason,
        });
    }
    references
}

/// Scan raw article text for GitHub and Hugging Face links.
fn scan_repository_links(text: &str) -> Vec<RepositoryReference> {
    let mut references: Vec<RepositoryReference> = Vec::new();
    for found in LINK_PATTERN.find_iter(text) {
        let Some((url, provider)) = canonicalize_repository(found.as_str()) else {
            continue;
        };
        if references.iter().any(|existing| existing.url == url) {
            continue;
        }
        references.push(RepositoryReference {
            url,
            provider,
            reason: "Detected in article text".to_string(),
        });
    }
    references
}

fn detect_datasets(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    DATASET_HINTS
        .iter()
        .filter(|hint| lowered.contains(*hint))
        .map(|hint| hint.to_string())
        .collect()
}

fn enrich_with_detections(article: &ClassifiedArticle, mut record: MetadataRecord) -> MetadataRecord {
    if record.repositories.is_empty() {
        // Merge the scan results rather than replacing anything the provider
        // supplied, deduplicating by canonical URL.
        for scanned in scan_repository_links(&article.content.text) {
            if !record
                .repositories
                .iter()
                .any(|existing| existing.url == scanned.url)
            {
                record.repositories.push(scanned);
            }
        }
    }
    record.datasets = detect_datasets(&article.content.text);
    record
}

fn annotate_missing_optional(mut record: MetadataRecord) -> MetadataRecord {
    let mut missing = Vec::new();
    if record.repositories.is_empty() {
        missing.push("repositories".to_string());
    }
    if record.datasets.is_empty() {
        missing.push("datasets".to_string());
    }
    if record.attachments.is_empty() {
        missing.push("attachments".to_string());
    }
    if !missing.is_empty() {
        info!("Metadata missing optional fields: {}", missing.join(", "));
    }
    record.missing_optional_fields = missing;
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ClassificationSource;
    use crate::llm::ChatMessage;
    use crate::reader::ArticleContent;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedCompleter {
        replies: Mutex<VecDeque<Result<String, CompletionError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedCompleter {
        fn new(replies: Vec<Result<String, CompletionError>>) -> Self {
            ScriptedCompleter {
                replies: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TextCompleter for ScriptedCompleter {
        async fn complete(
            &self,
            _messages: &[ChatMessage],
            _response_format: Option<ResponseFormat>,
        ) -> Result<String, CompletionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(CompletionError::MissingContent))
        }
    }

    fn paper(text: &str) -> ClassifiedArticle {
        ClassifiedArticle {
            content: ArticleContent {
                url: "https://example.com".to_string(),
                title: Some("Title".to_string()),
                text: text.to_string(),
                summary: None,
                raw_payload: json!({}),
            },
            topic: PrimaryTopic::Papers,
            source: ClassificationSource::Rules,
        }
    }

    fn reply(recommendation: &str) -> String {
        json!({
            "title": "Great Paper",
            "authors": ["Alice", " Bob "],
            "organizations": ["Org1"],
            "recommendation": recommendation,
            "subtopics": ["LLM"],
            "repositories": [],
            "attachments": []
        })
        .to_string()
    }

    #[tokio::test]
    async fn extract_backfills_repositories_from_text() {
        let completer = Arc::new(ScriptedCompleter::new(vec![Ok(reply("A novel method."))]));
        let extractor = MetadataExtractor::new(completer, ExtractionConfig::default());

        let article = paper("Check the repo at https://github.com/org/repo.");
        let record = extractor.extract(&article).await.unwrap();

        assert_eq!(record.title, "Great Paper");
        assert_eq!(record.authors, vec!["Alice", "Bob"]);
        assert_eq!(record.repositories.len(), 1);
        assert_eq!(record.repositories[0].url, "https://github.com/org/repo");
        assert_eq!(record.repositories[0].provider, RepositoryProvider::Github);
        assert_eq!(record.subtopics, vec!["LLM"]);
        assert_eq!(
            record.missing_optional_fields,
            vec!["datasets", "attachments"]
        );
    }

    #[tokio::test]
    async fn extract_retries_after_invalid_json_and_truncates() {
        let long_text = "word ".repeat(150);
        let completer = Arc::new(ScriptedCompleter::new(vec![
            Ok("not json".to_string()),
            Ok(reply(&long_text)),
        ]));
        let extractor = MetadataExtractor::new(
            completer.clone(),
            ExtractionConfig {
                max_attempts: 2,
                recommendation_word_limit: 5,
                ..ExtractionConfig::default()
            },
        );

        let article = paper("Dataset released for evaluation");
        let record = extractor.extract(&article).await.unwrap();

        assert_eq!(completer.calls.load(Ordering::SeqCst), 2);
        assert!(record.recommendation.ends_with('…'));
        assert_eq!(record.recommendation.split_whitespace().count(), 5);
        assert!(record.datasets.contains(&"dataset".to_string()));
    }

    #[tokio::test]
    async fn extract_fails_after_exhausting_attempts() {
        let completer = Arc::new(ScriptedCompleter::new(vec![
            Ok("bad".to_string()),
            Ok("still bad".to_string()),
        ]));
        let extractor = MetadataExtractor::new(completer, ExtractionConfig::default());

        let err = extractor.extract(&paper("body")).await.unwrap_err();
        assert!(matches!(
            err,
            MetadataExtractionError::InvalidReply { attempts: 2, .. }
        ));
    }

    #[tokio::test]
    async fn non_paper_subtopics_are_dropped() {
        let completer = Arc::new(ScriptedCompleter::new(vec![Ok(reply("Solid write-up."))]));
        let extractor = MetadataExtractor::new(completer, ExtractionConfig::default());
        let mut article = paper("body");
        article.topic = PrimaryTopic::Blogs;

        let record = extractor.extract(&article).await.unwrap();
        assert!(record.subtopics.is_empty());
    }

    #[test]
    fn canonicalize_handles_github_and_huggingface_forms() {
        assert_eq!(
            canonicalize_repository("https://github.com/org/repo.git"),
            Some((
                "https://github.com/org/repo".to_string(),
                RepositoryProvider::Github
            ))
        );
        assert_eq!(
            canonicalize_repository("https://huggingface.co/org/model/tree/main"),
            Some((
                "https://huggingface.co/org/model".to_string(),
                RepositoryProvider::HuggingfaceModel
            ))
        );
        assert_eq!(
            canonicalize_repository("https://huggingface.co/datasets/org/corpus"),
            Some((
                "https://huggingface.co/datasets/org/corpus".to_string(),
                RepositoryProvider::HuggingfaceDataset
            ))
        );
        assert_eq!(
            canonicalize_repository("https://huggingface.co/spaces/org/demo"),
            Some((
                "https://huggingface.co/spaces/org/demo".to_string(),
                RepositoryProvider::HuggingfaceSpace
            ))
        );
        assert_eq!(canonicalize_repository("https://example.com/org/repo"), None);
    }

    #[test]
    fn reply_validation_separates_decode_and_conformance() {
        assert!(matches!(validate_reply("not json"), Err(ReplyError::Json(_))));
        assert!(matches!(
            validate_reply("{\"title\": \"x\"}"),
            Err(ReplyError::Schema(_))
        ));
        let blank = json!({"title": "  ", "recommendation": "fine"}).to_string();
        assert!(matches!(
            validate_reply(&blank),
            Err(ReplyError::Conformance(_))
        ));
    }
}
