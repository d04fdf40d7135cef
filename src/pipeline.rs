//! Orchestration of one enrichment run: load, then per URL fetch, classify,
//! extract, subtopic-assign, and assemble. A failing URL never aborts the
//! run.

use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

use crate::classify::{PrimaryTopic, SubtopicClassifier, TopicClassifier};
use crate::config::AppSettings;
use crate::extract::{ExtractionConfig, MetadataExtractor, MetadataRecord};
use crate::llm::{CompletionClient, TextCompleter};
use crate::manifest::{self, InvalidUrlEntry, ManifestLoadError};
use crate::reader::{ContentFetcher, ReaderClient};

/// One successfully processed URL, ready for rendering.
#[derive(Debug, Clone)]
pub struct NewsletterEntry {
    pub source_url: String,
    pub metadata: MetadataRecord,
    pub topic: PrimaryTopic,
    pub subtopics: Vec<String>,
}

/// Outcome of one run. Every unique loaded URL lands in exactly one of
/// `entries`, `skipped_urls`, or `failed_urls`.
#[derive(Debug, Default)]
pub struct PipelineResult {
    pub entries: Vec<NewsletterEntry>,
    pub invalid_urls: Vec<InvalidUrlEntry>,
    pub skipped_urls: Vec<String>,
    pub failed_urls: Vec<String>,
}

impl PipelineResult {
    pub fn success_count(&self) -> usize {
        self.entries.len()
    }
}

pub struct Pipeline {
    fetcher: Arc<dyn ContentFetcher>,
    topic_classifier: TopicClassifier,
    extractor: MetadataExtractor,
    subtopic_classifier: SubtopicClassifier,
}

impl Pipeline {
    pub fn new(
        fetcher: Arc<dyn ContentFetcher>,
        topic_classifier: TopicClassifier,
        extractor: MetadataExtractor,
        subtopic_classifier: SubtopicClassifier,
    ) -> Self {
        Pipeline {
            fetcher,
            topic_classifier,
            extractor,
            subtopic_classifier,
        }
    }

    /// Build a pipeline with live reader and completion clients. Classifier
    /// caches are owned by the returned pipeline, so each run built this way
    /// starts cold.
    pub fn from_settings(settings: &AppSettings) -> anyhow::Result<Self> {
        let fetcher = Arc::new(ReaderClient::new(settings.reader.clone())?);
        let completer: Arc<dyn TextCompleter> =
            Arc::new(CompletionClient::new(settings.completions.clone())?);
        Ok(Pipeline::new(
            fetcher,
            TopicClassifier::new(Some(completer.clone())),
            MetadataExtractor::new(completer.clone(), ExtractionConfig::default()),
            SubtopicClassifier::new(Some(completer)),
        ))
    }

    /// Run the pipeline over manifest text. Infallible at the run level;
    /// failures are recorded per URL.
    pub async fn run(&self, manifest_text: &str) -> PipelineResult {
        let load_result = manifest::parse_manifest(manifest_text);

        let mut result = PipelineResult {
            invalid_urls: load_result.invalid_entries,
            skipped_urls: load_result.duplicate_urls,
            ..PipelineResult::default()
        };

        for entry in &load_result.entries {
            let url = &entry.normalized_url;

            let content = match self.fetcher.fetch(url).await {
                Ok(content) => content,
                Err(err) => {
                    error!("Skipping URL {} due to retrieval failure: {}", url, err);
                    result.failed_urls.push(url.clone());
                    continue;
                }
            };

            let classified = self.topic_classifier.classify(&content).await;

            let mut metadata = match self.extractor.extract(&classified).await {
                Ok(metadata) => metadata,
                Err(err) => {
                    error!("Skipping URL {} due to metadata failure: {}", url, err);
                    result.failed_urls.push(url.clone());
                    continue;
                }
            };

            let subtopics = self
                .subtopic_classifier
                .classify(&classified, &metadata)
                .await;
            if !subtopics.is_empty() {
                metadata.subtopics = subtopics;
            }

            result.entries.push(NewsletterEntry {
                source_url: content.url,
                subtopics: metadata.subtopics.clone(),
                topic: classified.topic,
                metadata,
            });
        }

        info!("Pipeline completed: {} entries", result.entries.len());
        result
    }

    /// Run the pipeline over a manifest file on disk.
    pub async fn run_file(&self, path: impl AsRef<Path>) -> Result<PipelineResult, ManifestLoadError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(ManifestLoadError::from)?;
        Ok(self.run(&contents).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::SubtopicClassifier;
    use crate::llm::{ChatMessage, CompletionError, ResponseFormat, TextCompleter};
    use crate::reader::{ArticleContent, FetchError};
    use async_trait::async_trait;
    use serde_json::json;

    struct StubFetcher {
        fail_hosts: Vec<&'static str>,
    }

    #[async_trait]
    impl ContentFetcher for StubFetcher {
        async fn fetch(&self, url: &str) -> Result<ArticleContent, FetchError> {
            if self.fail_hosts.iter().any(|host| url.contains(host)) {
                return Err(FetchError::EmptyContent);
            }
            Ok(ArticleContent {
                url: url.to_string(),
                title: Some("Fetched".to_string()),
                text: "Article body mentioning arxiv results.".to_string(),
                summary: None,
                raw_payload: json!({}),
            })
        }
    }

    struct MetadataCompleter;

    #[async_trait]
    impl TextCompleter for MetadataCompleter {
        async fn complete(
            &self,
            _messages: &[ChatMessage],
            _response_format: Option<ResponseFormat>,
        ) -> Result<String, CompletionError> {
            Ok(json!({
                "title": "Stub Title",
                "authors": [],
                "organizations": [],
                "recommendation": "Worth a read.",
                "subtopics": [],
                "repositories": [],
                "attachments": []
            })
            .to_string())
        }
    }

    fn pipeline(fail_hosts: Vec<&'static str>) -> Pipeline {
        let completer = Arc::new(MetadataCompleter);
        Pipeline::new(
            Arc::new(StubFetcher { fail_hosts }),
            TopicClassifier::new(None),
            MetadataExtractor::new(completer, ExtractionConfig::default()),
            SubtopicClassifier::new(None),
        )
    }

    #[tokio::test]
    async fn every_unique_url_is_accounted_for() {
        let manifest = "\
https://example.com/one
https://EXAMPLE.com/one/
https://broken.example.org/two
not-a-url
https://example.com/three";
        let result = pipeline(vec!["broken.example.org"]).run(manifest).await;

        assert_eq!(result.entries.len(), 2);
        assert_eq!(result.skipped_urls.len(), 1);
        assert_eq!(result.failed_urls, vec!["https://broken.example.org/two"]);
        assert_eq!(result.invalid_urls.len(), 1);

        let unique_loaded = result.entries.len() + result.failed_urls.len();
        assert_eq!(unique_loaded, 3);
    }

    #[tokio::test]
    async fn entries_preserve_manifest_order() {
        let manifest = "https://example.com/b\nhttps://example.com/a";
        let result = pipeline(Vec::new()).run(manifest).await;

        let urls: Vec<&str> = result
            .entries
            .iter()
            .map(|entry| entry.source_url.as_str())
            .collect();
        assert_eq!(urls, vec!["https://example.com/b", "https://example.com/a"]);
    }

    #[tokio::test]
    async fn fetch_failure_never_aborts_the_run() {
        let manifest = "https://broken.example.org/x\nhttps://example.com/y";
        let result = pipeline(vec!["broken.example.org"]).run(manifest).await;

        assert_eq!(result.failed_urls, vec!["https://broken.example.org/x"]);
        assert_eq!(result.entries.len(), 1);
    }
}
