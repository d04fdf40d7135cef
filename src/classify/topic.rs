//! Primary topic assignment: host and keyword rules first, completion
//! fallback second.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use url::Url;

use super::{ClassificationSource, ClassifiedArticle, PrimaryTopic};
use crate::llm::TextCompleter;
use crate::prompts;
use crate::reader::ArticleContent;
use crate::TARGET_LLM_REQUEST;

const PAPER_HOSTS: [&str; 6] = [
    "arxiv.org",
    "openreview.net",
    "paperswithcode.com",
    "neurips.cc",
    "acm.org",
    "ieee.org",
];

const PAPER_KEYWORDS: [&str; 3] = ["arxiv", "iclr", "neurips"];

const OPEN_SOURCE_HOSTS: [&str; 4] = [
    "github.com",
    "gitlab.com",
    "huggingface.co",
    "bitbucket.org",
];

const BLOG_HOSTS: [&str; 8] = [
    "medium.com",
    "substack.com",
    "dev.to",
    "hashnode.dev",
    "blogspot.com",
    "wordpress.com",
    "zhihu.com",
    "wechat.com",
];

fn matches_host(host: &str, targets: &[&str]) -> bool {
    targets
        .iter()
        .any(|target| host == *target || host.ends_with(&format!(".{}", target)))
}

fn host_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_lowercase))
        .unwrap_or_default()
}

pub struct TopicClassifier {
    completer: Option<Arc<dyn TextCompleter>>,
    // Per-URL fallback results; process-local, never shared across runs.
    cache: Mutex<HashMap<String, PrimaryTopic>>,
}

impl TopicClassifier {
    pub fn new(completer: Option<Arc<dyn TextCompleter>>) -> Self {
        TopicClassifier {
            completer,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn classify(&self, article: &ArticleContent) -> ClassifiedArticle {
        if let Some(topic) = self.classify_with_rules(article) {
            return ClassifiedArticle {
                content: article.clone(),
                topic,
                source: ClassificationSource::Rules,
            };
        }

        if self.completer.is_some() {
            let topic = self
                .classify_with_completion(article)
                .await
                .unwrap_or(PrimaryTopic::Unknown);
            return ClassifiedArticle {
                content: article.clone(),
                topic,
                source: ClassificationSource::Llm,
            };
        }

        ClassifiedArticle {
            content: article.clone(),
            topic: PrimaryTopic::Unknown,
            source: ClassificationSource::Rules,
        }
    }

    fn classify_with_rules(&self, article: &ArticleContent) -> Option<PrimaryTopic> {
        let host = host_of(&article.url);
        let body = article.text.to_lowercase();

        if matches_host(&host, &PAPER_HOSTS)
            || PAPER_KEYWORDS.iter().any(|keyword| body.contains(keyword))
        {
            return Some(PrimaryTopic::Papers);
        }

        if matches_host(&host, &OPEN_SOURCE_HOSTS) || body.contains("github.com") {
            return Some(PrimaryTopic::OpenSource);
        }

        if matches_host(&host, &BLOG_HOSTS) || host.starts_with("blog.") {
            return Some(PrimaryTopic::Blogs);
        }

        if host.contains("press") || host.contains("news") {
            return Some(PrimaryTopic::EngineeringProductBusiness);
        }

        if body.contains("release") || body.contains("roadmap") {
            return Some(PrimaryTopic::EngineeringProductBusiness);
        }

        None
    }

    async fn classify_with_completion(&self, article: &ArticleContent) -> Option<PrimaryTopic> {
        if let Some(topic) = self.cache.lock().unwrap().get(&article.url) {
            debug!(target: TARGET_LLM_REQUEST, "Topic cache hit for {}", article.url);
            return Some(*topic);
        }

        let completer = self.completer.as_ref()?;
        let messages = prompts::topic_messages(article);
        let response = match completer.complete(&messages, None).await {
            Ok(response) => response,
            Err(err) => {
                // Degrades to Unknown rather than failing the item.
                warn!(
                    target: TARGET_LLM_REQUEST,
                    "Topic classification call failed for {}: {}", article.url, err
                );
                return None;
            }
        };

        let topic = parse_topic(&response);
        if let Some(topic) = topic {
            self.cache
                .lock()
                .unwrap()
                .insert(article.url.clone(), topic);
        }
        topic
    }
}

/// Map a completion reply onto a known topic, tolerating label prefixes and
/// extra prose around the label.
fn parse_topic(candidate: &str) -> Option<PrimaryTopic> {
    let mut normalized = candidate.trim().to_lowercase();
    for prefix in ["topic:", "classification:"] {
        if let Some(stripped) = normalized.strip_prefix(prefix) {
            normalized = stripped.trim().to_string();
        }
    }

    let mapping: [(&str, PrimaryTopic); 10] = [
        ("engineering & product & business", PrimaryTopic::EngineeringProductBusiness),
        ("open source", PrimaryTopic::OpenSource),
        ("open-source", PrimaryTopic::OpenSource),
        ("papers", PrimaryTopic::Papers),
        ("paper", PrimaryTopic::Papers),
        ("blogs", PrimaryTopic::Blogs),
        ("blog", PrimaryTopic::Blogs),
        ("engineering", PrimaryTopic::EngineeringProductBusiness),
        ("product", PrimaryTopic::EngineeringProductBusiness),
        ("business", PrimaryTopic::EngineeringProductBusiness),
    ];

    for (label, topic) in &mapping {
        if normalized == *label {
            return Some(*topic);
        }
    }
    for (label, topic) in &mapping {
        if normalized.contains(label) {
            return Some(*topic);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatMessage, CompletionError, ResponseFormat};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubCompleter {
        reply: String,
        calls: AtomicUsize,
    }

    impl StubCompleter {
        fn new(reply: &str) -> Self {
            StubCompleter {
                reply: reply.to_string(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TextCompleter for StubCompleter {
        async fn complete(
            &self,
            _messages: &[ChatMessage],
            _response_format: Option<ResponseFormat>,
        ) -> Result<String, CompletionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.clone())
        }
    }

    fn article(url: &str, text: &str) -> ArticleContent {
        ArticleContent {
            url: url.to_string(),
            title: None,
            text: text.to_string(),
            summary: None,
            raw_payload: json!({}),
        }
    }

    #[tokio::test]
    async fn paper_host_classifies_without_completion() {
        let classifier = TopicClassifier::new(None);
        let classified = classifier
            .classify(&article("https://arxiv.org/abs/1234.5678", "Some abstract"))
            .await;
        assert_eq!(classified.topic, PrimaryTopic::Papers);
        assert_eq!(classified.source, ClassificationSource::Rules);
    }

    #[tokio::test]
    async fn blog_prefix_host_classifies_as_blog() {
        let classifier = TopicClassifier::new(None);
        let classified = classifier
            .classify(&article("https://blog.acme.dev/post", "A write-up"))
            .await;
        assert_eq!(classified.topic, PrimaryTopic::Blogs);
    }

    #[tokio::test]
    async fn unmatched_article_without_completer_is_unknown() {
        let classifier = TopicClassifier::new(None);
        let classified = classifier
            .classify(&article("https://example.com/x", "Nothing notable"))
            .await;
        assert_eq!(classified.topic, PrimaryTopic::Unknown);
        assert_eq!(classified.source, ClassificationSource::Rules);
    }

    #[tokio::test]
    async fn completion_fallback_is_cached_per_url() {
        let stub = Arc::new(StubCompleter::new("Topic: Blog"));
        let classifier = TopicClassifier::new(Some(stub.clone()));
        let item = article("https://example.com/x", "Nothing notable");

        let first = classifier.classify(&item).await;
        let second = classifier.classify(&item).await;

        assert_eq!(first.topic, PrimaryTopic::Blogs);
        assert_eq!(first.source, ClassificationSource::Llm);
        assert_eq!(second.topic, PrimaryTopic::Blogs);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn parse_topic_handles_prefixes_and_containment() {
        assert_eq!(parse_topic("Paper"), Some(PrimaryTopic::Papers));
        assert_eq!(parse_topic("classification: open source"), Some(PrimaryTopic::OpenSource));
        assert_eq!(
            parse_topic("This looks like a blog post."),
            Some(PrimaryTopic::Blogs)
        );
        assert_eq!(parse_topic("no idea"), None);
    }
}
