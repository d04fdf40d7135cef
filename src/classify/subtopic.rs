//! Fine-grained subtopic labels for paper entries.
//!
//! Keyword rules are tried first and award at most one label; the completion
//! fallback may award up to two. A batched variant labels many paper entries
//! with a single completion call.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use super::{ClassifiedArticle, PrimaryTopic};
use crate::extract::MetadataRecord;
use crate::llm::{ResponseFormat, TextCompleter};
use crate::pipeline::NewsletterEntry;
use crate::prompts;
use crate::TARGET_LLM_REQUEST;

pub const SUPPORTED_SUBTOPICS: [&str; 9] = [
    "LLM",
    "Agents",
    "Multimodal",
    "RL",
    "System/Engineering",
    "Retrieval/RAG",
    "Evaluation",
    "Data/Synthetic Data",
    "Safety/Alignment",
];

const MAX_SUBTOPICS: usize = 2;

/// Keyword rules per subtopic, evaluated in order; the first match wins.
const SUBTOPIC_KEYWORDS: [(&str, &[&str]); 9] = [
    ("RL", &["reinforcement learning", "policy gradient", "reward model", "rlhf"]),
    ("Agents", &["agentic", "multi-agent", "tool use", "agent framework"]),
    ("Multimodal", &["multimodal", "vision-language", "image generation", "text-to-image"]),
    ("Retrieval/RAG", &["retrieval-augmented", "retrieval augmented", "vector database", "dense retrieval"]),
    ("Safety/Alignment", &["alignment", "jailbreak", "red team", "harmlessness"]),
    ("Data/Synthetic Data", &["synthetic data", "data curation", "dataset construction"]),
    ("Evaluation", &["benchmark", "evaluation suite", "leaderboard"]),
    ("System/Engineering", &["inference throughput", "distributed training", "quantization", "kv cache"]),
    ("LLM", &["large language model", "language model", "pretraining", "instruction tuning"]),
];

pub struct SubtopicClassifier {
    completer: Option<Arc<dyn TextCompleter>>,
}

impl SubtopicClassifier {
    pub fn new(completer: Option<Arc<dyn TextCompleter>>) -> Self {
        SubtopicClassifier { completer }
    }

    /// Assign subtopics to a single classified paper. Non-paper topics always
    /// yield an empty list without any provider call.
    pub async fn classify(
        &self,
        article: &ClassifiedArticle,
        metadata: &MetadataRecord,
    ) -> Vec<String> {
        if article.topic != PrimaryTopic::Papers {
            return Vec::new();
        }

        if let Some(label) = match_rules(&article.content.text) {
            return vec![label.to_string()];
        }
        if let Some(label) = match_rules(&metadata.recommendation) {
            return vec![label.to_string()];
        }

        let Some(completer) = &self.completer else {
            return Vec::new();
        };

        let messages = prompts::subtopic_messages(article, &SUPPORTED_SUBTOPICS);
        let response = match completer
            .complete(&messages, Some(ResponseFormat::JsonObject))
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!(
                    target: TARGET_LLM_REQUEST,
                    "Subtopic classification call failed for {}: {}", article.content.url, err
                );
                return Vec::new();
            }
        };

        parse_single_response(&response)
    }

    /// Assign subtopics to every paper entry in one completion call. Entries
    /// the reply does not cover are reset to an empty subtopic list.
    pub async fn assign_batch(&self, entries: &mut [NewsletterEntry]) {
        let Some(completer) = &self.completer else {
            return;
        };

        let papers: Vec<&NewsletterEntry> = entries
            .iter()
            .filter(|entry| entry.topic == PrimaryTopic::Papers)
            .collect();
        if papers.is_empty() {
            return;
        }

        let messages = prompts::batch_subtopic_messages(&papers, &SUPPORTED_SUBTOPICS);
        let response = match completer
            .complete(&messages, Some(ResponseFormat::JsonObject))
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!(target: TARGET_LLM_REQUEST, "Batched subtopic call failed: {}", err);
                return;
            }
        };

        let mapping = parse_batch_response(&response, &papers);
        for entry in entries
            .iter_mut()
            .filter(|entry| entry.topic == PrimaryTopic::Papers)
        {
            let subtopics = mapping
                .get(&entry.source_url)
                .or_else(|| mapping.get(&entry.metadata.title))
                .cloned()
                .unwrap_or_default();
            entry.subtopics = subtopics.clone();
            entry.metadata.subtopics = subtopics;
        }
    }
}

fn match_rules(text: &str) -> Option<&'static str> {
    if text.trim().is_empty() {
        return None;
    }
    let lowered = text.to_lowercase();
    SUBTOPIC_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|keyword| lowered.contains(keyword)))
        .map(|(label, _)| *label)
}

/// Canonicalize candidate labels against the supported list (case-insensitive)
/// and cap the result. Unknown labels pass through as free-form text.
fn normalize_candidates(candidates: &[Value]) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::new();
    for candidate in candidates {
        let Some(cleaned) = candidate.as_str().map(str::trim).filter(|c| !c.is_empty()) else {
            continue;
        };
        let label = SUPPORTED_SUBTOPICS
            .iter()
            .find(|supported| supported.eq_ignore_ascii_case(cleaned))
            .map(|supported| supported.to_string())
            .unwrap_or_else(|| cleaned.to_string());
        if !normalized.contains(&label) {
            normalized.push(label);
        }
    }
    normalized.truncate(MAX_SUBTOPICS);
    normalized
}

fn parse_single_response(response: &str) -> Vec<String> {
    let Ok(data) = serde_json::from_str::<Value>(response) else {
        return Vec::new();
    };
    match data.get("subtopics").and_then(Value::as_array) {
        Some(candidates) => normalize_candidates(candidates),
        None => Vec::new(),
    }
}

fn parse_batch_response(
    response: &str,
    papers: &[&NewsletterEntry],
) -> HashMap<String, Vec<String>> {
    let mut mapping = HashMap::new();
    let Ok(data) = serde_json::from_str::<Value>(response) else {
        return mapping;
    };

    let payload = match &data {
        Value::Object(map) => map
            .get("classifications")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        Value::Array(items) => items.clone(),
        _ => Vec::new(),
    };

    for item in payload {
        let Some(id) = item.get("id").and_then(Value::as_u64) else {
            continue;
        };
        // Ids in the reply are 1-based item indexes.
        let Some(entry) = (id as usize)
            .checked_sub(1)
            .and_then(|index| papers.get(index))
        else {
            continue;
        };
        let Some(candidates) = item.get("subtopics").and_then(Value::as_array) else {
            continue;
        };
        let normalized = normalize_candidates(candidates);
        if !normalized.is_empty() {
            mapping.insert(entry.source_url.clone(), normalized);
        }
    }

    mapping
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ClassificationSource;
    use crate::llm::{ChatMessage, CompletionError};
    use crate::reader::ArticleContent;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubCompleter {
        reply: String,
        calls: AtomicUsize,
    }

    impl StubCompleter {
        fn new(reply: String) -> Self {
            StubCompleter {
                reply,
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

    fn article(topic: PrimaryTopic, text: &str) -> ClassifiedArticle {
        ClassifiedArticle {
            content: ArticleContent {
                url: "https://example.com".to_string(),
                title: Some("Title".to_string()),
                text: text.to_string(),
                summary: None,
                raw_payload: json!({}),
            },
            topic,
            source: ClassificationSource::Rules,
        }
    }

    fn metadata(topic: PrimaryTopic, recommendation: &str) -> MetadataRecord {
        MetadataRecord {
            topic,
            title: "Test".to_string(),
            authors: Vec::new(),
            organizations: Vec::new(),
            recommendation: recommendation.to_string(),
            subtopics: Vec::new(),
            repositories: Vec::new(),
            datasets: Vec::new(),
            attachments: Vec::new(),
            missing_optional_fields: Vec::new(),
        }
    }

    fn paper_entry(url: &str, title: &str) -> NewsletterEntry {
        NewsletterEntry {
            source_url: url.to_string(),
            metadata: MetadataRecord {
                title: title.to_string(),
                ..metadata(PrimaryTopic::Papers, "A recommendation")
            },
            topic: PrimaryTopic::Papers,
            subtopics: Vec::new(),
        }
    }

    #[tokio::test]
    async fn keyword_rules_win_without_provider_calls() {
        let stub = Arc::new(StubCompleter::new(
            json!({"subtopics": ["Agents"]}).to_string(),
        ));
        let classifier = SubtopicClassifier::new(Some(stub.clone()));
        let paper = article(
            PrimaryTopic::Papers,
            "This reinforcement learning approach uses new policy gradients.",
        );

        let result = classifier
            .classify(&paper, &metadata(PrimaryTopic::Papers, ""))
            .await;

        assert_eq!(result, vec!["RL"]);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn recommendation_text_is_second_rule_pass() {
        let classifier = SubtopicClassifier::new(None);
        let paper = article(PrimaryTopic::Papers, "An unassuming abstract.");
        let result = classifier
            .classify(
                &paper,
                &metadata(PrimaryTopic::Papers, "Great multimodal results."),
            )
            .await;
        assert_eq!(result, vec!["Multimodal"]);
    }

    #[tokio::test]
    async fn non_paper_articles_always_get_empty_subtopics() {
        let stub = Arc::new(StubCompleter::new(
            json!({"subtopics": ["Agents"]}).to_string(),
        ));
        let classifier = SubtopicClassifier::new(Some(stub.clone()));
        let blog = article(PrimaryTopic::Blogs, "Agents everywhere");

        let result = classifier
            .classify(&blog, &metadata(PrimaryTopic::Blogs, "agentic tools"))
            .await;

        assert!(result.is_empty());
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn completion_fallback_canonicalizes_and_caps_labels() {
        let stub = Arc::new(StubCompleter::new(
            json!({"subtopics": ["agents", "New Idea", "Evaluation"]}).to_string(),
        ));
        let classifier = SubtopicClassifier::new(Some(stub));
        let paper = article(PrimaryTopic::Papers, "An overview of something novel.");

        let result = classifier
            .classify(&paper, &metadata(PrimaryTopic::Papers, "Nothing matching"))
            .await;

        assert_eq!(result, vec!["Agents", "New Idea"]);
    }

    #[tokio::test]
    async fn batch_assignment_applies_by_id_and_resets_uncovered_entries() {
        let reply = json!({
            "classifications": [
                {"id": 1, "subtopics": ["rl"]},
                {"id": 7, "subtopics": ["Agents"]}
            ]
        });
        let classifier = SubtopicClassifier::new(Some(Arc::new(StubCompleter::new(
            reply.to_string(),
        ))));

        let mut entries = vec![
            paper_entry("https://a.example.com", "First"),
            paper_entry("https://b.example.com", "Second"),
        ];
        entries[1].subtopics = vec!["Stale".to_string()];
        entries[1].metadata.subtopics = vec!["Stale".to_string()];

        classifier.assign_batch(&mut entries).await;

        assert_eq!(entries[0].subtopics, vec!["RL"]);
        assert_eq!(entries[0].metadata.subtopics, vec!["RL"]);
        assert!(entries[1].subtopics.is_empty());
        assert!(entries[1].metadata.subtopics.is_empty());
    }
}
