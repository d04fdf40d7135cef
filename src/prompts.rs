//! Prompt builders for the completion-backed classification and extraction
//! steps.

use crate::classify::ClassifiedArticle;
use crate::llm::ChatMessage;
use crate::pipeline::NewsletterEntry;
use crate::reader::ArticleContent;

fn snippet(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((offset, _)) => &text[..offset],
        None => text,
    }
}

pub fn topic_messages(article: &ArticleContent) -> Vec<ChatMessage> {
    let instructions = "You classify the primary topic for AI/ML news articles. Choose exactly \
one of the following options: Paper, Blog, Open Source, Engineering & Product & Business. \
Respond with only the option name.";
    let user = format!(
        "URL: {}\nTitle: {}\nContent snippet:\n{}",
        article.url,
        article.title.as_deref().unwrap_or("Unknown"),
        snippet(&article.text, 1000),
    );
    vec![ChatMessage::system(instructions), ChatMessage::user(user)]
}

pub fn metadata_messages(article: &ClassifiedArticle, max_snippet_chars: usize) -> Vec<ChatMessage> {
    let instructions = "You extract structured newsletter metadata for AI research and product \
updates. Return a JSON object with the keys: title (string), authors (array of strings), \
organizations (array of strings), recommendation (<=100 words string), subtopics (array of \
strings), repositories (array of objects with url, provider, reason), attachments (array of \
strings). Use plain names without extra punctuation.";
    let user = format!(
        "Primary topic: {}\nTitle: {}\nURL: {}\nContent snippet:\n{}",
        article.topic.label(),
        article.content.title.as_deref().unwrap_or("Unknown"),
        article.content.url,
        snippet(&article.content.text, max_snippet_chars),
    );
    vec![ChatMessage::system(instructions), ChatMessage::user(user)]
}

pub fn subtopic_messages(article: &ClassifiedArticle, supported: &[&str]) -> Vec<ChatMessage> {
    let instructions = format!(
        "You classify machine learning papers into subtopics for a weekly newsletter. Choose the \
best-fitting subtopic from the allowed list. If none fit, invent a concise new label. Respond \
with JSON: {{\"subtopics\": [\"label\"]}}. Choose at most one subtopic unless two are clearly \
necessary.\nAllowed subtopics: {}",
        supported.join(", ")
    );
    let user = format!(
        "Title: {}\nURL: {}\nContent snippet:\n{}",
        article.content.title.as_deref().unwrap_or("Unknown"),
        article.content.url,
        snippet(&article.content.text, 1000),
    );
    vec![ChatMessage::system(instructions), ChatMessage::user(user)]
}

pub fn batch_subtopic_messages(papers: &[&NewsletterEntry], supported: &[&str]) -> Vec<ChatMessage> {
    let instructions = format!(
        "You classify machine learning papers into subtopics for a weekly newsletter. For each \
paper, choose the best-fitting subtopic from the allowed list. If none fit, invent a concise new \
label. Respond with JSON: {{\"classifications\": [{{\"id\": <number>, \"subtopics\": \
[\"label\"]}}]}}. Choose at most one subtopic per paper unless two are clearly necessary.\n\
Allowed subtopics: {}",
        supported.join(", ")
    );

    let mut lines = vec!["Papers:".to_string()];
    for (index, entry) in papers.iter().enumerate() {
        lines.push(format!("Item {}:", index + 1));
        lines.push(format!("Title: {}", entry.metadata.title));
        lines.push(format!("Recommendation: {}", entry.metadata.recommendation));
    }

    vec![
        ChatMessage::system(instructions),
        ChatMessage::user(lines.join("\n")),
    ]
}
