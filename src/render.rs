//! Markdown rendering of newsletter entries, grouped by topic and, for
//! papers, by subtopic.

use chrono::Utc;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::classify::PrimaryTopic;
use crate::pipeline::NewsletterEntry;

fn topic_header(topic: PrimaryTopic) -> &'static str {
    match topic {
        PrimaryTopic::Papers => "### 📄 Papers",
        PrimaryTopic::Blogs => "### ✍️ Blogs",
        PrimaryTopic::OpenSource => "### 🛠️ Open Source",
        PrimaryTopic::EngineeringProductBusiness => "### 🏢 Engineering & Product & Business",
        PrimaryTopic::Unknown => "### ❓ Uncategorized",
    }
}

#[derive(Debug, Default)]
pub struct MarkdownRenderer;

impl MarkdownRenderer {
    pub fn new() -> Self {
        MarkdownRenderer
    }

    /// Render entries into one Markdown document with a single trailing
    /// newline. Topics with no entries are omitted entirely.
    pub fn render(&self, entries: &[NewsletterEntry]) -> String {
        let mut sections: Vec<String> = Vec::new();

        for topic in PrimaryTopic::DISPLAY_ORDER {
            let topic_entries: Vec<&NewsletterEntry> = entries
                .iter()
                .filter(|entry| entry.topic == topic)
                .collect();
            if topic_entries.is_empty() {
                continue;
            }
            sections.push(topic_header(topic).to_string());
            if topic == PrimaryTopic::Papers {
                sections.push(render_paper_subsections(&topic_entries));
            } else {
                sections.push(render_entries(&topic_entries));
            }
        }

        let document = sections
            .iter()
            .map(|section| section.trim())
            .filter(|section| !section.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
        format!("{}\n", document.trim())
    }

    /// Render and write to a timestamped file inside `output_dir`.
    pub fn write(&self, entries: &[NewsletterEntry], output_dir: &Path) -> io::Result<PathBuf> {
        fs::create_dir_all(output_dir)?;
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let output_path = output_dir.join(format!("newsletter_{}.md", timestamp));
        fs::write(&output_path, self.render(entries))?;
        Ok(output_path)
    }
}

fn render_paper_subsections(entries: &[&NewsletterEntry]) -> String {
    // BTreeMap keeps subtopic groups in lexicographic order.
    let mut buckets: BTreeMap<String, Vec<&NewsletterEntry>> = BTreeMap::new();
    for entry in entries {
        let mut subtopics: Vec<String> = if !entry.subtopics.is_empty() {
            entry.subtopics.clone()
        } else if !entry.metadata.subtopics.is_empty() {
            entry.metadata.subtopics.clone()
        } else {
            vec!["General".to_string()]
        };
        subtopics.dedup();
        for subtopic in subtopics {
            buckets.entry(subtopic).or_default().push(entry);
        }
    }

    let mut blocks: Vec<String> = Vec::new();
    for (subtopic, bucket) in &buckets {
        blocks.push(format!("#### {}", subtopic));
        blocks.push(render_entries(bucket));
    }
    blocks.join("\n\n")
}

fn render_entries(entries: &[&NewsletterEntry]) -> String {
    let mut blocks: Vec<String> = Vec::new();
    for entry in entries {
        let metadata = &entry.metadata;
        let mut lines = vec![format!("**{}**", metadata.title)];
        lines.push(format!("Link: {}", entry.source_url));
        if !metadata.authors.is_empty() {
            lines.push(format!("Authors: {}", metadata.authors.join(", ")));
        }
        if !metadata.organizations.is_empty() {
            lines.push(format!(
                "Organizations: {}",
                metadata.organizations.join(", ")
            ));
        }
        lines.push(format!("Recommendation: {}", metadata.recommendation));
        if !metadata.repositories.is_empty() {
            let repos: Vec<&str> = metadata
                .repositories
                .iter()
                .map(|repo| repo.url.as_str())
                .collect();
            lines.push(format!("Repositories: {}", repos.join(", ")));
        }
        if !metadata.datasets.is_empty() {
            lines.push(format!("Datasets: {}", metadata.datasets.join(", ")));
        }
        if !metadata.attachments.is_empty() {
            lines.push(format!("Attachments: {}", metadata.attachments.join(", ")));
        }
        // Two-space suffix keeps Markdown hard line breaks inside a block.
        blocks.push(lines.join("  \n"));
    }
    blocks.join("\n\n")
}
