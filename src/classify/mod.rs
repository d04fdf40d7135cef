//! Topic and subtopic classification.

mod subtopic;
mod topic;

pub use subtopic::{SubtopicClassifier, SUPPORTED_SUBTOPICS};
pub use topic::TopicClassifier;

use serde::{Deserialize, Serialize};

use crate::reader::ArticleContent;

/// The coarse category assigned to one article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimaryTopic {
    Papers,
    Blogs,
    OpenSource,
    EngineeringProductBusiness,
    Unknown,
}

impl PrimaryTopic {
    /// Fixed display order used when rendering grouped output.
    pub const DISPLAY_ORDER: [PrimaryTopic; 5] = [
        PrimaryTopic::Papers,
        PrimaryTopic::Blogs,
        PrimaryTopic::OpenSource,
        PrimaryTopic::EngineeringProductBusiness,
        PrimaryTopic::Unknown,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            PrimaryTopic::Papers => "Papers",
            PrimaryTopic::Blogs => "Blogs",
            PrimaryTopic::OpenSource => "Open Source",
            PrimaryTopic::EngineeringProductBusiness => "Engineering & Product & Business",
            PrimaryTopic::Unknown => "Unknown",
        }
    }
}

/// Which path produced a topic decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationSource {
    Rules,
    Llm,
}

/// An article plus its assigned primary topic.
#[derive(Debug, Clone)]
pub struct ClassifiedArticle {
    pub content: ArticleContent,
    pub topic: PrimaryTopic,
    pub source: ClassificationSource,
}
