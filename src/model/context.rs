//! Initial research context gathered before the brief conversation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Background on the user's query, used to seed the brief conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchContext {
    /// Short overview of the topic.
    pub summary: String,
    /// Facts worth knowing before scoping.
    #[serde(default)]
    pub background: Vec<String>,
    /// Candidate scope topics.
    #[serde(default)]
    pub suggested_topics: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl ResearchContext {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            background: Vec::new(),
            suggested_topics: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_background(mut self, fact: impl Into<String>) -> Self {
        self.background.push(fact.into());
        self
    }

    pub fn with_suggested_topic(mut self, topic: impl Into<String>) -> Self {
        self.suggested_topics.push(topic.into());
        self
    }
}
