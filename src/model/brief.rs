//! Research brief: the approved goal and its scope items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Which kinds of work a scope item needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    /// Quantitative data only.
    Data,
    /// Qualitative research only.
    Research,
    /// Both data and research.
    Both,
}

impl ScopeKind {
    /// Whether this scope needs a data facet.
    pub fn needs_data(&self) -> bool {
        matches!(self, ScopeKind::Data | ScopeKind::Both)
    }

    /// Whether this scope needs a research facet.
    pub fn needs_research(&self) -> bool {
        matches!(self, ScopeKind::Research | ScopeKind::Both)
    }
}

/// Relative importance of a scope item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Nice to have.
    Low,
    /// Default importance.
    #[default]
    Medium,
    /// Must be covered.
    High,
}

impl Priority {
    /// Weight used when aggregating coverage.
    pub fn weight(&self) -> f64 {
        match self {
            Priority::Low => 1.0,
            Priority::Medium => 2.0,
            Priority::High => 3.0,
        }
    }
}

/// One topic the research must address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeItem {
    /// Stable identifier referenced by tasks and results.
    #[serde(default)]
    pub id: String,
    /// What to investigate.
    pub topic: String,
    /// Data, research or both.
    pub kind: ScopeKind,
    /// Importance.
    #[serde(default)]
    pub priority: Priority,
    /// Specific aspects the user asked about.
    #[serde(default)]
    pub aspects: Vec<String>,
}

impl ScopeItem {
    /// Create a scope item with the given id.
    pub fn new(id: impl Into<String>, topic: impl Into<String>, kind: ScopeKind) -> Self {
        Self {
            id: id.into(),
            topic: topic.into(),
            kind,
            priority: Priority::default(),
            aspects: Vec::new(),
        }
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Add an aspect.
    pub fn with_aspect(mut self, aspect: impl Into<String>) -> Self {
        self.aspects.push(aspect.into());
        self
    }
}

/// Research goal agreed with the user. Immutable once approved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Brief {
    /// Incremented every time a new draft replaces an older one.
    #[serde(default = "default_version")]
    pub version: u32,
    /// One-sentence research goal.
    pub goal: String,
    /// Ordered, non-empty scope.
    pub scope: Vec<ScopeItem>,
    /// Requested output formats (e.g. "markdown", "pdf").
    #[serde(default)]
    pub output_formats: Vec<String>,
    /// Free-form constraints (time range, geography, sources to avoid).
    #[serde(default)]
    pub constraints: Vec<String>,
    /// Set when the user approves the brief.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
}

fn default_version() -> u32 {
    1
}

impl Brief {
    /// Create an unapproved brief.
    pub fn new(goal: impl Into<String>, scope: Vec<ScopeItem>) -> Self {
        Self {
            version: 1,
            goal: goal.into(),
            scope,
            output_formats: Vec::new(),
            constraints: Vec::new(),
            approved_at: None,
        }
    }

    /// Add a requested output format.
    pub fn with_output_format(mut self, format: impl Into<String>) -> Self {
        self.output_formats.push(format.into());
        self
    }

    /// Add a constraint.
    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraints.push(constraint.into());
        self
    }

    /// Fill in missing scope ids (`s1`, `s2`, ...) and reject empty or
    /// duplicate entries.
    pub fn normalize(mut self) -> PipelineResult<Self> {
        if self.goal.trim().is_empty() {
            return Err(PipelineError::InvalidBrief {
                message: "goal cannot be empty".to_string(),
            });
        }
        if self.scope.is_empty() {
            return Err(PipelineError::InvalidBrief {
                message: "scope must contain at least one item".to_string(),
            });
        }

        for (i, item) in self.scope.iter_mut().enumerate() {
            if item.id.trim().is_empty() {
                item.id = format!("s{}", i + 1);
            }
            if item.topic.trim().is_empty() {
                return Err(PipelineError::InvalidBrief {
                    message: format!("scope item {} has an empty topic", item.id),
                });
            }
        }

        let mut seen = std::collections::HashSet::new();
        for item in &self.scope {
            if !seen.insert(item.id.as_str()) {
                return Err(PipelineError::InvalidBrief {
                    message: format!("duplicate scope item id {}", item.id),
                });
            }
        }

        Ok(self)
    }

    /// Look up a scope item by id.
    pub fn scope_item(&self, id: &str) -> Option<&ScopeItem> {
        self.scope.iter().find(|item| item.id == id)
    }

    /// Whether the brief has been approved.
    pub fn is_approved(&self) -> bool {
        self.approved_at.is_some()
    }
}

/// Who said a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    /// The research requester.
    User,
    /// The brief-building collaborator.
    Assistant,
}

/// One message of the brief-building conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Speaker.
    pub role: TurnRole,
    /// Message text.
    pub content: String,
    /// When the turn was recorded.
    pub at: DateTime<Utc>,
}

/// The brief-building conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Turns in order.
    pub turns: Vec<ConversationTurn>,
}

impl Conversation {
    /// Append a turn.
    pub fn push(&mut self, role: TurnRole, content: impl Into<String>) {
        self.turns.push(ConversationTurn {
            role,
            content: content.into(),
            at: Utc::now(),
        });
    }

    /// Number of user messages so far.
    pub fn user_turns(&self) -> usize {
        self.turns
            .iter()
            .filter(|turn| turn.role == TurnRole::User)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_assigns_ids() {
        let brief = Brief::new(
            "Assess the market",
            vec![
                ScopeItem::new("", "Market size", ScopeKind::Data),
                ScopeItem::new("", "Competitors", ScopeKind::Research),
            ],
        )
        .normalize()
        .unwrap();

        assert_eq!(brief.scope[0].id, "s1");
        assert_eq!(brief.scope[1].id, "s2");
        assert!(brief.scope_item("s2").is_some());
    }

    #[test]
    fn test_normalize_rejects_empty_scope() {
        let err = Brief::new("goal", vec![]).normalize().unwrap_err();
        assert!(matches!(err, PipelineError::InvalidBrief { .. }));
    }

    #[test]
    fn test_normalize_rejects_duplicate_ids() {
        let err = Brief::new(
            "goal",
            vec![
                ScopeItem::new("a", "one", ScopeKind::Data),
                ScopeItem::new("a", "two", ScopeKind::Data),
            ],
        )
        .normalize()
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_scope_kind_facets() {
        assert!(ScopeKind::Both.needs_data());
        assert!(ScopeKind::Both.needs_research());
        assert!(!ScopeKind::Data.needs_research());
        assert!(!ScopeKind::Research.needs_data());
    }

    #[test]
    fn test_brief_deserializes_with_defaults() {
        let brief: Brief = serde_json::from_value(serde_json::json!({
            "goal": "g",
            "scope": [{"topic": "t", "kind": "both"}]
        }))
        .unwrap();
        assert_eq!(brief.version, 1);
        assert_eq!(brief.scope[0].priority, Priority::Medium);
        assert!(!brief.is_approved());
    }

    #[test]
    fn test_conversation_counts_user_turns() {
        let mut conversation = Conversation::default();
        conversation.push(TurnRole::User, "hi");
        conversation.push(TurnRole::Assistant, "which region?");
        conversation.push(TurnRole::User, "EU");
        assert_eq!(conversation.user_turns(), 2);
    }
}
