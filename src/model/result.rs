//! Task results, follow-up questions and the final synthesis.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Task, TaskKind};

/// Outcome of a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// The task fully achieved its goal.
    Completed,
    /// Some useful output, with known gaps.
    Partial,
    /// No usable output.
    Failed,
}

impl TaskStatus {
    /// Contribution of this outcome to a facet's coverage.
    pub fn coverage_weight(&self) -> f64 {
        match self {
            TaskStatus::Completed => 1.0,
            TaskStatus::Partial => 0.5,
            TaskStatus::Failed => 0.0,
        }
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Completed => "completed",
            TaskStatus::Partial => "partial",
            TaskStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A follow-up question raised by a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// Question text.
    pub text: String,
    /// Whether it calls for data or research.
    #[serde(rename = "type")]
    pub kind: TaskKind,
    /// Scope item the question relates to, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_item_id: Option<String>,
}

impl Question {
    /// Create a question.
    pub fn new(text: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            text: text.into(),
            kind,
            scope_item_id: None,
        }
    }

    /// Tie the question to a scope item.
    pub fn for_scope(mut self, scope_item_id: impl Into<String>) -> Self {
        self.scope_item_id = Some(scope_item_id.into());
        self
    }
}

/// A cited source.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceRef {
    /// Title of the source.
    pub title: String,
    /// Location, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A research finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// The claim.
    pub claim: String,
    /// Supporting evidence, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

/// Task output. The variant follows the task kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskPayload {
    /// Tables and named metrics.
    Data {
        #[serde(default)]
        tables: Vec<serde_json::Value>,
        #[serde(default)]
        metrics: BTreeMap<String, serde_json::Value>,
    },
    /// Findings and their sources.
    Research {
        #[serde(default)]
        findings: Vec<Finding>,
        #[serde(default)]
        sources: Vec<SourceRef>,
    },
    /// Nothing produced.
    Empty,
}

/// Outcome of one task in one round. Written once per (round, task_id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Task id (`d<N>` / `r<N>`).
    pub task_id: String,
    /// Data or research.
    pub kind: TaskKind,
    /// Scope item the task targeted.
    pub scope_item_id: String,
    /// Round the task ran in.
    pub round: u32,
    /// Outcome.
    pub status: TaskStatus,
    /// Agent's confidence in the output (0.0-1.0).
    pub confidence: f64,
    /// Output.
    pub payload: TaskPayload,
    /// Follow-up questions.
    #[serde(default)]
    pub questions: Vec<Question>,
    /// Aspects the agent could not address.
    #[serde(default)]
    pub gaps: Vec<String>,
    /// Failure reason for failed results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock time spent.
    #[serde(default)]
    pub duration_ms: u64,
    /// When the result was recorded.
    pub completed_at: DateTime<Utc>,
}

impl TaskResult {
    /// A completed result for `task`.
    pub fn completed(task: &Task, round: u32, payload: TaskPayload) -> Self {
        Self {
            task_id: task.id.clone(),
            kind: task.kind,
            scope_item_id: task.scope_item_id.clone(),
            round,
            status: TaskStatus::Completed,
            confidence: 1.0,
            payload,
            questions: Vec::new(),
            gaps: Vec::new(),
            error: None,
            duration_ms: 0,
            completed_at: Utc::now(),
        }
    }

    /// A failed result for `task` with the given reason.
    pub fn failed(task: &Task, round: u32, reason: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Failed,
            confidence: 0.0,
            payload: TaskPayload::Empty,
            error: Some(reason.into()),
            ..Self::completed(task, round, TaskPayload::Empty)
        }
    }

    /// Mark the result partial.
    pub fn partial(mut self) -> Self {
        self.status = TaskStatus::Partial;
        self
    }

    /// Set the confidence (clamped to 0.0-1.0).
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Add a follow-up question.
    pub fn with_question(mut self, question: Question) -> Self {
        self.questions.push(question);
        self
    }

    /// Add a gap.
    pub fn with_gap(mut self, gap: impl Into<String>) -> Self {
        self.gaps.push(gap.into());
        self
    }

    /// Set the duration.
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Whether the result carries usable output.
    pub fn is_usable(&self) -> bool {
        self.status != TaskStatus::Failed
    }
}

/// A section of the final narrative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    /// Section heading.
    pub title: String,
    /// Section body.
    pub body: String,
}

/// Final synthesis across all rounds. Produced once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    /// Most important findings.
    pub key_findings: Vec<String>,
    /// Recommended actions.
    #[serde(default)]
    pub recommendations: Vec<String>,
    /// Narrative sections.
    #[serde(default)]
    pub sections: Vec<Section>,
    /// Deduplicated sources.
    #[serde(default)]
    pub bibliography: Vec<SourceRef>,
    /// Overall coverage reached.
    #[serde(default)]
    pub coverage: f64,
    /// Number of rounds run.
    #[serde(default)]
    pub rounds: u32,
    /// When the aggregation was produced.
    pub created_at: DateTime<Utc>,
}

/// Rendered report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Format of `content`.
    pub format: String,
    /// Rendered report body.
    pub content: String,
    /// Formats the brief asked for.
    #[serde(default)]
    pub requested_formats: Vec<String>,
    /// When the report was produced.
    pub created_at: DateTime<Utc>,
}
