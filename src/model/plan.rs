//! Per-round plans and the tasks they contain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Brief;
use crate::error::{PipelineError, PipelineResult};

/// Kind of task. Also used to tag follow-up questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Quantitative data collection (`d<N>`).
    Data,
    /// Qualitative research (`r<N>`).
    Research,
}

impl TaskKind {
    /// Id prefix for tasks of this kind.
    pub fn prefix(&self) -> char {
        match self {
            TaskKind::Data => 'd',
            TaskKind::Research => 'r',
        }
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Data => "data",
            TaskKind::Research => "research",
        }
    }

    /// Build the task id for the `n`-th task of this kind.
    pub fn task_id(&self, n: usize) -> String {
        format!("{}{}", self.prefix(), n)
    }

    /// Whether `id` matches `<prefix><N>` with N >= 1.
    pub fn matches_id(&self, id: &str) -> bool {
        let mut chars = id.chars();
        chars.next() == Some(self.prefix())
            && id.len() > 1
            && id[1..].chars().all(|c| c.is_ascii_digit())
            && !id[1..].starts_with('0')
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// HTTP method of a data-source call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

/// Optional data-source hint for data tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    /// Connector endpoint URL.
    pub endpoint: String,
    /// GET sends params as the query string, POST as a JSON body.
    #[serde(default)]
    pub method: HttpMethod,
    /// Query parameters.
    #[serde(default)]
    pub params: serde_json::Value,
}

/// A unit of work targeting one scope item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// `d<N>` or `r<N>`, unique within the plan.
    pub id: String,
    /// Data or research.
    pub kind: TaskKind,
    /// Scope item this task covers.
    pub scope_item_id: String,
    /// What the agent should do.
    pub description: String,
    /// Data-source hint, data tasks only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<DataSource>,
}

impl Task {
    /// Create a data task.
    pub fn data(
        id: impl Into<String>,
        scope_item_id: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: TaskKind::Data,
            scope_item_id: scope_item_id.into(),
            description: description.into(),
            source: None,
        }
    }

    /// Create a research task.
    pub fn research(
        id: impl Into<String>,
        scope_item_id: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: TaskKind::Research,
            scope_item_id: scope_item_id.into(),
            description: description.into(),
            source: None,
        }
    }

    /// Attach a data-source hint.
    pub fn with_source(mut self, endpoint: impl Into<String>, params: serde_json::Value) -> Self {
        self.source = Some(DataSource {
            endpoint: endpoint.into(),
            method: HttpMethod::Get,
            params,
        });
        self
    }
}

/// The plan for one round. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Round number, starting at 1.
    pub round: u32,
    /// Data tasks in order.
    pub data_tasks: Vec<Task>,
    /// Research tasks in order.
    pub research_tasks: Vec<Task>,
    /// Planner's estimate of coverage after this round (0.0-1.0).
    pub estimated_coverage: f64,
    /// Why these tasks were chosen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
}

impl Plan {
    /// Create a plan.
    pub fn new(round: u32, data_tasks: Vec<Task>, research_tasks: Vec<Task>) -> Self {
        Self {
            round,
            data_tasks,
            research_tasks,
            estimated_coverage: 0.0,
            rationale: None,
            created_at: Utc::now(),
        }
    }

    /// Set the estimated coverage (clamped to 0.0-1.0).
    pub fn with_estimated_coverage(mut self, coverage: f64) -> Self {
        self.estimated_coverage = coverage.clamp(0.0, 1.0);
        self
    }

    /// Set the rationale.
    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }

    /// Total task count.
    pub fn task_count(&self) -> usize {
        self.data_tasks.len() + self.research_tasks.len()
    }

    /// All tasks, data first.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.data_tasks.iter().chain(self.research_tasks.iter())
    }

    /// Check task ids, kinds and scope references against the brief.
    pub fn validate(&self, brief: &Brief) -> PipelineResult<()> {
        if self.round == 0 {
            return Err(invalid_plan("round numbers start at 1".to_string()));
        }

        let mut seen = std::collections::HashSet::new();
        for (expected, tasks) in [
            (TaskKind::Data, &self.data_tasks),
            (TaskKind::Research, &self.research_tasks),
        ] {
            for task in tasks {
                if task.kind != expected || !expected.matches_id(&task.id) {
                    return Err(invalid_plan(format!(
                        "task {} is not a valid {} task id",
                        task.id, expected
                    )));
                }
                if !seen.insert(task.id.as_str()) {
                    return Err(invalid_plan(format!("duplicate task id {}", task.id)));
                }
                if brief.scope_item(&task.scope_item_id).is_none() {
                    return Err(invalid_plan(format!(
                        "task {} references unknown scope item {}",
                        task.id, task.scope_item_id
                    )));
                }
            }
        }

        Ok(())
    }
}

fn invalid_plan(reason: String) -> PipelineError {
    PipelineError::Validation {
        field: "plan".to_string(),
        reason,
    }
}
