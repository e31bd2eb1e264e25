//! Read-only views returned by pipeline operations.

use serde::Serialize;

use crate::coverage::CoverageDecision;
use crate::model::{Aggregation, Brief, Report, Session, TaskStatus};
use crate::storage::SessionSnapshot;

/// What the brief collaborator answered to a user message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BriefReply {
    /// A clarifying question; the conversation continues.
    Question { question: String },
    /// A complete draft, awaiting approval.
    Draft { brief: Brief },
}

/// Per-round progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundSummary {
    pub round: u32,
    /// Tasks in the round's plan.
    pub planned: usize,
    pub completed: usize,
    pub partial: usize,
    pub failed: usize,
    /// Overall coverage after the round, once reviewed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage: Option<f64>,
}

/// Session status with round progress.
#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    pub session: Session,
    /// A draft brief is waiting for approval.
    pub draft_pending: bool,
    pub rounds: Vec<RoundSummary>,
}

impl StatusView {
    pub(crate) fn from_snapshot(snapshot: &SessionSnapshot) -> Self {
        let rounds = snapshot
            .plans
            .iter()
            .map(|(&round, plan)| {
                let results = snapshot.results.get(&round).map(Vec::as_slice).unwrap_or(&[]);
                let count = |status: TaskStatus| results.iter().filter(|r| r.status == status).count();
                RoundSummary {
                    round,
                    planned: plan.task_count(),
                    completed: count(TaskStatus::Completed),
                    partial: count(TaskStatus::Partial),
                    failed: count(TaskStatus::Failed),
                    coverage: snapshot.coverage.get(&round).map(|c| c.overall),
                }
            })
            .collect();

        Self {
            session: snapshot.session.clone(),
            draft_pending: snapshot.brief.is_none() && snapshot.brief_draft.is_some(),
            rounds,
        }
    }
}

/// Final (or partial) outputs of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionResults {
    pub session: Session,
    /// Whether the session reached `DONE`.
    pub complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brief: Option<Brief>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage: Option<CoverageDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<Aggregation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<Report>,
}

impl SessionResults {
    pub(crate) fn from_snapshot(snapshot: SessionSnapshot) -> Self {
        let coverage = snapshot.latest_coverage().cloned();
        Self {
            complete: snapshot.session.status == crate::model::SessionStatus::Done,
            session: snapshot.session,
            brief: snapshot.brief,
            coverage,
            aggregation: snapshot.aggregation,
            report: snapshot.report,
        }
    }
}
