use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use super::{SessionRecords, StateStore};
use crate::coverage::CoverageDecision;
use crate::error::StorageResult;
use crate::model::{
    Aggregation, Brief, Conversation, Plan, Report, ResearchContext, Session, Task, TaskResult,
};

/// Everything persisted for one session, rebuilt from the store.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session: Session,
    pub conversation: Conversation,
    pub context: Option<ResearchContext>,
    pub brief_draft: Option<Brief>,
    pub brief: Option<Brief>,
    /// Plans by round.
    pub plans: BTreeMap<u32, Plan>,
    /// Task results by round.
    pub results: BTreeMap<u32, Vec<TaskResult>>,
    /// Coverage decisions by round.
    pub coverage: BTreeMap<u32, CoverageDecision>,
    pub aggregation: Option<Aggregation>,
    pub report: Option<Report>,
}

impl SessionSnapshot {
    /// All results across rounds, in round order.
    pub fn all_results(&self) -> Vec<TaskResult> {
        self.results.values().flatten().cloned().collect()
    }

    /// Tasks of `round`'s plan that have no saved result.
    pub fn pending_tasks(&self, round: u32) -> Vec<Task> {
        let Some(plan) = self.plans.get(&round) else {
            return Vec::new();
        };
        let done = self.results.get(&round);
        plan.tasks()
            .filter(|task| {
                !done.is_some_and(|results| results.iter().any(|r| r.task_id == task.id))
            })
            .cloned()
            .collect()
    }

    /// The most recent coverage decision.
    pub fn latest_coverage(&self) -> Option<&CoverageDecision> {
        self.coverage.values().next_back()
    }
}

/// Rebuild the full view of `session_id` from the store.
///
/// Returns `None` if no session record exists. Rounds are read up to
/// `current_round + 1` so a plan saved just before a crash is found.
pub async fn restore_session(
    store: &dyn StateStore,
    session_id: &str,
) -> StorageResult<Option<SessionSnapshot>> {
    let records = SessionRecords::new(store, session_id);
    let Some(session) = records.load_session().await? else {
        return Ok(None);
    };

    let mut plans = BTreeMap::new();
    let mut results = BTreeMap::new();
    let mut coverage = BTreeMap::new();
    for round in 1..=session.current_round + 1 {
        if let Some(plan) = records.load_plan(round).await? {
            plans.insert(round, plan);
        }
        let round_results = records.load_results(round).await?;
        if !round_results.is_empty() {
            results.insert(round, round_results);
        }
        if let Some(decision) = records.load_coverage(round).await? {
            coverage.insert(round, decision);
        }
    }

    let snapshot = SessionSnapshot {
        conversation: records.load_conversation().await?,
        context: records.load_context().await?,
        brief_draft: records.load_brief_draft().await?,
        brief: records.load_brief().await?,
        plans,
        results,
        coverage,
        aggregation: records.load_aggregation().await?,
        report: records.load_report().await?,
        session,
    };

    debug!(
        session_id,
        status = %snapshot.session.status,
        round = snapshot.session.current_round,
        plans = snapshot.plans.len(),
        results = snapshot.results.values().map(Vec::len).sum::<usize>(),
        "Session restored"
    );
    Ok(Some(snapshot))
}
