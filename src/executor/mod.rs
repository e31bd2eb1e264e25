//! Concurrent execution of one round's tasks.
//!
//! Every task of a round is spawned onto a [`JoinSet`] at once. A task's
//! error or panic becomes a `failed` result for that task only. The round
//! deadline bounds the whole fan-out: whatever has not settled when it
//! passes is aborted and recorded as failed with a timeout reason.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::agents::{TaskAgents, TaskContext};
use crate::error::{AgentResult, StorageResult};
use crate::model::{Brief, Question, Task, TaskKind, TaskResult};
use crate::storage::{SessionRecords, StateStore};
use crate::tracker::ResourceTracker;

/// Receives each result as soon as it settles.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn persist(&self, result: &TaskResult) -> StorageResult<()>;
}

/// Writes settled results to a session in a [`StateStore`].
pub struct StoreSink {
    store: Arc<dyn StateStore>,
    session_id: String,
}

impl StoreSink {
    pub fn new(store: Arc<dyn StateStore>, session_id: impl Into<String>) -> Self {
        Self {
            store,
            session_id: session_id.into(),
        }
    }
}

#[async_trait]
impl ResultSink for StoreSink {
    async fn persist(&self, result: &TaskResult) -> StorageResult<()> {
        SessionRecords::new(self.store.as_ref(), &self.session_id)
            .save_result(result)
            .await
            .map(|_| ())
    }
}

/// Shared inputs of every task in a round.
#[derive(Debug, Clone)]
pub struct RoundContext {
    pub session_id: String,
    pub round: u32,
    pub brief: Arc<Brief>,
    pub prior_results: Arc<Vec<TaskResult>>,
}

/// Results of a round, in plan order, plus the follow-up questions raised.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoundOutcome {
    pub data_results: Vec<TaskResult>,
    pub research_results: Vec<TaskResult>,
    pub questions: Vec<Question>,
    /// Tasks cut off by the round deadline.
    pub timed_out: usize,
}

impl RoundOutcome {
    /// All results, data first.
    pub fn results(&self) -> impl Iterator<Item = &TaskResult> {
        self.data_results.iter().chain(self.research_results.iter())
    }

    pub fn len(&self) -> usize {
        self.data_results.len() + self.research_results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Follow-up questions from completed and partial results, in result order.
pub fn collect_questions<'a>(results: impl IntoIterator<Item = &'a TaskResult>) -> Vec<Question> {
    results
        .into_iter()
        .filter(|r| r.is_usable())
        .flat_map(|r| r.questions.iter().cloned())
        .collect()
}

/// Fans a round's tasks out to the task agents.
pub struct ParallelExecutor {
    agents: TaskAgents,
    tracker: Arc<ResourceTracker>,
}

impl ParallelExecutor {
    pub fn new(agents: TaskAgents, tracker: Arc<ResourceTracker>) -> Self {
        Self { agents, tracker }
    }

    /// Run all tasks concurrently and settle every one of them by
    /// `timeout`. Never fails: task errors, panics and timeouts all become
    /// `failed` results.
    pub async fn execute_round(
        &self,
        data_tasks: &[Task],
        research_tasks: &[Task],
        context: &RoundContext,
        timeout: Duration,
        sink: Option<&dyn ResultSink>,
    ) -> RoundOutcome {
        let deadline = Instant::now() + timeout;
        let tasks: Vec<Task> = data_tasks.iter().chain(research_tasks).cloned().collect();

        info!(
            session_id = %context.session_id,
            round = context.round,
            data_tasks = data_tasks.len(),
            research_tasks = research_tasks.len(),
            timeout_secs = timeout.as_secs(),
            "Dispatching round"
        );

        let mut set = JoinSet::new();
        let mut spawned: HashMap<Id, usize> = HashMap::with_capacity(tasks.len());
        for (index, task) in tasks.iter().enumerate() {
            let agent = self.agents.for_kind(task.kind);
            let task_context = TaskContext {
                session_id: context.session_id.clone(),
                round: context.round,
                task: task.clone(),
                brief: Arc::clone(&context.brief),
                prior_results: Arc::clone(&context.prior_results),
            };
            let started = Instant::now();
            let handle = set.spawn(async move {
                let outcome = agent.execute(&task_context, deadline).await;
                (outcome, started.elapsed())
            });
            spawned.insert(handle.id(), index);
        }

        let mut settled: Vec<Option<TaskResult>> = vec![None; tasks.len()];
        let mut deadline_hit = false;
        loop {
            match tokio::time::timeout_at(deadline, set.join_next_with_id()).await {
                Ok(Some(Ok((id, (outcome, elapsed))))) => {
                    let Some(&index) = spawned.get(&id) else { continue };
                    let result = settle(&tasks[index], context.round, outcome, elapsed);
                    self.record(&result, elapsed, false, deadline, sink).await;
                    settled[index] = Some(result);
                }
                Ok(Some(Err(join_error))) => {
                    let Some(&index) = spawned.get(&join_error.id()) else { continue };
                    let task = &tasks[index];
                    let reason = join_failure(join_error);
                    error!(
                        session_id = %context.session_id,
                        round = context.round,
                        task_id = %task.id,
                        reason = %reason,
                        "Task aborted"
                    );
                    let result = TaskResult::failed(task, context.round, reason);
                    self.record(&result, Duration::ZERO, false, deadline, sink).await;
                    settled[index] = Some(result);
                }
                Ok(None) => break,
                Err(_) => {
                    deadline_hit = true;
                    set.abort_all();
                    break;
                }
            }
        }

        let reason = if deadline_hit {
            format!("timeout: round deadline of {}s exceeded", timeout.as_secs())
        } else {
            "task aborted before producing a result".to_string()
        };
        let mut timed_out = 0;
        for (task, slot) in tasks.iter().zip(settled.iter_mut()) {
            if slot.is_some() {
                continue;
            }
            if deadline_hit {
                timed_out += 1;
            }
            warn!(
                session_id = %context.session_id,
                round = context.round,
                task_id = %task.id,
                reason = %reason,
                "Marking unsettled task failed"
            );
            let result = TaskResult::failed(task, context.round, reason.clone())
                .with_duration_ms(timeout.as_millis() as u64);
            self.record(&result, timeout, deadline_hit, deadline, sink).await;
            *slot = Some(result);
        }

        let mut outcome = RoundOutcome {
            timed_out,
            ..RoundOutcome::default()
        };
        for result in settled.into_iter().flatten() {
            match result.kind {
                TaskKind::Data => outcome.data_results.push(result),
                TaskKind::Research => outcome.research_results.push(result),
            }
        }
        outcome.questions = collect_questions(outcome.results());

        self.tracker.record_round().await;
        info!(
            session_id = %context.session_id,
            round = context.round,
            results = outcome.len(),
            timed_out = outcome.timed_out,
            questions = outcome.questions.len(),
            "Round settled"
        );
        outcome
    }

    /// Count `result` and hand it to the sink. The write is bounded by the
    /// round deadline; the pipeline saves the whole round again once it
    /// settles, so a skipped early write loses nothing.
    async fn record(
        &self,
        result: &TaskResult,
        elapsed: Duration,
        timed_out: bool,
        deadline: Instant,
        sink: Option<&dyn ResultSink>,
    ) {
        self.tracker
            .record_task(result.kind, result.status, elapsed, timed_out)
            .await;
        let Some(sink) = sink else { return };
        match tokio::time::timeout_at(deadline, sink.persist(result)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(task_id = %result.task_id, error = %e, "Failed to persist result early");
            }
            Err(_) => {
                warn!(task_id = %result.task_id, "Early persist cut off by round deadline");
            }
        }
    }
}

/// Failure reason for a task whose future panicked or was cancelled.
fn join_failure(err: JoinError) -> String {
    let payload = match err.try_into_panic() {
        Ok(payload) => payload,
        Err(_) => return "task cancelled before producing a result".to_string(),
    };
    let message = payload
        .downcast_ref::<&str>()
        .map(|m| m.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned());
    match message {
        Some(message) => format!("task panicked: {}", message),
        None => "task panicked".to_string(),
    }
}

/// Turn an agent outcome into the result recorded for `task`.
fn settle(task: &Task, round: u32, outcome: AgentResult<TaskResult>, elapsed: Duration) -> TaskResult {
    match outcome {
        Ok(mut result) => {
            result.task_id = task.id.clone();
            result.kind = task.kind;
            result.scope_item_id = task.scope_item_id.clone();
            result.round = round;
            if result.duration_ms == 0 {
                result.duration_ms = elapsed.as_millis() as u64;
            }
            debug!(task_id = %task.id, status = %result.status, "Task settled");
            result
        }
        Err(e) => {
            warn!(task_id = %task.id, round, error = %e, "Task failed");
            TaskResult::failed(task, round, e.to_string()).with_duration_ms(elapsed.as_millis() as u64)
        }
    }
}
