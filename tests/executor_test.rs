//! Integration tests for `ParallelExecutor`: failure isolation, the round
//! deadline and early persistence through `StoreSink`.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{ev_brief, Behavior, ScriptedTasks};
use research_pipeline::agents::{TaskAgents, TaskCollaborator};
use research_pipeline::executor::{ParallelExecutor, RoundContext, StoreSink};
use research_pipeline::model::{Task, TaskStatus};
use research_pipeline::storage::{InMemoryStateStore, SessionRecords, StateStore};
use research_pipeline::tracker::ResourceTracker;
use tokio::time::Instant;

fn executor(tasks: Arc<ScriptedTasks>) -> (ParallelExecutor, Arc<ResourceTracker>) {
    let agent: Arc<dyn TaskCollaborator> = tasks;
    let tracker = Arc::new(ResourceTracker::new());
    (
        ParallelExecutor::new(TaskAgents::new(Arc::clone(&agent), agent), Arc::clone(&tracker)),
        tracker,
    )
}

fn context(round: u32) -> RoundContext {
    RoundContext {
        session_id: "session-1".to_string(),
        round,
        brief: Arc::new(ev_brief()),
        prior_results: Arc::new(Vec::new()),
    }
}

fn data_tasks(n: usize) -> Vec<Task> {
    (1..=n)
        .map(|i| Task::data(format!("d{}", i), "s2", format!("Series {}", i)))
        .collect()
}

#[cfg(test)]
mod isolation_tests {
    use super::*;

    #[tokio::test]
    async fn test_every_task_gets_exactly_one_result() {
        let tasks = ScriptedTasks::new()
            .on(1, "d2", Behavior::NetworkFailure)
            .on(1, "d5", Behavior::Panic)
            .on(1, "r2", Behavior::NetworkFailure);
        let (executor, tracker) = executor(Arc::clone(&tasks));
        let research = vec![
            Task::research("r1", "s1", "Drivers"),
            Task::research("r2", "s1", "Barriers"),
        ];

        let outcome = executor
            .execute_round(&data_tasks(6), &research, &context(1), Duration::from_secs(30), None)
            .await;

        assert_eq!(outcome.len(), 8);
        assert_eq!(tasks.executed().len(), 8);
        let failed: Vec<&str> = outcome
            .results()
            .filter(|r| r.status == TaskStatus::Failed)
            .map(|r| r.task_id.as_str())
            .collect();
        assert_eq!(failed, vec!["d2", "d5", "r2"]);
        assert!(outcome
            .results()
            .all(|r| r.round == 1 && !r.scope_item_id.is_empty()));

        let snapshot = tracker.snapshot().await;
        assert_eq!(snapshot.tasks["data"].completed, 4);
        assert_eq!(snapshot.tasks["data"].failed, 2);
        assert_eq!(snapshot.tasks["research"].failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tasks_run_concurrently() {
        let tasks = ScriptedTasks::new();
        for i in 1..=5 {
            tasks.on(1, &format!("d{}", i), Behavior::Complete(Duration::from_secs(2)));
        }
        let (executor, _) = executor(tasks);

        let start = Instant::now();
        let outcome = executor
            .execute_round(&data_tasks(5), &[], &context(1), Duration::from_secs(30), None)
            .await;

        assert_eq!(outcome.len(), 5);
        assert!(start.elapsed() < Duration::from_secs(3));
        assert!(outcome.results().all(|r| r.status == TaskStatus::Completed));
    }

    #[tokio::test]
    async fn test_empty_round() {
        let (executor, tracker) = executor(ScriptedTasks::new());
        let outcome = executor
            .execute_round(&[], &[], &context(1), Duration::from_secs(1), None)
            .await;
        assert!(outcome.is_empty());
        assert!(outcome.questions.is_empty());
        assert_eq!(tracker.snapshot().await.rounds, 1);
    }
}

#[cfg(test)]
mod deadline_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_hanging_task_fails_at_deadline_and_is_persisted() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        let tasks = ScriptedTasks::new().on(2, "d3", Behavior::Hang);
        let (executor, tracker) = executor(tasks);
        let sink = StoreSink::new(Arc::clone(&store), "session-1");

        let start = Instant::now();
        let outcome = executor
            .execute_round(
                &data_tasks(3),
                &[],
                &context(2),
                Duration::from_secs(10),
                Some(&sink),
            )
            .await;

        assert!(start.elapsed() >= Duration::from_secs(10));
        assert!(start.elapsed() < Duration::from_secs(11));
        assert_eq!(outcome.timed_out, 1);
        let d3 = &outcome.data_results[2];
        assert_eq!(d3.status, TaskStatus::Failed);
        assert!(d3.error.as_deref().unwrap().contains("timeout"));

        // Each result reached the store as it settled.
        let stored = SessionRecords::new(store.as_ref(), "session-1")
            .load_results(2)
            .await
            .unwrap();
        assert_eq!(stored.len(), 3);
        assert!(stored
            .iter()
            .any(|r| r.task_id == "d3" && r.status == TaskStatus::Failed));

        assert_eq!(tracker.snapshot().await.tasks["data"].timed_out, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_task_inside_deadline_completes() {
        let tasks = ScriptedTasks::new().on(1, "d1", Behavior::Complete(Duration::from_secs(9)));
        let (executor, _) = executor(tasks);

        let outcome = executor
            .execute_round(&data_tasks(1), &[], &context(1), Duration::from_secs(10), None)
            .await;

        assert_eq!(outcome.timed_out, 0);
        assert_eq!(outcome.data_results[0].status, TaskStatus::Completed);
    }
}
