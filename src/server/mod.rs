//! Server module for MCP protocol handling.
//!
//! This module provides:
//! - MCP server implementation over stdio
//! - Tool call handlers mapped onto pipeline operations
//! - Shared application state

mod handlers;
mod mcp;

pub use handlers::*;
pub use mcp::*;

use std::sync::Arc;

use crate::connectors::MetricsInterceptor;
use crate::pipeline::Pipeline;
use crate::resilience::ResilienceExecutor;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The session state machine.
    pub pipeline: Arc<Pipeline>,
    /// Retry and circuit breakers for every outbound dependency.
    pub resilience: Arc<ResilienceExecutor>,
    /// Per-host counters of the data connector, when it is instrumented.
    pub connector_metrics: Option<Arc<MetricsInterceptor>>,
}

impl AppState {
    /// Create new application state
    pub fn new(pipeline: Arc<Pipeline>, resilience: Arc<ResilienceExecutor>) -> Self {
        Self {
            pipeline,
            resilience,
            connector_metrics: None,
        }
    }

    /// Expose the connector's per-host metrics through `research_metrics`.
    pub fn with_connector_metrics(mut self, metrics: Arc<MetricsInterceptor>) -> Self {
        self.connector_metrics = Some(metrics);
        self
    }
}

/// Shared application state handle
pub type SharedState = Arc<AppState>;

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::time::Instant;

    use super::{AppState, SharedState};
    use crate::agents::{
        compile_aggregation, AggregationCollaborator, BriefCollaborator, BriefTurn,
        Collaborators, ContextCollaborator, GapPlanner, MarkdownReporter, TaskAgents,
        TaskCollaborator, TaskContext,
    };
    use crate::config::{CircuitBreakerConfig, PipelineConfig, RetryConfig, RetryPolicy};
    use crate::coverage::CoverageDecision;
    use crate::error::AgentResult;
    use crate::model::{
        Aggregation, Brief, Conversation, ResearchContext, ScopeItem, ScopeKind, Session,
        TaskPayload, TaskResult,
    };
    use crate::pipeline::Pipeline;
    use crate::resilience::ResilienceExecutor;
    use crate::storage::InMemoryStateStore;
    use crate::tracker::ResourceTracker;

    struct Context;

    #[async_trait]
    impl ContextCollaborator for Context {
        async fn gather(&self, session: &Session) -> AgentResult<ResearchContext> {
            Ok(ResearchContext::new(format!("Background on {}", session.query)))
        }
    }

    /// Drafts the brief as soon as the user says anything.
    struct ImmediateBrief;

    #[async_trait]
    impl BriefCollaborator for ImmediateBrief {
        async fn respond(
            &self,
            _session: &Session,
            _context: Option<&ResearchContext>,
            _conversation: &Conversation,
        ) -> AgentResult<BriefTurn> {
            Ok(BriefTurn::Draft(Brief::new(
                "Assess the EV market",
                vec![
                    ScopeItem::new("s1", "Market size", ScopeKind::Data),
                    ScopeItem::new("s2", "Adoption barriers", ScopeKind::Research),
                ],
            )))
        }
    }

    struct Completing;

    #[async_trait]
    impl TaskCollaborator for Completing {
        async fn execute(&self, context: &TaskContext, _deadline: Instant) -> AgentResult<TaskResult> {
            Ok(TaskResult::completed(&context.task, context.round, TaskPayload::Empty))
        }
    }

    struct Compiled;

    #[async_trait]
    impl AggregationCollaborator for Compiled {
        async fn aggregate(
            &self,
            brief: &Brief,
            results: &[TaskResult],
            coverage: Option<&CoverageDecision>,
            rounds: u32,
        ) -> AgentResult<Aggregation> {
            Ok(compile_aggregation(brief, results, coverage, rounds))
        }
    }

    /// State backed by an in-memory store and deterministic collaborators.
    pub fn state() -> SharedState {
        let tracker = Arc::new(ResourceTracker::new());
        let resilience = Arc::new(ResilienceExecutor::new(
            RetryConfig {
                reasoning: RetryPolicy::no_retry(),
                data_source: RetryPolicy::no_retry(),
            },
            CircuitBreakerConfig::default(),
            Arc::clone(&tracker),
        ));
        let agent: Arc<dyn TaskCollaborator> = Arc::new(Completing);
        let collaborators = Collaborators {
            context: Arc::new(Context),
            brief: Arc::new(ImmediateBrief),
            planner: Arc::new(GapPlanner),
            agents: TaskAgents::new(Arc::clone(&agent), agent),
            aggregator: Arc::new(Compiled),
            reporter: Arc::new(MarkdownReporter),
        };
        let pipeline = Pipeline::new(
            Arc::new(InMemoryStateStore::new()),
            collaborators,
            PipelineConfig::default(),
            tracker,
        );
        Arc::new(AppState::new(Arc::new(pipeline), resilience))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CircuitBreakerConfig, RetryConfig};

    #[test]
    fn test_shared_state_clone_shares_pipeline() {
        let shared = testing::state();
        let state2 = (*shared).clone();
        assert!(Arc::ptr_eq(&shared.pipeline, &state2.pipeline));
        assert!(state2.connector_metrics.is_none());
    }

    #[test]
    fn test_with_connector_metrics() {
        let shared = testing::state();
        let metrics = Arc::new(MetricsInterceptor::new());
        let state = AppState::new(
            Arc::clone(&shared.pipeline),
            Arc::new(ResilienceExecutor::new(
                RetryConfig::default(),
                CircuitBreakerConfig::default(),
                Arc::clone(shared.pipeline.tracker()),
            )),
        )
        .with_connector_metrics(Arc::clone(&metrics));

        assert!(state.connector_metrics.is_some());
        assert_eq!(Arc::strong_count(&metrics), 2);
    }
}
