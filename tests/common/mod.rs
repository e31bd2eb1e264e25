//! Scripted collaborators shared by the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use research_pipeline::agents::{
    compile_aggregation, AggregationCollaborator, BriefCollaborator, BriefTurn, Collaborators,
    ContextCollaborator, GapPlanner, MarkdownReporter, TaskAgents, TaskCollaborator, TaskContext,
};
use research_pipeline::config::PipelineConfig;
use research_pipeline::coverage::CoverageDecision;
use research_pipeline::error::{
    AgentError, AgentResult, ConnectorError, OracleError, ResilienceError,
};
use research_pipeline::model::{
    Aggregation, Brief, Conversation, Finding, ResearchContext, ScopeItem, ScopeKind, Session,
    SourceRef, TaskKind, TaskPayload, TaskResult,
};

/// Two scope items: `s1` needs data and research, `s2` needs data only.
pub fn ev_brief() -> Brief {
    Brief::new(
        "Assess the European EV market",
        vec![
            ScopeItem::new("s1", "Market size", ScopeKind::Both),
            ScopeItem::new("s2", "Charging infrastructure", ScopeKind::Data),
        ],
    )
}

pub fn pipeline_config() -> PipelineConfig {
    PipelineConfig {
        max_rounds: 3,
        round_timeout_secs: 30,
        coverage_threshold: 0.8,
        max_brief_turns: 5,
        strict_mode: false,
    }
}

pub struct StaticContext;

#[async_trait]
impl ContextCollaborator for StaticContext {
    async fn gather(&self, session: &Session) -> AgentResult<ResearchContext> {
        Ok(ResearchContext::new(format!("Background on {}", session.query))
            .with_suggested_topic("Charging"))
    }
}

/// Drafts `brief` on the first user message.
pub struct DraftingBrief(pub Brief);

#[async_trait]
impl BriefCollaborator for DraftingBrief {
    async fn respond(
        &self,
        _session: &Session,
        _context: Option<&ResearchContext>,
        _conversation: &Conversation,
    ) -> AgentResult<BriefTurn> {
        Ok(BriefTurn::Draft(self.0.clone()))
    }
}

/// What a scripted task does in a given round.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Complete after an optional delay.
    Complete(Duration),
    /// Fail like a network error that exhausted its retries.
    NetworkFailure,
    /// Never finish before the round deadline.
    Hang,
    Panic,
}

/// Task agent driven by a per-(round, task id) script. Unscripted tasks
/// complete immediately.
#[derive(Default)]
pub struct ScriptedTasks {
    script: Mutex<Vec<(u32, String, Behavior)>>,
    executed: Mutex<Vec<(u32, String)>>,
}

impl ScriptedTasks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(self: &Arc<Self>, round: u32, task_id: &str, behavior: Behavior) -> Arc<Self> {
        self.script
            .lock()
            .unwrap()
            .push((round, task_id.to_string(), behavior));
        Arc::clone(self)
    }

    /// (round, task id) of every execution, in start order.
    pub fn executed(&self) -> Vec<(u32, String)> {
        self.executed.lock().unwrap().clone()
    }

    fn behavior(&self, round: u32, task_id: &str) -> Behavior {
        self.script
            .lock()
            .unwrap()
            .iter()
            .find(|(r, id, _)| *r == round && id == task_id)
            .map(|(_, _, b)| b.clone())
            .unwrap_or(Behavior::Complete(Duration::ZERO))
    }
}

#[async_trait]
impl TaskCollaborator for ScriptedTasks {
    async fn execute(&self, context: &TaskContext, _deadline: Instant) -> AgentResult<TaskResult> {
        let task = &context.task;
        self.executed
            .lock()
            .unwrap()
            .push((context.round, task.id.clone()));

        match self.behavior(context.round, &task.id) {
            Behavior::Complete(delay) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let payload = match task.kind {
                    TaskKind::Data => TaskPayload::Data {
                        tables: Vec::new(),
                        metrics: [("value".to_string(), serde_json::json!(42))]
                            .into_iter()
                            .collect(),
                    },
                    TaskKind::Research => TaskPayload::Research {
                        findings: vec![Finding {
                            claim: format!("Finding for {}", task.scope_item_id),
                            evidence: None,
                        }],
                        sources: vec![SourceRef {
                            title: "IEA Global EV Outlook".to_string(),
                            url: Some("https://iea.org/ev".to_string()),
                        }],
                    },
                };
                Ok(TaskResult::completed(task, context.round, payload))
            }
            Behavior::NetworkFailure => Err(AgentError::Connector(
                ResilienceError::RetryExhausted {
                    dependency: "data:stats.example".to_string(),
                    attempts: 3,
                    source: ConnectorError::Timeout { timeout_ms: 100 },
                },
            )),
            Behavior::Hang => std::future::pending().await,
            Behavior::Panic => panic!("agent bug"),
        }
    }
}

pub struct CompiledAggregator;

#[async_trait]
impl AggregationCollaborator for CompiledAggregator {
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

/// Always fails the way an unreachable reasoning service does.
pub struct UnavailableAggregator;

#[async_trait]
impl AggregationCollaborator for UnavailableAggregator {
    async fn aggregate(
        &self,
        _brief: &Brief,
        _results: &[TaskResult],
        _coverage: Option<&CoverageDecision>,
        _rounds: u32,
    ) -> AgentResult<Aggregation> {
        Err(AgentError::Oracle(ResilienceError::RetryExhausted {
            dependency: "oracle".to_string(),
            attempts: 3,
            source: OracleError::Api {
                status: 503,
                message: "unavailable".to_string(),
            },
        }))
    }
}

/// Collaborators with the deterministic planner and reporter, `tasks` for
/// both task kinds.
pub fn collaborators(tasks: Arc<ScriptedTasks>) -> Collaborators {
    let agent: Arc<dyn TaskCollaborator> = tasks;
    Collaborators {
        context: Arc::new(StaticContext),
        brief: Arc::new(DraftingBrief(ev_brief())),
        planner: Arc::new(GapPlanner),
        agents: TaskAgents::new(Arc::clone(&agent), agent),
        aggregator: Arc::new(CompiledAggregator),
        reporter: Arc::new(MarkdownReporter),
    }
}
