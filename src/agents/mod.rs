//! Collaborator contracts and their implementations.
//!
//! The pipeline delegates content production to collaborators: initial
//! context, brief building, planning, task execution, aggregation and report
//! rendering. Each is a trait so the pipeline can be driven by the
//! reasoning-service implementations in production and by scripted fakes in
//! tests.

mod aggregator;
mod brief;
mod context;
mod core;
mod planner;
mod report;
mod task;

pub use aggregator::{compile_aggregation, OracleAggregator};
pub use brief::OracleBriefAgent;
pub use context::OracleContextAgent;
pub use core::{AgentCore, ORACLE_DEPENDENCY};
pub use planner::{GapPlanner, OraclePlanner};
pub use report::MarkdownReporter;
pub use task::{OracleDataAgent, OracleResearchAgent};

use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::config::PipeConfig;
use crate::connectors::DataConnector;
use crate::coverage::CoverageDecision;
use crate::error::AgentResult;
use crate::model::{
    Aggregation, Brief, Conversation, Plan, Question, Report, ResearchContext, Session, Task,
    TaskKind, TaskResult,
};
use crate::oracle::Oracle;
use crate::resilience::ResilienceExecutor;

/// Everything a task agent sees.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub session_id: String,
    pub round: u32,
    pub task: Task,
    pub brief: Arc<Brief>,
    /// Results of earlier rounds.
    pub prior_results: Arc<Vec<TaskResult>>,
}

/// Outcome of one brief-building turn.
#[derive(Debug, Clone, PartialEq)]
pub enum BriefTurn {
    /// Another clarifying question for the user.
    Question(String),
    /// A complete draft awaiting approval.
    Draft(Brief),
}

/// Input to the planner for one round.
#[derive(Debug, Clone, Copy)]
pub struct PlanningRequest<'a> {
    pub session_id: &'a str,
    pub brief: &'a Brief,
    /// Round being planned.
    pub round: u32,
    /// Decision after the previous round; `None` for round 1.
    pub coverage: Option<&'a CoverageDecision>,
    /// Follow-up questions collected in the previous round.
    pub questions: &'a [Question],
    /// Results of all earlier rounds.
    pub results: &'a [TaskResult],
}

/// Gathers background on the query before the brief conversation.
#[async_trait]
pub trait ContextCollaborator: Send + Sync {
    async fn gather(&self, session: &Session) -> AgentResult<ResearchContext>;
}

/// Runs the brief-building conversation.
#[async_trait]
pub trait BriefCollaborator: Send + Sync {
    /// Respond to the conversation so far; the last turn is the user's.
    async fn respond(
        &self,
        session: &Session,
        context: Option<&ResearchContext>,
        conversation: &Conversation,
    ) -> AgentResult<BriefTurn>;
}

/// Produces the plan for a round.
#[async_trait]
pub trait PlanningCollaborator: Send + Sync {
    async fn plan(&self, request: PlanningRequest<'_>) -> AgentResult<Plan>;
}

/// Executes one task before `deadline`.
#[async_trait]
pub trait TaskCollaborator: Send + Sync {
    async fn execute(&self, context: &TaskContext, deadline: Instant) -> AgentResult<TaskResult>;
}

/// Synthesizes all rounds into the final aggregation.
#[async_trait]
pub trait AggregationCollaborator: Send + Sync {
    async fn aggregate(
        &self,
        brief: &Brief,
        results: &[TaskResult],
        coverage: Option<&CoverageDecision>,
        rounds: u32,
    ) -> AgentResult<Aggregation>;
}

/// Renders the aggregation into a report.
#[async_trait]
pub trait ReportCollaborator: Send + Sync {
    async fn render(&self, brief: &Brief, aggregation: &Aggregation) -> AgentResult<Report>;
}

/// One task agent per task kind.
#[derive(Clone)]
pub struct TaskAgents {
    pub data: Arc<dyn TaskCollaborator>,
    pub research: Arc<dyn TaskCollaborator>,
}

impl TaskAgents {
    pub fn new(data: Arc<dyn TaskCollaborator>, research: Arc<dyn TaskCollaborator>) -> Self {
        Self { data, research }
    }

    /// The agent responsible for `kind`.
    pub fn for_kind(&self, kind: TaskKind) -> Arc<dyn TaskCollaborator> {
        match kind {
            TaskKind::Data => Arc::clone(&self.data),
            TaskKind::Research => Arc::clone(&self.research),
        }
    }
}

/// The full set of collaborators a pipeline drives.
#[derive(Clone)]
pub struct Collaborators {
    pub context: Arc<dyn ContextCollaborator>,
    pub brief: Arc<dyn BriefCollaborator>,
    pub planner: Arc<dyn PlanningCollaborator>,
    pub agents: TaskAgents,
    pub aggregator: Arc<dyn AggregationCollaborator>,
    pub reporter: Arc<dyn ReportCollaborator>,
}

impl Collaborators {
    /// Wire every collaborator to the reasoning service, one pipe each.
    pub fn from_oracle(
        oracle: Arc<dyn Oracle>,
        connector: Arc<dyn DataConnector>,
        resilience: Arc<ResilienceExecutor>,
        pipes: &PipeConfig,
        strict_mode: bool,
    ) -> Self {
        let core = AgentCore::new(oracle, resilience, strict_mode);
        Self {
            context: Arc::new(OracleContextAgent::new(core.clone(), &pipes.context)),
            brief: Arc::new(OracleBriefAgent::new(core.clone(), &pipes.brief)),
            planner: Arc::new(OraclePlanner::new(core.clone(), &pipes.planner)),
            agents: TaskAgents::new(
                Arc::new(OracleDataAgent::new(core.clone(), connector, &pipes.data)),
                Arc::new(OracleResearchAgent::new(core.clone(), &pipes.research)),
            ),
            aggregator: Arc::new(OracleAggregator::new(core, &pipes.aggregator)),
            reporter: Arc::new(MarkdownReporter),
        }
    }
}
