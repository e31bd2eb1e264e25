//! Data and research task agents.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::core::to_prompt_json;
use super::{AgentCore, TaskCollaborator, TaskContext};
use crate::connectors::{endpoint_host, DataConnector};
use crate::error::{AgentError, AgentResult, ConnectorError, ResilienceError};
use crate::model::{
    DataSource, Finding, Question, SourceRef, Task, TaskKind, TaskPayload, TaskResult, TaskStatus,
};
use crate::oracle::Message;
use crate::prompts::{DATA_AGENT_PROMPT, RESEARCH_AGENT_PROMPT};
use crate::resilience::DependencyClass;

/// Confidence given to output the agent could not structure.
const DEGRADED_CONFIDENCE: f64 = 0.3;

#[derive(Debug, Deserialize)]
struct AgentQuestion {
    text: String,
    #[serde(rename = "type", default)]
    kind: Option<TaskKind>,
    #[serde(default)]
    scope_item_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AgentOutput {
    #[serde(default)]
    status: Option<TaskStatus>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    tables: Vec<serde_json::Value>,
    #[serde(default)]
    metrics: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    findings: Vec<Finding>,
    #[serde(default)]
    sources: Vec<SourceRef>,
    #[serde(default)]
    questions: Vec<AgentQuestion>,
    #[serde(default)]
    gaps: Vec<String>,
}

impl AgentOutput {
    fn into_result(self, task: &Task, round: u32) -> TaskResult {
        let payload = match task.kind {
            TaskKind::Data => TaskPayload::Data {
                tables: self.tables,
                metrics: self.metrics,
            },
            TaskKind::Research => TaskPayload::Research {
                findings: self.findings,
                sources: self.sources,
            },
        };

        let mut result = match self.status.unwrap_or(TaskStatus::Completed) {
            TaskStatus::Completed => TaskResult::completed(task, round, payload)
                .with_confidence(self.confidence.unwrap_or(1.0)),
            TaskStatus::Partial => TaskResult::completed(task, round, payload)
                .with_confidence(self.confidence.unwrap_or(1.0))
                .partial(),
            TaskStatus::Failed => {
                let reason = if self.gaps.is_empty() {
                    "agent reported failure".to_string()
                } else {
                    self.gaps.join("; ")
                };
                TaskResult::failed(task, round, reason)
            }
        };

        result.questions = self
            .questions
            .into_iter()
            .map(|q| Question {
                text: q.text,
                kind: q.kind.unwrap_or(task.kind),
                scope_item_id: q.scope_item_id,
            })
            .collect();
        result.gaps = self.gaps;
        result
    }
}

fn degraded(task: &Task, round: u32, completion: &str) -> TaskResult {
    let payload = match task.kind {
        TaskKind::Data => TaskPayload::Data {
            tables: Vec::new(),
            metrics: BTreeMap::new(),
        },
        TaskKind::Research => TaskPayload::Research {
            findings: vec![Finding {
                claim: completion.trim().to_string(),
                evidence: None,
            }],
            sources: Vec::new(),
        },
    };
    TaskResult::completed(task, round, payload)
        .partial()
        .with_confidence(DEGRADED_CONFIDENCE)
        .with_gap("unstructured agent output")
}

fn task_prompt(context: &TaskContext) -> String {
    let task = &context.task;
    let brief = &context.brief;
    let mut prompt = format!(
        "Research goal: {}\n\nTask {} ({}): {}",
        brief.goal, task.id, task.kind, task.description
    );

    if let Some(item) = brief.scope_item(&task.scope_item_id) {
        prompt.push_str(&format!("\nScope item {}: {}", item.id, item.topic));
        if !item.aspects.is_empty() {
            prompt.push_str(&format!(" (aspects: {})", item.aspects.join(", ")));
        }
    }
    if !brief.constraints.is_empty() {
        prompt.push_str(&format!("\nConstraints: {}", brief.constraints.join("; ")));
    }

    let prior: Vec<String> = context
        .prior_results
        .iter()
        .filter(|r| r.scope_item_id == task.scope_item_id && r.is_usable())
        .map(|r| {
            let gaps = if r.gaps.is_empty() {
                String::new()
            } else {
                format!(", gaps: {}", r.gaps.join("; "))
            };
            format!("- round {} {} {}{}", r.round, r.task_id, r.status, gaps)
        })
        .collect();
    if !prior.is_empty() {
        prompt.push_str(&format!("\n\nEarlier work on this scope item:\n{}", prior.join("\n")));
    }

    prompt
}

/// Ask the oracle to complete a task and turn the reply into a result.
async fn complete_task(
    core: &AgentCore,
    pipe_name: &str,
    system_prompt: &str,
    context: &TaskContext,
    extra: Option<String>,
    deadline: Instant,
) -> AgentResult<TaskResult> {
    let mut prompt = task_prompt(context);
    if let Some(extra) = extra {
        prompt.push_str("\n\n");
        prompt.push_str(&extra);
    }

    let messages = vec![Message::system(system_prompt), Message::user(prompt)];
    let response = core.complete(pipe_name, messages, Some(deadline)).await?;

    match core.parse::<AgentOutput>(pipe_name, &response) {
        Ok(output) => Ok(output.into_result(&context.task, context.round)),
        Err(e) if core.strict_mode() => Err(e),
        Err(_) => {
            warn!(
                session_id = %context.session_id,
                task_id = %context.task.id,
                "Degrading unstructured task output to partial"
            );
            Ok(degraded(&context.task, context.round, &response.completion))
        }
    }
}

/// Executes data tasks, fetching from the task's data source first when one
/// is given.
pub struct OracleDataAgent {
    core: AgentCore,
    connector: Arc<dyn DataConnector>,
    pipe_name: String,
}

impl OracleDataAgent {
    pub fn new(
        core: AgentCore,
        connector: Arc<dyn DataConnector>,
        pipe_name: impl Into<String>,
    ) -> Self {
        Self {
            core,
            connector,
            pipe_name: pipe_name.into(),
        }
    }

    async fn fetch(&self, source: &DataSource, deadline: Instant) -> AgentResult<serde_json::Value> {
        let host = endpoint_host(&source.endpoint).ok_or_else(|| {
            AgentError::Connector(ResilienceError::Rejected(ConnectorError::InvalidEndpoint {
                endpoint: source.endpoint.clone(),
            }))
        })?;
        let dependency = format!("data:{}", host);

        let call = self
            .core
            .resilience()
            .call(&dependency, DependencyClass::DataSource, || {
                self.connector
                    .call(source.method, &source.endpoint, &source.params)
            });
        let data = tokio::time::timeout_at(deadline, call)
            .await
            .map_err(|_| AgentError::DeadlineExceeded)??;
        Ok(data)
    }
}

#[async_trait]
impl TaskCollaborator for OracleDataAgent {
    async fn execute(&self, context: &TaskContext, deadline: Instant) -> AgentResult<TaskResult> {
        let start = Instant::now();
        let mut fetch_gap = None;

        let extra = match &context.task.source {
            Some(source) => match self.fetch(source, deadline).await {
                Ok(data) => Some(format!(
                    "Data fetched from {}:\n{}",
                    source.endpoint,
                    to_prompt_json(&data)
                )),
                Err(e @ AgentError::DeadlineExceeded) => return Err(e),
                Err(e) if self.core.strict_mode() => return Err(e),
                Err(e) => {
                    warn!(
                        task_id = %context.task.id,
                        endpoint = %source.endpoint,
                        error = %e,
                        "Data source unavailable, continuing without it"
                    );
                    fetch_gap = Some(format!("data source unavailable: {}", source.endpoint));
                    None
                }
            },
            None => None,
        };

        let mut result = complete_task(
            &self.core,
            &self.pipe_name,
            DATA_AGENT_PROMPT,
            context,
            extra,
            deadline,
        )
        .await?;

        if let Some(gap) = fetch_gap {
            if result.status == TaskStatus::Completed {
                result = result.partial();
            }
            result = result.with_gap(gap);
        }

        debug!(task_id = %context.task.id, status = %result.status, "Data task finished");
        Ok(result.with_duration_ms(start.elapsed().as_millis() as u64))
    }
}

/// Executes research tasks.
pub struct OracleResearchAgent {
    core: AgentCore,
    pipe_name: String,
}

impl OracleResearchAgent {
    pub fn new(core: AgentCore, pipe_name: impl Into<String>) -> Self {
        Self {
            core,
            pipe_name: pipe_name.into(),
        }
    }
}

#[async_trait]
impl TaskCollaborator for OracleResearchAgent {
    async fn execute(&self, context: &TaskContext, deadline: Instant) -> AgentResult<TaskResult> {
        let start = Instant::now();
        let result = complete_task(
            &self.core,
            &self.pipe_name,
            RESEARCH_AGENT_PROMPT,
            context,
            None,
            deadline,
        )
        .await?;

        debug!(task_id = %context.task.id, status = %result.status, "Research task finished");
        Ok(result.with_duration_ms(start.elapsed().as_millis() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::{core, ScriptedOracle};
    use crate::connectors::MockDataConnector;
    use crate::model::{Brief, HttpMethod, ScopeItem, ScopeKind};
    use serde_json::json;
    use std::time::Duration;

    fn context(task: Task) -> TaskContext {
        TaskContext {
            session_id: "sess".to_string(),
            round: 1,
            task,
            brief: Arc::new(
                Brief::new(
                    "Assess the EV market",
                    vec![ScopeItem::new("s1", "Market size", ScopeKind::Both).with_aspect("2024")],
                )
                .with_constraint("EU only"),
            ),
            prior_results: Arc::new(Vec::new()),
        }
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    #[tokio::test]
    async fn test_data_agent_fetches_source_then_asks_oracle() {
        let mut connector = MockDataConnector::new();
        connector
            .expect_call()
            .withf(|method, endpoint, _| {
                *method == HttpMethod::Get && endpoint == "https://api.example/sales"
            })
            .times(1)
            .returning(|_, _, _| Ok(json!({"units": 1200})));

        let oracle = ScriptedOracle::new([r#"{
            "status": "completed",
            "confidence": 0.9,
            "metrics": {"units": 1200},
            "questions": [{"text": "Monthly split?", "scope_item_id": "s1"}]
        }"#]);
        let core = core(oracle.clone(), false);
        let tracker = Arc::clone(core.resilience().tracker());
        let agent = OracleDataAgent::new(core, Arc::new(connector), "data");

        let task = Task::data("d1", "s1", "Sales volume")
            .with_source("https://api.example/sales", json!({"year": 2024}));
        let result = agent.execute(&context(task), deadline()).await.unwrap();

        assert_eq!(result.status, TaskStatus::Completed);
        assert_eq!(result.confidence, 0.9);
        assert_eq!(result.questions[0].kind, TaskKind::Data);
        assert!(matches!(result.payload, TaskPayload::Data { ref metrics, .. } if metrics["units"] == 1200));

        let prompt = &oracle.requests()[0].messages[1].content;
        assert!(prompt.contains("\"units\": 1200"));
        assert!(prompt.contains("EU only"));
        assert_eq!(tracker.dependency("data:api.example").await.successes, 1);
    }

    #[tokio::test]
    async fn test_data_agent_continues_without_failed_source() {
        let mut connector = MockDataConnector::new();
        connector.expect_call().returning(|_, _, _| {
            Err(ConnectorError::Api {
                status: 404,
                message: "gone".to_string(),
            })
        });
        let oracle = ScriptedOracle::new([r#"{"status": "completed", "metrics": {}}"#]);
        let agent = OracleDataAgent::new(core(oracle, false), Arc::new(connector), "data");

        let task = Task::data("d1", "s1", "Sales").with_source("https://api.example/x", json!({}));
        let result = agent.execute(&context(task), deadline()).await.unwrap();
        assert_eq!(result.status, TaskStatus::Partial);
        assert_eq!(result.gaps, vec!["data source unavailable: https://api.example/x"]);
    }

    #[tokio::test]
    async fn test_research_agent_degrades_prose() {
        let agent = OracleResearchAgent::new(
            core(ScriptedOracle::new(["Chargers are scarce in rural areas."]), false),
            "research",
        );
        let result = agent
            .execute(&context(Task::research("r1", "s1", "Charging")), deadline())
            .await
            .unwrap();

        assert_eq!(result.status, TaskStatus::Partial);
        assert_eq!(result.confidence, DEGRADED_CONFIDENCE);
        assert_eq!(result.gaps, vec!["unstructured agent output"]);
    }

    #[tokio::test]
    async fn test_research_agent_strict_rejects_prose() {
        let agent = OracleResearchAgent::new(
            core(ScriptedOracle::new(["no json here"]), true),
            "research",
        );
        let err = agent
            .execute(&context(Task::research("r1", "s1", "Charging")), deadline())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidOutput { .. }));
    }

    #[tokio::test]
    async fn test_reported_failure_uses_gaps_as_reason() {
        let agent = OracleResearchAgent::new(
            core(
                ScriptedOracle::new([r#"{"status": "failed", "gaps": ["no sources found"]}"#]),
                false,
            ),
            "research",
        );
        let result = agent
            .execute(&context(Task::research("r1", "s1", "Charging")), deadline())
            .await
            .unwrap();
        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("no sources found"));
    }

    #[test]
    fn test_prompt_includes_prior_work_for_same_scope() {
        let mut ctx = context(Task::research("r1", "s1", "Charging"));
        let earlier = Task::data("d1", "s1", "x");
        ctx.prior_results = Arc::new(vec![
            TaskResult::completed(&earlier, 1, TaskPayload::Empty).with_gap("2019 data"),
        ]);
        let prompt = task_prompt(&ctx);
        assert!(prompt.contains("round 1 d1 completed, gaps: 2019 data"));
        assert!(prompt.contains("aspects: 2024"));
    }
}
