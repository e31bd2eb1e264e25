//! Round planning.
//!
//! [`OraclePlanner`] asks the reasoning service for a plan and assigns task
//! ids itself, so ids are always `d1..dN` / `r1..rN` regardless of what the
//! model returns. [`GapPlanner`] is the deterministic planner it falls back
//! on when the service returns something unusable.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::core::to_prompt_json;
use super::{AgentCore, PlanningCollaborator, PlanningRequest};
use crate::error::{AgentError, AgentResult};
use crate::model::{DataSource, Plan, ScopeItem, Task, TaskKind, TaskResult};
use crate::oracle::Message;
use crate::prompts::PLANNER_PROMPT;

#[derive(Debug, Deserialize)]
struct PlannedTask {
    scope_item_id: String,
    description: String,
    #[serde(default)]
    source: Option<DataSource>,
}

#[derive(Debug, Deserialize)]
struct PlannerOutput {
    #[serde(default)]
    data_tasks: Vec<PlannedTask>,
    #[serde(default)]
    research_tasks: Vec<PlannedTask>,
    #[serde(default)]
    estimated_coverage: f64,
    #[serde(default)]
    rationale: Option<String>,
}

impl PlannerOutput {
    fn into_plan(self, round: u32) -> Plan {
        let data = self
            .data_tasks
            .into_iter()
            .enumerate()
            .map(|(i, t)| Task {
                source: t.source,
                ..Task::data(TaskKind::Data.task_id(i + 1), t.scope_item_id, t.description)
            })
            .collect();
        let research = self
            .research_tasks
            .into_iter()
            .enumerate()
            .map(|(i, t)| {
                Task::research(TaskKind::Research.task_id(i + 1), t.scope_item_id, t.description)
            })
            .collect();

        let plan = Plan::new(round, data, research).with_estimated_coverage(self.estimated_coverage);
        match self.rationale {
            Some(rationale) => plan.with_rationale(rationale),
            None => plan,
        }
    }
}

/// Plans rounds through the reasoning service.
pub struct OraclePlanner {
    core: AgentCore,
    pipe_name: String,
    fallback: GapPlanner,
}

impl OraclePlanner {
    pub fn new(core: AgentCore, pipe_name: impl Into<String>) -> Self {
        Self {
            core,
            pipe_name: pipe_name.into(),
            fallback: GapPlanner,
        }
    }

    fn build_messages(&self, request: &PlanningRequest<'_>) -> Vec<Message> {
        let mut prompt = format!(
            "Round: {}\n\nBrief:\n{}",
            request.round,
            to_prompt_json(request.brief)
        );

        if let Some(coverage) = request.coverage {
            prompt.push_str(&format!(
                "\n\nCoverage after round {}:\n{}",
                coverage.round,
                to_prompt_json(coverage)
            ));
        }
        if !request.questions.is_empty() {
            prompt.push_str(&format!(
                "\n\nFollow-up questions:\n{}",
                to_prompt_json(&request.questions)
            ));
        }
        if !request.results.is_empty() {
            prompt.push_str("\n\nEarlier results:\n");
            prompt.push_str(&summarize_results(request.results));
        }

        vec![Message::system(PLANNER_PROMPT), Message::user(prompt)]
    }
}

fn summarize_results(results: &[TaskResult]) -> String {
    results
        .iter()
        .map(|r| {
            format!(
                "- round {} {} ({} on {}): {} at confidence {:.2}",
                r.round, r.task_id, r.kind, r.scope_item_id, r.status, r.confidence
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl PlanningCollaborator for OraclePlanner {
    async fn plan(&self, request: PlanningRequest<'_>) -> AgentResult<Plan> {
        let messages = self.build_messages(&request);
        let response = self.core.complete(&self.pipe_name, messages, None).await?;

        let planned = self
            .core
            .parse::<PlannerOutput>(&self.pipe_name, &response)
            .and_then(|output| {
                let plan = output.into_plan(request.round);
                plan.validate(request.brief)
                    .map_err(|e| AgentError::InvalidOutput {
                        message: e.to_string(),
                    })?;
                Ok(plan)
            });

        match planned {
            Ok(plan) => {
                info!(
                    session_id = request.session_id,
                    round = request.round,
                    data_tasks = plan.data_tasks.len(),
                    research_tasks = plan.research_tasks.len(),
                    "Round planned"
                );
                Ok(plan)
            }
            Err(e) if self.core.strict_mode() => Err(e),
            Err(e) => {
                warn!(
                    session_id = request.session_id,
                    round = request.round,
                    error = %e,
                    "Falling back to gap planning"
                );
                self.fallback.plan(request).await
            }
        }
    }
}

/// Deterministic planner driven by the brief and the coverage gaps.
///
/// Round 1 gets one task per facet each scope item needs. Later rounds get
/// one task per uncovered facet, plus one per follow-up question on a
/// scope item and kind not already targeted. Questions without a scope item
/// are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct GapPlanner;

impl GapPlanner {
    pub fn build(&self, request: &PlanningRequest<'_>) -> Plan {
        let mut targets: Vec<(TaskKind, String, String)> = Vec::new();

        match request.coverage {
            None => {
                for item in &request.brief.scope {
                    if item.kind.needs_data() {
                        targets.push((TaskKind::Data, item.id.clone(), describe(item, TaskKind::Data)));
                    }
                    if item.kind.needs_research() {
                        targets.push((
                            TaskKind::Research,
                            item.id.clone(),
                            describe(item, TaskKind::Research),
                        ));
                    }
                }
            }
            Some(coverage) => {
                for (scope_id, item_coverage) in coverage.incomplete_items() {
                    let Some(item) = request.brief.scope_item(scope_id) else {
                        continue;
                    };
                    for kind in &item_coverage.missing_facets {
                        let description = if item_coverage.missing.is_empty() {
                            describe(item, *kind)
                        } else {
                            format!(
                                "{} Close these gaps: {}",
                                describe(item, *kind),
                                item_coverage.missing.join("; ")
                            )
                        };
                        targets.push((*kind, item.id.clone(), description));
                    }
                }
            }
        }

        let mut targeted: HashSet<(TaskKind, String)> = targets
            .iter()
            .map(|(kind, scope, _)| (*kind, scope.clone()))
            .collect();
        for question in request.questions {
            let Some(scope_id) = question.scope_item_id.as_deref() else {
                debug!(question = %question.text, "Skipping question without scope item");
                continue;
            };
            if request.brief.scope_item(scope_id).is_none() {
                debug!(scope_id, "Skipping question for unknown scope item");
                continue;
            }
            if targeted.insert((question.kind, scope_id.to_string())) {
                targets.push((question.kind, scope_id.to_string(), question.text.clone()));
            }
        }

        let (mut data, mut research) = (Vec::new(), Vec::new());
        for (kind, scope_id, description) in targets {
            match kind {
                TaskKind::Data => {
                    let id = kind.task_id(data.len() + 1);
                    data.push(Task::data(id, scope_id, description));
                }
                TaskKind::Research => {
                    let id = kind.task_id(research.len() + 1);
                    research.push(Task::research(id, scope_id, description));
                }
            }
        }

        let estimated = request.coverage.map_or(1.0, |c| c.threshold);
        Plan::new(request.round, data, research)
            .with_estimated_coverage(estimated)
            .with_rationale(match request.coverage {
                None => "One task per required facet of every scope item".to_string(),
                Some(c) => format!("Targets gaps left after round {}", c.round),
            })
    }
}

fn describe(item: &ScopeItem, kind: TaskKind) -> String {
    let verb = match kind {
        TaskKind::Data => "Collect quantitative data on",
        TaskKind::Research => "Research",
    };
    if item.aspects.is_empty() {
        format!("{} {}.", verb, item.topic)
    } else {
        format!("{} {} covering {}.", verb, item.topic, item.aspects.join(", "))
    }
}

#[async_trait]
impl PlanningCollaborator for GapPlanner {
    async fn plan(&self, request: PlanningRequest<'_>) -> AgentResult<Plan> {
        Ok(self.build(&request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::{core, ScriptedOracle};
    use crate::coverage::CoverageEvaluator;
    use crate::model::{Brief, Question, ScopeKind, TaskPayload};

    fn brief() -> Brief {
        Brief::new(
            "Assess the EV market",
            vec![
                ScopeItem::new("s1", "Market size", ScopeKind::Data),
                ScopeItem::new("s2", "Charging", ScopeKind::Both).with_aspect("coverage"),
            ],
        )
    }

    fn request<'a>(brief: &'a Brief, round: u32) -> PlanningRequest<'a> {
        PlanningRequest {
            session_id: "sess",
            brief,
            round,
            coverage: None,
            questions: &[],
            results: &[],
        }
    }

    #[test]
    fn test_gap_planner_first_round() {
        let brief = brief();
        let plan = GapPlanner.build(&request(&brief, 1));

        let ids: Vec<_> = plan.tasks().map(|t| (t.id.as_str(), t.scope_item_id.as_str())).collect();
        assert_eq!(ids, vec![("d1", "s1"), ("d2", "s2"), ("r1", "s2")]);
        assert!(plan.research_tasks[0].description.contains("coverage"));
        plan.validate(&brief).unwrap();
    }

    #[test]
    fn test_gap_planner_targets_missing_facets_and_questions() {
        let brief = brief();
        let round1 = GapPlanner.build(&request(&brief, 1));
        let results = vec![
            TaskResult::completed(&round1.data_tasks[0], 1, TaskPayload::Empty),
            TaskResult::completed(&round1.data_tasks[1], 1, TaskPayload::Empty),
            TaskResult::failed(&round1.research_tasks[0], 1, "timeout"),
        ];
        let coverage = CoverageEvaluator::new(0.8, 5).evaluate(&brief, &results, 1);
        let questions = vec![
            Question::new("Growth since 2019?", TaskKind::Data).for_scope("s1"),
            Question::new("Duplicate of the gap", TaskKind::Research).for_scope("s2"),
            Question::new("Unscoped", TaskKind::Research),
            Question::new("Unknown scope", TaskKind::Data).for_scope("s9"),
        ];

        let plan = GapPlanner.build(&PlanningRequest {
            coverage: Some(&coverage),
            questions: &questions,
            results: &results,
            ..request(&brief, 2)
        });

        assert_eq!(plan.round, 2);
        assert_eq!(plan.research_tasks.len(), 1);
        assert_eq!(plan.research_tasks[0].scope_item_id, "s2");
        assert_eq!(plan.data_tasks.len(), 1);
        assert_eq!(plan.data_tasks[0].description, "Growth since 2019?");
        plan.validate(&brief).unwrap();
    }

    #[tokio::test]
    async fn test_oracle_planner_assigns_ids() {
        let oracle = ScriptedOracle::new([r#"{
            "data_tasks": [
                {"scope_item_id": "s1", "description": "sales",
                 "source": {"endpoint": "https://api.example/sales", "params": {"year": 2024}}},
                {"scope_item_id": "s2", "description": "chargers"}
            ],
            "research_tasks": [{"scope_item_id": "s2", "description": "policy"}],
            "estimated_coverage": 0.9,
            "rationale": "cover everything"
        }"#]);
        let planner = OraclePlanner::new(core(oracle, false), "planner");
        let brief = brief();

        let plan = planner.plan(request(&brief, 1)).await.unwrap();
        assert_eq!(plan.data_tasks[0].id, "d1");
        assert_eq!(plan.data_tasks[1].id, "d2");
        assert_eq!(plan.research_tasks[0].id, "r1");
        assert_eq!(plan.estimated_coverage, 0.9);
        assert_eq!(
            plan.data_tasks[0].source.as_ref().unwrap().endpoint,
            "https://api.example/sales"
        );
    }

    #[tokio::test]
    async fn test_oracle_planner_falls_back_on_unknown_scope() {
        let completion = r#"{"data_tasks": [{"scope_item_id": "s7", "description": "x"}]}"#;
        let brief = brief();

        let lenient = OraclePlanner::new(core(ScriptedOracle::new([completion]), false), "planner");
        let plan = lenient.plan(request(&brief, 1)).await.unwrap();
        assert_eq!(plan.task_count(), 3);

        let strict = OraclePlanner::new(core(ScriptedOracle::new([completion]), true), "planner");
        let err = strict.plan(request(&brief, 1)).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidOutput { .. }));
    }
}
