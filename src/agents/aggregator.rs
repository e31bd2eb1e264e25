use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};

use super::core::to_prompt_json;
use super::{AgentCore, AggregationCollaborator};
use crate::coverage::CoverageDecision;
use crate::error::AgentResult;
use crate::model::{Aggregation, Brief, Section, SourceRef, TaskPayload, TaskResult};
use crate::oracle::Message;
use crate::prompts::AGGREGATOR_PROMPT;

#[derive(Debug, Deserialize)]
struct AggregatorOutput {
    #[serde(default)]
    key_findings: Vec<String>,
    #[serde(default)]
    recommendations: Vec<String>,
    #[serde(default)]
    sections: Vec<Section>,
    #[serde(default)]
    bibliography: Vec<SourceRef>,
}

/// Synthesizes all rounds through the reasoning service.
pub struct OracleAggregator {
    core: AgentCore,
    pipe_name: String,
}

impl OracleAggregator {
    pub fn new(core: AgentCore, pipe_name: impl Into<String>) -> Self {
        Self {
            core,
            pipe_name: pipe_name.into(),
        }
    }
}

#[async_trait]
impl AggregationCollaborator for OracleAggregator {
    async fn aggregate(
        &self,
        brief: &Brief,
        results: &[TaskResult],
        coverage: Option<&CoverageDecision>,
        rounds: u32,
    ) -> AgentResult<Aggregation> {
        let usable: Vec<&TaskResult> = results.iter().filter(|r| r.is_usable()).collect();

        let mut prompt = format!(
            "Brief:\n{}\n\nResults from {} round(s):\n{}",
            to_prompt_json(brief),
            rounds,
            to_prompt_json(&usable)
        );
        if let Some(coverage) = coverage {
            prompt.push_str(&format!("\n\nFinal coverage:\n{}", to_prompt_json(coverage)));
        }

        let messages = vec![Message::system(AGGREGATOR_PROMPT), Message::user(prompt)];
        let response = self.core.complete(&self.pipe_name, messages, None).await?;

        let overall = coverage.map_or(0.0, |c| c.overall);
        let aggregation = match self.core.parse::<AggregatorOutput>(&self.pipe_name, &response) {
            Ok(output) => Aggregation {
                key_findings: output.key_findings,
                recommendations: output.recommendations,
                sections: output.sections,
                bibliography: merge_sources(output.bibliography, results),
                coverage: overall,
                rounds,
                created_at: Utc::now(),
            },
            Err(e) if self.core.strict_mode() => return Err(e),
            Err(_) => {
                warn!("Compiling aggregation from raw results");
                compile_aggregation(brief, results, coverage, rounds)
            }
        };

        info!(
            key_findings = aggregation.key_findings.len(),
            sources = aggregation.bibliography.len(),
            "Aggregation produced"
        );
        Ok(aggregation)
    }
}

/// Sources from `cited` followed by any result sources not already listed,
/// deduplicated by URL or, without one, by title.
fn merge_sources(cited: Vec<SourceRef>, results: &[TaskResult]) -> Vec<SourceRef> {
    let mut seen = HashSet::new();
    let from_results = results.iter().flat_map(|r| match &r.payload {
        TaskPayload::Research { sources, .. } if r.is_usable() => sources.clone(),
        _ => Vec::new(),
    });

    cited
        .into_iter()
        .chain(from_results)
        .filter(|source| {
            let key = source.url.clone().unwrap_or_else(|| source.title.to_lowercase());
            seen.insert(key)
        })
        .collect()
}

/// Deterministic aggregation straight from the results: one section per
/// scope item, findings and metrics as key findings, remaining gaps as
/// recommendations.
pub fn compile_aggregation(
    brief: &Brief,
    results: &[TaskResult],
    coverage: Option<&CoverageDecision>,
    rounds: u32,
) -> Aggregation {
    let mut key_findings = Vec::new();
    let mut sections = Vec::new();

    for item in &brief.scope {
        let mut lines = Vec::new();
        for result in results
            .iter()
            .filter(|r| r.scope_item_id == item.id && r.is_usable())
        {
            match &result.payload {
                TaskPayload::Research { findings, .. } => {
                    for finding in findings {
                        key_findings.push(finding.claim.clone());
                        lines.push(format!("- {}", finding.claim));
                    }
                }
                TaskPayload::Data { metrics, .. } => {
                    for (name, value) in metrics {
                        let line = format!("{}: {}", name, value);
                        lines.push(format!("- {}", line));
                        key_findings.push(format!("{} ({})", line, item.topic));
                    }
                }
                TaskPayload::Empty => {}
            }
        }
        let body = if lines.is_empty() {
            "No usable results.".to_string()
        } else {
            lines.join("\n")
        };
        sections.push(Section {
            title: item.topic.clone(),
            body,
        });
    }

    let recommendations = coverage
        .map(|c| {
            c.incomplete_items()
                .flat_map(|(_, item)| item.missing.iter().map(|m| format!("Follow up on {}", m)))
                .collect()
        })
        .unwrap_or_default();

    Aggregation {
        key_findings,
        recommendations,
        sections,
        bibliography: merge_sources(Vec::new(), results),
        coverage: coverage.map_or(0.0, |c| c.overall),
        rounds,
        created_at: Utc::now(),
    }
}
