//! Coverage evaluation and the continue/stop decision between rounds.
//!
//! A scope item has one facet per kind of work it needs (`data`, `research`
//! or both). A facet's score is the best `status weight * confidence` among
//! the results tagged to that item and kind across all rounds; completed
//! results weigh 1.0, partial 0.5, failed 0.0. The item's coverage is the
//! mean of its facet scores and the overall coverage is the priority-weighted
//! mean over items.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::model::{Brief, ScopeItem, TaskKind, TaskResult};

/// Coverage of one scope item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemCoverage {
    /// Mean of the facet scores (0.0-1.0).
    pub coverage: f64,
    /// Data facet score, if the item needs data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<f64>,
    /// Research facet score, if the item needs research.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub research: Option<f64>,
    /// Facets scoring below the threshold.
    #[serde(default)]
    pub missing_facets: Vec<TaskKind>,
    /// Human-readable missing aspects: uncovered facets plus gaps reported
    /// by the most recent results for the item.
    #[serde(default)]
    pub missing: Vec<String>,
}

impl ItemCoverage {
    /// Whether the item still needs work.
    pub fn is_incomplete(&self) -> bool {
        !self.missing_facets.is_empty()
    }
}

/// Result of evaluating coverage after a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageDecision {
    /// Round the decision was made after.
    pub round: u32,
    /// Coverage per scope item id.
    pub items: BTreeMap<String, ItemCoverage>,
    /// Priority-weighted mean coverage.
    pub overall: f64,
    /// Threshold the decision was made against.
    pub threshold: f64,
    /// Whether another round should be planned.
    #[serde(rename = "continue")]
    pub should_continue: bool,
}

impl CoverageDecision {
    /// Ids of scope items with at least one uncovered facet, in id order.
    pub fn incomplete_items(&self) -> impl Iterator<Item = (&String, &ItemCoverage)> {
        self.items.iter().filter(|(_, item)| item.is_incomplete())
    }
}

/// Computes [`CoverageDecision`]s. Pure and deterministic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoverageEvaluator {
    threshold: f64,
    max_rounds: u32,
}

impl CoverageEvaluator {
    /// Create an evaluator; `threshold` is clamped to 0.0-1.0.
    pub fn new(threshold: f64, max_rounds: u32) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
            max_rounds,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.coverage_threshold, config.max_rounds)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Evaluate accumulated `results` against `brief` after `round`.
    ///
    /// Continues while overall coverage is below the threshold and
    /// `round < max_rounds`.
    pub fn evaluate(&self, brief: &Brief, results: &[TaskResult], round: u32) -> CoverageDecision {
        let mut items = BTreeMap::new();
        let mut weighted = 0.0;
        let mut total_weight = 0.0;

        for item in &brief.scope {
            let related: Vec<&TaskResult> = results
                .iter()
                .filter(|r| r.scope_item_id == item.id)
                .collect();
            let coverage = self.item_coverage(item, &related);

            let weight = item.priority.weight();
            weighted += weight * coverage.coverage;
            total_weight += weight;
            items.insert(item.id.clone(), coverage);
        }

        let overall = if total_weight > 0.0 {
            round_score(weighted / total_weight)
        } else {
            0.0
        };

        CoverageDecision {
            round,
            items,
            overall,
            threshold: self.threshold,
            should_continue: overall < self.threshold && round < self.max_rounds,
        }
    }

    fn item_coverage(&self, item: &ScopeItem, related: &[&TaskResult]) -> ItemCoverage {
        let facet = |kind: TaskKind| {
            related
                .iter()
                .filter(|r| r.kind == kind)
                .map(|r| r.status.coverage_weight() * r.confidence)
                .fold(0.0_f64, f64::max)
        };

        let data = item.kind.needs_data().then(|| round_score(facet(TaskKind::Data)));
        let research = item
            .kind
            .needs_research()
            .then(|| round_score(facet(TaskKind::Research)));

        let scores: Vec<f64> = [data, research].into_iter().flatten().collect();
        let coverage = if scores.is_empty() {
            0.0
        } else {
            round_score(scores.iter().sum::<f64>() / scores.len() as f64)
        };

        let missing_facets: Vec<TaskKind> = [(TaskKind::Data, data), (TaskKind::Research, research)]
            .into_iter()
            .filter_map(|(kind, score)| score.filter(|s| *s < self.threshold).map(|_| kind))
            .collect();

        let mut missing: BTreeSet<String> = missing_facets
            .iter()
            .map(|kind| format!("{} coverage for {}", kind.as_str(), item.topic))
            .collect();

        // Gaps from the latest round that produced usable output for the item
        let latest = related
            .iter()
            .filter(|r| r.is_usable())
            .map(|r| r.round)
            .max();
        if let Some(latest) = latest {
            missing.extend(
                related
                    .iter()
                    .filter(|r| r.round == latest && r.is_usable())
                    .flat_map(|r| r.gaps.iter().cloned()),
            );
        }

        ItemCoverage {
            coverage,
            data,
            research,
            missing_facets,
            missing: missing.into_iter().collect(),
        }
    }
}

/// Round to 4 decimal places so repeated evaluation compares equal after a
/// JSON round trip.
fn round_score(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Priority, ScopeKind, Task, TaskPayload};

    fn brief() -> Brief {
        Brief::new(
            "EV market",
            vec![
                ScopeItem::new("s1", "Sales volume", ScopeKind::Data),
                ScopeItem::new("s2", "Battery supply", ScopeKind::Both),
            ],
        )
    }

    fn completed(kind: TaskKind, id: &str, scope: &str, round: u32) -> TaskResult {
        let task = match kind {
            TaskKind::Data => Task::data(id, scope, "task"),
            TaskKind::Research => Task::research(id, scope, "task"),
        };
        TaskResult::completed(&task, round, TaskPayload::Empty)
    }

    fn failed(kind: TaskKind, id: &str, scope: &str, round: u32) -> TaskResult {
        let task = match kind {
            TaskKind::Data => Task::data(id, scope, "task"),
            TaskKind::Research => Task::research(id, scope, "task"),
        };
        TaskResult::failed(&task, round, "network error")
    }

    #[test]
    fn test_failed_facet_keeps_round_going() {
        let results = vec![
            completed(TaskKind::Data, "d1", "s1", 1),
            failed(TaskKind::Data, "d2", "s2", 1),
            completed(TaskKind::Research, "r1", "s2", 1),
        ];
        let decision = CoverageEvaluator::new(0.8, 5).evaluate(&brief(), &results, 1);

        assert_eq!(decision.items["s1"].coverage, 1.0);
        assert_eq!(decision.items["s2"].coverage, 0.5);
        assert_eq!(decision.items["s2"].missing_facets, vec![TaskKind::Data]);
        assert_eq!(decision.overall, 0.75);
        assert!(decision.should_continue);

        let incomplete: Vec<&String> = decision.incomplete_items().map(|(id, _)| id).collect();
        assert_eq!(incomplete, vec!["s2"]);
    }

    #[test]
    fn test_stops_at_threshold() {
        let results = vec![
            completed(TaskKind::Data, "d1", "s1", 1),
            completed(TaskKind::Data, "d2", "s2", 1),
            completed(TaskKind::Research, "r1", "s2", 1),
        ];
        let decision = CoverageEvaluator::new(0.8, 5).evaluate(&brief(), &results, 1);
        assert_eq!(decision.overall, 1.0);
        assert!(!decision.should_continue);
        assert!(decision.items.values().all(|item| item.missing.is_empty()));
    }

    #[test]
    fn test_stops_when_round_budget_exhausted() {
        let decision = CoverageEvaluator::new(0.8, 2).evaluate(&brief(), &[], 2);
        assert_eq!(decision.overall, 0.0);
        assert!(!decision.should_continue);
    }

    #[test]
    fn test_later_round_fills_earlier_failure() {
        let results = vec![
            completed(TaskKind::Data, "d1", "s1", 1),
            failed(TaskKind::Data, "d2", "s2", 1),
            completed(TaskKind::Research, "r1", "s2", 1),
            completed(TaskKind::Data, "d1", "s2", 2),
        ];
        let decision = CoverageEvaluator::new(0.8, 5).evaluate(&brief(), &results, 2);
        assert_eq!(decision.items["s2"].coverage, 1.0);
        assert!(!decision.should_continue);
    }

    #[test]
    fn test_partial_and_confidence_weighting() {
        let brief = Brief::new(
            "g",
            vec![ScopeItem::new("s1", "Topic", ScopeKind::Research)],
        );
        let results = vec![completed(TaskKind::Research, "r1", "s1", 1)
            .partial()
            .with_confidence(0.8)
            .with_gap("regional breakdown")];

        let decision = CoverageEvaluator::new(0.8, 5).evaluate(&brief, &results, 1);
        assert_eq!(decision.items["s1"].coverage, 0.4);
        assert_eq!(
            decision.items["s1"].missing,
            vec![
                "regional breakdown".to_string(),
                "research coverage for Topic".to_string()
            ]
        );
    }

    #[test]
    fn test_priority_weighting() {
        let brief = Brief::new(
            "g",
            vec![
                ScopeItem::new("s1", "A", ScopeKind::Data).with_priority(Priority::High),
                ScopeItem::new("s2", "B", ScopeKind::Data).with_priority(Priority::Low),
            ],
        );
        let results = vec![completed(TaskKind::Data, "d1", "s1", 1)];
        let decision = CoverageEvaluator::new(0.8, 5).evaluate(&brief, &results, 1);
        assert_eq!(decision.overall, 0.75);
    }

    #[test]
    fn test_evaluate_is_deterministic() {
        let results = vec![
            completed(TaskKind::Data, "d1", "s1", 1).with_gap("b").with_gap("a"),
            failed(TaskKind::Research, "r1", "s2", 1),
        ];
        let evaluator = CoverageEvaluator::new(0.8, 5);
        let first = evaluator.evaluate(&brief(), &results, 1);
        let second = evaluator.evaluate(&brief(), &results, 1);
        assert_eq!(first, second);

        let json = serde_json::to_value(&first).unwrap();
        assert_eq!(json["continue"], serde_json::json!(true));
        let back: CoverageDecision = serde_json::from_value(json).unwrap();
        assert_eq!(back, first);
    }
}
