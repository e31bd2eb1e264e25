//! One step of the state machine per session status.
//!
//! Each step first looks for its own persisted output and only does the
//! work when none exists, so re-entering a step after a crash never redoes
//! completed work.

use std::sync::Arc;

use tracing::info;

use super::{collaborator, Pipeline};
use crate::agents::PlanningRequest;
use crate::error::{PipelineError, PipelineResult};
use crate::executor::{collect_questions, RoundContext, StoreSink};
use crate::model::{Brief, Session, SessionStatus, TaskKind};

impl Pipeline {
    /// Advance `session` by one status, persisting the outcome.
    pub(super) async fn step(&self, session: &mut Session) -> PipelineResult<()> {
        match session.status {
            SessionStatus::Created => self.advance(session, SessionStatus::InitialResearch).await,
            SessionStatus::InitialResearch => self.initial_research(session).await,
            SessionStatus::Planning => self.plan_round(session).await,
            SessionStatus::Executing => self.execute_round(session).await,
            SessionStatus::Review => self.review_round(session).await,
            SessionStatus::Aggregating => self.aggregate(session).await,
            SessionStatus::Reporting => self.report(session).await,
            SessionStatus::Brief | SessionStatus::Done | SessionStatus::Failed => Ok(()),
        }
    }

    async fn advance(&self, session: &mut Session, next: SessionStatus) -> PipelineResult<()> {
        session.transition(next)?;
        self.records(&session.id).save_session(session).await?;
        Ok(())
    }

    async fn require_brief(&self, session: &Session) -> PipelineResult<Brief> {
        self.records(&session.id)
            .load_brief()
            .await?
            .ok_or_else(|| PipelineError::MissingRecord {
                session_id: session.id.clone(),
                record: "brief".to_string(),
            })
    }

    async fn initial_research(&self, session: &mut Session) -> PipelineResult<()> {
        let records = self.records(&session.id);
        if records.load_context().await?.is_none() {
            let context = self
                .collaborators
                .context
                .gather(session)
                .await
                .map_err(collaborator("initial research"))?;
            records.save_context(&context).await?;
        }
        self.advance(session, SessionStatus::Brief).await
    }

    async fn plan_round(&self, session: &mut Session) -> PipelineResult<()> {
        let round = session.current_round + 1;
        if round > self.config.max_rounds {
            info!(
                session_id = %session.id,
                max_rounds = self.config.max_rounds,
                "Round budget exhausted, aggregating"
            );
            return self.advance(session, SessionStatus::Aggregating).await;
        }

        let brief = self.require_brief(session).await?;
        let records = self.records(&session.id);

        let plan = match records.load_plan(round).await? {
            Some(plan) => plan,
            None => {
                let previous = session.current_round;
                let coverage = match previous {
                    0 => None,
                    n => records.load_coverage(n).await?,
                };
                let results = records.load_all_results(previous).await?;
                let questions =
                    collect_questions(results.iter().filter(|r| r.round == previous));

                let plan = self
                    .collaborators
                    .planner
                    .plan(PlanningRequest {
                        session_id: &session.id,
                        brief: &brief,
                        round,
                        coverage: coverage.as_ref(),
                        questions: &questions,
                        results: &results,
                    })
                    .await
                    .map_err(collaborator("planning"))?;

                if plan.round != round {
                    return Err(PipelineError::Validation {
                        field: "plan".to_string(),
                        reason: format!("planned round {} instead of {}", plan.round, round),
                    });
                }
                plan.validate(&brief)?;
                records.save_plan(&plan).await?;
                plan
            }
        };

        if plan.task_count() == 0 {
            info!(session_id = %session.id, round, "Nothing left to plan, aggregating");
            return self.advance(session, SessionStatus::Aggregating).await;
        }

        info!(
            session_id = %session.id,
            round,
            tasks = plan.task_count(),
            estimated_coverage = plan.estimated_coverage,
            "Round planned"
        );
        session.begin_round(round)?;
        self.advance(session, SessionStatus::Executing).await
    }

    async fn execute_round(&self, session: &mut Session) -> PipelineResult<()> {
        let round = session.current_round;
        let records = self.records(&session.id);
        let brief = self.require_brief(session).await?;
        let plan = records
            .load_plan(round)
            .await?
            .ok_or_else(|| PipelineError::MissingRecord {
                session_id: session.id.clone(),
                record: format!("plan for round {}", round),
            })?;

        let done = records.load_results(round).await?;
        let (data, research): (Vec<_>, Vec<_>) = plan
            .tasks()
            .filter(|task| !done.iter().any(|r| r.task_id == task.id))
            .cloned()
            .partition(|task| task.kind == TaskKind::Data);

        if data.is_empty() && research.is_empty() {
            info!(session_id = %session.id, round, "All tasks already settled");
        } else {
            if !done.is_empty() {
                info!(
                    session_id = %session.id,
                    round,
                    settled = done.len(),
                    pending = data.len() + research.len(),
                    "Resuming partially executed round"
                );
            }

            let context = RoundContext {
                session_id: session.id.clone(),
                round,
                brief: Arc::new(brief),
                prior_results: Arc::new(records.load_all_results(round.saturating_sub(1)).await?),
            };
            let sink = StoreSink::new(Arc::clone(&self.store), session.id.clone());
            let outcome = self
                .executor
                .execute_round(
                    &data,
                    &research,
                    &context,
                    self.config.round_timeout(),
                    Some(&sink),
                )
                .await;

            // Results must be durable before the next plan is made.
            for result in outcome.results() {
                records.save_result(result).await?;
            }
        }

        self.advance(session, SessionStatus::Review).await
    }

    async fn review_round(&self, session: &mut Session) -> PipelineResult<()> {
        let round = session.current_round;
        let records = self.records(&session.id);

        let decision = match records.load_coverage(round).await? {
            Some(decision) => decision,
            None => {
                let brief = self.require_brief(session).await?;
                let results = records.load_all_results(round).await?;
                let decision = self.evaluator.evaluate(&brief, &results, round);
                records.save_coverage(&decision).await?;
                decision
            }
        };

        info!(
            session_id = %session.id,
            round,
            coverage = decision.overall,
            threshold = decision.threshold,
            should_continue = decision.should_continue,
            "Round reviewed"
        );

        let next = if decision.should_continue {
            SessionStatus::Planning
        } else {
            SessionStatus::Aggregating
        };
        self.advance(session, next).await
    }

    async fn aggregate(&self, session: &mut Session) -> PipelineResult<()> {
        let records = self.records(&session.id);
        if records.load_aggregation().await?.is_none() {
            let brief = self.require_brief(session).await?;
            let rounds = session.current_round;
            let results = records.load_all_results(rounds).await?;
            let coverage = match rounds {
                0 => None,
                n => records.load_coverage(n).await?,
            };

            let aggregation = self
                .collaborators
                .aggregator
                .aggregate(&brief, &results, coverage.as_ref(), rounds)
                .await
                .map_err(collaborator("aggregation"))?;
            records.save_aggregation(&aggregation).await?;
        }
        self.advance(session, SessionStatus::Reporting).await
    }

    async fn report(&self, session: &mut Session) -> PipelineResult<()> {
        let records = self.records(&session.id);
        if records.load_report().await?.is_none() {
            let brief = self.require_brief(session).await?;
            let aggregation =
                records
                    .load_aggregation()
                    .await?
                    .ok_or_else(|| PipelineError::MissingRecord {
                        session_id: session.id.clone(),
                        record: "aggregation".to_string(),
                    })?;

            let report = self
                .collaborators
                .reporter
                .render(&brief, &aggregation)
                .await
                .map_err(collaborator("reporting"))?;
            records.save_report(&report).await?;
        }
        self.advance(session, SessionStatus::Done).await
    }
}
