//! The session state machine.
//!
//! Every step of the pipeline reads what it needs from the [`StateStore`],
//! does one piece of work, persists the outcome and then the new session
//! status. Nothing is carried in memory between steps, so a restarted
//! process resumes at the last persisted checkpoint by calling
//! [`Pipeline::resume`].

mod steps;
mod views;

pub use views::{BriefReply, RoundSummary, SessionResults, StatusView};

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, error, info, warn};

use crate::agents::{BriefTurn, Collaborators};
use crate::config::PipelineConfig;
use crate::coverage::CoverageEvaluator;
use crate::error::{AgentError, PipelineError, PipelineResult, StorageError};
use crate::executor::ParallelExecutor;
use crate::model::{Session, SessionError, SessionStatus, TurnRole};
use crate::storage::{restore_session, SessionRecords, StateStore};
use crate::tracker::ResourceTracker;

/// Drives research sessions through their lifecycle.
pub struct Pipeline {
    store: Arc<dyn StateStore>,
    collaborators: Collaborators,
    executor: ParallelExecutor,
    evaluator: CoverageEvaluator,
    config: PipelineConfig,
    tracker: Arc<ResourceTracker>,
    running: Mutex<HashSet<String>>,
}

/// Marks a session as driven by one `run` call; released on drop.
struct RunGuard<'a> {
    running: &'a Mutex<HashSet<String>>,
    session_id: String,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        lock(self.running).remove(&self.session_id);
    }
}

fn lock(running: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn StateStore>,
        collaborators: Collaborators,
        config: PipelineConfig,
        tracker: Arc<ResourceTracker>,
    ) -> Self {
        let executor = ParallelExecutor::new(collaborators.agents.clone(), Arc::clone(&tracker));
        Self {
            store,
            executor,
            evaluator: CoverageEvaluator::from_config(&config),
            collaborators,
            config,
            tracker,
            running: Mutex::new(HashSet::new()),
        }
    }

    pub fn tracker(&self) -> &Arc<ResourceTracker> {
        &self.tracker
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn records<'a>(&'a self, session_id: &'a str) -> SessionRecords<'a> {
        SessionRecords::new(self.store.as_ref(), session_id)
    }

    /// Load a session, mapping absent and malformed ids to not-found.
    async fn require_session(&self, session_id: &str) -> PipelineResult<Session> {
        let not_found = || PipelineError::SessionNotFound {
            session_id: session_id.to_string(),
        };
        match self.records(session_id).load_session().await {
            Ok(Some(session)) => Ok(session),
            Ok(None) | Err(StorageError::InvalidKey { .. }) => Err(not_found()),
            Err(e) => Err(e.into()),
        }
    }

    fn require_status(session: &Session, expected: SessionStatus, operation: &str) -> PipelineResult<()> {
        if session.status == expected {
            Ok(())
        } else {
            Err(PipelineError::InvalidOperation {
                operation: operation.to_string(),
                status: session.status,
            })
        }
    }

    /// Create a session, gather initial context and open the brief
    /// conversation.
    pub async fn start_session(&self, user_id: &str, query: &str) -> PipelineResult<Session> {
        for (field, value) in [("user_id", user_id), ("query", query)] {
            if value.trim().is_empty() {
                return Err(PipelineError::Validation {
                    field: field.to_string(),
                    reason: "cannot be empty".to_string(),
                });
            }
        }

        let session = Session::new(user_id.trim(), query.trim());
        self.records(&session.id).save_session(&session).await?;
        info!(session_id = %session.id, user_id = %session.user_id, "Session created");

        self.run(&session.id).await
    }

    /// Add a user message to the brief conversation and return the
    /// collaborator's reply. Collaborator failures leave the session as is.
    pub async fn process_message(&self, session_id: &str, message: &str) -> PipelineResult<BriefReply> {
        let mut session = self.require_session(session_id).await?;
        Self::require_status(&session, SessionStatus::Brief, "process_message")?;
        if message.trim().is_empty() {
            return Err(PipelineError::Validation {
                field: "message".to_string(),
                reason: "cannot be empty".to_string(),
            });
        }

        let records = self.records(session_id);
        let mut conversation = records.load_conversation().await?;
        if conversation.user_turns() >= self.config.max_brief_turns {
            let err = PipelineError::LimitExceeded {
                message: format!(
                    "brief conversation exceeded {} messages",
                    self.config.max_brief_turns
                ),
            };
            self.fail_session(&mut session, &err).await;
            return Err(err);
        }

        conversation.push(TurnRole::User, message.trim());
        let context = records.load_context().await?;
        let turn = self
            .collaborators
            .brief
            .respond(&session, context.as_ref(), &conversation)
            .await
            .map_err(collaborator("brief"))?;

        let reply = match turn {
            BriefTurn::Question(question) => {
                conversation.push(TurnRole::Assistant, question.clone());
                BriefReply::Question { question }
            }
            BriefTurn::Draft(mut brief) => {
                if let Some(previous) = records.load_brief_draft().await? {
                    brief.version = previous.version + 1;
                }
                brief.approved_at = None;
                conversation.push(
                    TurnRole::Assistant,
                    format!("Draft brief v{}: {}", brief.version, brief.goal),
                );
                records.save_brief_draft(&brief).await?;
                debug!(session_id, version = brief.version, "Brief draft saved");
                BriefReply::Draft { brief }
            }
        };

        records.save_conversation(&conversation).await?;
        session.updated_at = chrono::Utc::now();
        records.save_session(&session).await?;
        Ok(reply)
    }

    /// Approve the current draft and move to planning. The round loop is
    /// started separately with [`Pipeline::run`].
    pub async fn approve_brief(&self, session_id: &str) -> PipelineResult<Session> {
        let mut session = self.require_session(session_id).await?;
        Self::require_status(&session, SessionStatus::Brief, "approve_brief")?;

        let records = self.records(session_id);
        let draft = records
            .load_brief_draft()
            .await?
            .ok_or_else(|| PipelineError::BriefNotReady {
                session_id: session_id.to_string(),
            })?;

        let mut brief = draft.normalize()?;
        brief.approved_at = Some(chrono::Utc::now());
        records.save_brief(&brief).await?;

        session.transition(SessionStatus::Planning)?;
        records.save_session(&session).await?;
        info!(session_id, version = brief.version, scope_items = brief.scope.len(), "Brief approved");
        Ok(session)
    }

    /// Advance the session until it needs user input or is terminal.
    ///
    /// A failing step moves the session to `FAILED` and its error is
    /// returned. If the session is already being driven by another call,
    /// this returns its current state without doing anything.
    pub async fn run(&self, session_id: &str) -> PipelineResult<Session> {
        let Some(_guard) = self.claim(session_id) else {
            debug!(session_id, "Session already running");
            return self.require_session(session_id).await;
        };

        loop {
            let mut session = self.require_session(session_id).await?;
            if !session.status.is_automated() {
                return Ok(session);
            }

            if let Err(err) = self.step(&mut session).await {
                error!(
                    session_id,
                    status = %session.status,
                    round = session.current_round,
                    error = %err,
                    "Pipeline step failed"
                );
                self.fail_session(&mut session, &err).await;
                return Err(err);
            }
        }
    }

    /// Rebuild a session from the store and continue where it stopped.
    pub async fn resume(&self, session_id: &str) -> PipelineResult<Session> {
        let session = self.require_session(session_id).await?;
        info!(
            session_id,
            status = %session.status,
            round = session.current_round,
            "Resuming session"
        );
        self.run(session_id).await
    }

    /// Current status with per-round progress.
    pub async fn status(&self, session_id: &str) -> PipelineResult<StatusView> {
        let snapshot = self.snapshot(session_id).await?;
        Ok(StatusView::from_snapshot(&snapshot))
    }

    /// Brief, coverage, aggregation and report, as far as they exist.
    pub async fn results(&self, session_id: &str) -> PipelineResult<SessionResults> {
        let snapshot = self.snapshot(session_id).await?;
        Ok(SessionResults::from_snapshot(snapshot))
    }

    async fn snapshot(&self, session_id: &str) -> PipelineResult<crate::storage::SessionSnapshot> {
        self.require_session(session_id).await?;
        restore_session(self.store.as_ref(), session_id)
            .await?
            .ok_or_else(|| PipelineError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    /// Sessions the pipeline can advance without user input, e.g. those
    /// interrupted by a crash.
    pub async fn resumable_sessions(&self) -> PipelineResult<Vec<String>> {
        let mut resumable = Vec::new();
        for session_id in self.store.list_sessions().await? {
            match self.records(&session_id).load_session().await {
                Ok(Some(session)) if session.status.is_automated() => resumable.push(session_id),
                Ok(_) => {}
                Err(e) => warn!(session_id = %session_id, error = %e, "Skipping unreadable session"),
            }
        }
        Ok(resumable)
    }

    /// Delete every record of a session. Returns `false` if it did not
    /// exist.
    pub async fn cleanup(&self, session_id: &str) -> PipelineResult<bool> {
        let session = match self.require_session(session_id).await {
            Ok(session) => session,
            Err(PipelineError::SessionNotFound { .. }) => return Ok(false),
            Err(e) => return Err(e),
        };
        if lock(&self.running).contains(session_id) {
            return Err(PipelineError::InvalidOperation {
                operation: "cleanup".to_string(),
                status: session.status,
            });
        }
        self.store.delete_session(session_id).await?;
        info!(session_id, "Session deleted");
        Ok(true)
    }

    fn claim(&self, session_id: &str) -> Option<RunGuard<'_>> {
        if !lock(&self.running).insert(session_id.to_string()) {
            return None;
        }
        Some(RunGuard {
            running: &self.running,
            session_id: session_id.to_string(),
        })
    }

    /// Record `err` on the session and persist it as `FAILED`.
    async fn fail_session(&self, session: &mut Session, err: &PipelineError) {
        if let Err(e) = session.fail(SessionError::from(err)) {
            warn!(session_id = %session.id, error = %e, "Session already terminal");
            return;
        }
        if let Err(e) = self.records(&session.id).save_session(session).await {
            error!(session_id = %session.id, error = %e, "Failed to persist failed session");
        }
    }
}

fn collaborator(stage: &'static str) -> impl FnOnce(AgentError) -> PipelineError {
    move |source| PipelineError::Collaborator {
        stage: stage.to_string(),
        source,
    }
}
