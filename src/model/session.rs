//! Session lifecycle and the state-machine edge table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};

/// Lifecycle status of a research session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// Session record exists, nothing has run yet.
    Created,
    /// Gathering initial context for the query.
    InitialResearch,
    /// Conversational brief building; waits for user input and approval.
    Brief,
    /// Producing the plan for the next round.
    Planning,
    /// Running the current round's tasks.
    Executing,
    /// Evaluating coverage after a round.
    Review,
    /// Synthesizing findings across rounds.
    Aggregating,
    /// Producing the final report.
    Reporting,
    /// Terminal success.
    Done,
    /// Terminal failure.
    Failed,
}

impl SessionStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [SessionStatus; 10] = [
        SessionStatus::Created,
        SessionStatus::InitialResearch,
        SessionStatus::Brief,
        SessionStatus::Planning,
        SessionStatus::Executing,
        SessionStatus::Review,
        SessionStatus::Aggregating,
        SessionStatus::Reporting,
        SessionStatus::Done,
        SessionStatus::Failed,
    ];

    /// Allowed transitions, excluding the implicit `* -> FAILED` edges.
    const EDGES: [(SessionStatus, SessionStatus); 10] = [
        (SessionStatus::Created, SessionStatus::InitialResearch),
        (SessionStatus::InitialResearch, SessionStatus::Brief),
        (SessionStatus::Brief, SessionStatus::Planning),
        (SessionStatus::Planning, SessionStatus::Executing),
        (SessionStatus::Planning, SessionStatus::Aggregating),
        (SessionStatus::Executing, SessionStatus::Review),
        (SessionStatus::Review, SessionStatus::Planning),
        (SessionStatus::Review, SessionStatus::Aggregating),
        (SessionStatus::Aggregating, SessionStatus::Reporting),
        (SessionStatus::Reporting, SessionStatus::Done),
    ];

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Created => "CREATED",
            SessionStatus::InitialResearch => "INITIAL_RESEARCH",
            SessionStatus::Brief => "BRIEF",
            SessionStatus::Planning => "PLANNING",
            SessionStatus::Executing => "EXECUTING",
            SessionStatus::Review => "REVIEW",
            SessionStatus::Aggregating => "AGGREGATING",
            SessionStatus::Reporting => "REPORTING",
            SessionStatus::Done => "DONE",
            SessionStatus::Failed => "FAILED",
        }
    }

    /// `DONE` and `FAILED` have no outgoing edges.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Done | SessionStatus::Failed)
    }

    /// States the pipeline advances on its own, without user input.
    pub fn is_automated(&self) -> bool {
        !matches!(
            self,
            SessionStatus::Brief | SessionStatus::Done | SessionStatus::Failed
        )
    }

    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        if next == SessionStatus::Failed {
            return !self.is_terminal();
        }
        Self::EDGES.contains(&(*self, next))
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SessionStatus::ALL
            .iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("Unknown session status: {}", s))
    }
}

/// Structured terminal error recorded on a failed session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionError {
    /// Stable machine-readable code.
    pub code: String,
    /// Human-readable detail.
    pub message: String,
}

impl SessionError {
    /// Create a session error.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<&PipelineError> for SessionError {
    fn from(err: &PipelineError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

/// A research session. Mutated only by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// The research query that opened the session.
    pub query: String,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Last round whose plan was created. 0 before the first plan.
    pub current_round: u32,
    /// Terminal error, set on transition to `FAILED`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SessionError>,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// When the session was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a new session in `CREATED`.
    pub fn new(user_id: impl Into<String>, query: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            query: query.into(),
            status: SessionStatus::Created,
            current_round: 0,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, failing closed if the edge does not exist.
    ///
    /// On error the session is left unchanged.
    pub fn transition(&mut self, next: SessionStatus) -> PipelineResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(PipelineError::InvalidStateTransition {
                from: self.status,
                to: next,
            });
        }
        tracing::info!(
            session_id = %self.id,
            from = %self.status,
            to = %next,
            round = self.current_round,
            "Session state transition"
        );
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Transition to `FAILED` and record the error.
    pub fn fail(&mut self, error: SessionError) -> PipelineResult<()> {
        self.transition(SessionStatus::Failed)?;
        self.error = Some(error);
        Ok(())
    }

    /// Advance the round counter. Rounds never go backwards.
    pub fn begin_round(&mut self, round: u32) -> PipelineResult<()> {
        if round != self.current_round + 1 {
            return Err(PipelineError::Validation {
                field: "round".to_string(),
                reason: format!(
                    "round {} does not follow current round {}",
                    round, self.current_round
                ),
            });
        }
        self.current_round = round;
        self.updated_at = Utc::now();
        Ok(())
    }
}
