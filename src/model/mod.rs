//! Domain model: sessions, briefs, plans, task results and the final
//! synthesis.
//!
//! Every type here is a plain serializable record. The pipeline owns all
//! mutation; the state store persists them as JSON documents.

mod brief;
mod context;
mod plan;
mod result;
mod session;

pub use brief::{Brief, Conversation, ConversationTurn, Priority, ScopeItem, ScopeKind, TurnRole};
pub use context::ResearchContext;
pub use plan::{DataSource, HttpMethod, Plan, Task, TaskKind};
pub use result::{
    Aggregation, Finding, Question, Report, Section, SourceRef, TaskPayload, TaskResult,
    TaskStatus,
};
pub use session::{Session, SessionError, SessionStatus};
