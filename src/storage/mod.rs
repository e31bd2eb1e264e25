//! Durable state store for research sessions.
//!
//! Every pipeline step persists its output as a JSON record addressed by a
//! [`RecordKey`]: the session, the record kind and, for round- and
//! task-scoped kinds, the round number and task id. Three backends implement
//! [`StateStore`]: JSON files with atomic rename (the default), a SQLite
//! `records` table, and process memory for tests.

mod file;
mod memory;
mod records;
mod restore;
mod sqlite;

pub use file::FileStateStore;
pub use memory::InMemoryStateStore;
pub use records::SessionRecords;
pub use restore::{restore_session, SessionSnapshot};
pub use sqlite::SqliteStateStore;

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{StorageBackend, StorageConfig};
use crate::error::{StorageError, StorageResult};
use crate::model::TaskKind;

/// How a record kind is addressed within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordScope {
    /// One record per session.
    Session,
    /// One record per round.
    Round,
    /// One record per (round, task).
    Task,
}

/// The kinds of record a session persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Session,
    Conversation,
    Context,
    BriefDraft,
    Brief,
    Plan,
    Coverage,
    DataResult,
    ResearchResult,
    Aggregation,
    Report,
}

impl RecordKind {
    /// Every kind, in pipeline order.
    pub const ALL: [RecordKind; 11] = [
        RecordKind::Session,
        RecordKind::Conversation,
        RecordKind::Context,
        RecordKind::BriefDraft,
        RecordKind::Brief,
        RecordKind::Plan,
        RecordKind::Coverage,
        RecordKind::DataResult,
        RecordKind::ResearchResult,
        RecordKind::Aggregation,
        RecordKind::Report,
    ];

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Session => "session",
            RecordKind::Conversation => "conversation",
            RecordKind::Context => "context",
            RecordKind::BriefDraft => "brief_draft",
            RecordKind::Brief => "brief",
            RecordKind::Plan => "plan",
            RecordKind::Coverage => "coverage",
            RecordKind::DataResult => "data_result",
            RecordKind::ResearchResult => "research_result",
            RecordKind::Aggregation => "aggregation",
            RecordKind::Report => "report",
        }
    }

    /// How records of this kind are addressed.
    pub fn scope(&self) -> RecordScope {
        match self {
            RecordKind::Plan | RecordKind::Coverage => RecordScope::Round,
            RecordKind::DataResult | RecordKind::ResearchResult => RecordScope::Task,
            _ => RecordScope::Session,
        }
    }

    /// The result kind for a task kind.
    pub fn result_for(kind: TaskKind) -> Self {
        match kind {
            TaskKind::Data => RecordKind::DataResult,
            TaskKind::Research => RecordKind::ResearchResult,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| StorageError::InvalidKey {
                message: format!("Unknown record kind: {}", s),
            })
    }
}

/// Address of one record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub session_id: String,
    pub kind: RecordKind,
    pub round: Option<u32>,
    pub task_id: Option<String>,
}

impl RecordKey {
    /// A session-scoped record.
    pub fn session(session_id: impl Into<String>, kind: RecordKind) -> Self {
        Self {
            session_id: session_id.into(),
            kind,
            round: None,
            task_id: None,
        }
    }

    /// A round-scoped record.
    pub fn round(session_id: impl Into<String>, kind: RecordKind, round: u32) -> Self {
        Self {
            session_id: session_id.into(),
            kind,
            round: Some(round),
            task_id: None,
        }
    }

    /// A task result record.
    pub fn task(
        session_id: impl Into<String>,
        kind: TaskKind,
        round: u32,
        task_id: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            kind: RecordKind::result_for(kind),
            round: Some(round),
            task_id: Some(task_id.into()),
        }
    }

    /// Check the key is well-formed for its kind and safe to use as a path
    /// component.
    pub fn validate(&self) -> StorageResult<()> {
        validate_component("session id", &self.session_id)?;

        let invalid = |message: String| Err(StorageError::InvalidKey { message });
        match (self.kind.scope(), self.round, &self.task_id) {
            (RecordScope::Session, None, None) => Ok(()),
            (RecordScope::Round, Some(round), None) if round >= 1 => Ok(()),
            (RecordScope::Task, Some(round), Some(task_id)) if round >= 1 => {
                validate_component("task id", task_id)
            }
            _ => invalid(format!("{} is not a valid address for {}", self, self.kind)),
        }
    }

    /// Round 0 is stored for session-scoped records.
    pub(crate) fn round_or_zero(&self) -> u32 {
        self.round.unwrap_or(0)
    }

    /// Empty string is stored for non-task records.
    pub(crate) fn task_or_empty(&self) -> &str {
        self.task_id.as_deref().unwrap_or("")
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.session_id, self.kind)?;
        if let Some(round) = self.round {
            write!(f, "/{}", round)?;
        }
        if let Some(task_id) = &self.task_id {
            write!(f, "/{}", task_id)?;
        }
        Ok(())
    }
}

fn validate_component(what: &str, value: &str) -> StorageResult<()> {
    let valid = !value.is_empty()
        && value.len() <= 128
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey {
            message: format!("Invalid {}: {:?}", what, value),
        })
    }
}

/// A record returned by [`StateStore::list_round`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub key: RecordKey,
    pub data: serde_json::Value,
}

/// Order task results: data before research, then by task number.
pub(crate) fn sort_records(records: &mut [StoredRecord]) {
    records.sort_by(|a, b| {
        a.key
            .kind
            .cmp(&b.key.kind)
            .then_with(|| compare_task_ids(a.key.task_or_empty(), b.key.task_or_empty()))
    });
}

fn compare_task_ids(a: &str, b: &str) -> Ordering {
    let number = |id: &str| id.get(1..).and_then(|n| n.parse::<u64>().ok());
    match (number(a), number(b)) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        _ => a.cmp(b),
    }
}

/// Key/value persistence of JSON records.
///
/// Writes are atomic: a reader sees either the previous record or the new
/// one, never a partial write. All failures are System-class and are not
/// retried here.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Persist `data` at `key`, replacing any previous record.
    async fn save(&self, key: &RecordKey, data: &serde_json::Value) -> StorageResult<()>;

    /// Persist `data` only if nothing is stored at `key` yet.
    ///
    /// Returns `false` if a record already existed; it is left unchanged.
    async fn save_if_absent(&self, key: &RecordKey, data: &serde_json::Value)
        -> StorageResult<bool>;

    /// Load the record at `key`.
    async fn load(&self, key: &RecordKey) -> StorageResult<Option<serde_json::Value>>;

    /// All task results saved for `round`, data results first.
    async fn list_round(&self, session_id: &str, round: u32) -> StorageResult<Vec<StoredRecord>>;

    /// Ids of every session with a saved session record.
    async fn list_sessions(&self) -> StorageResult<Vec<String>>;

    /// Remove every record of a session.
    async fn delete_session(&self, session_id: &str) -> StorageResult<()>;
}

/// Open the configured backend.
pub async fn open_store(config: &StorageConfig) -> StorageResult<Arc<dyn StateStore>> {
    let store: Arc<dyn StateStore> = match config.backend {
        StorageBackend::File => Arc::new(FileStateStore::open(config.path.clone()).await?),
        StorageBackend::Sqlite => Arc::new(SqliteStateStore::new(&config.database).await?),
        StorageBackend::Memory => Arc::new(InMemoryStateStore::new()),
    };
    Ok(store)
}
