use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{RecordKey, RecordKind, StateStore};
use crate::coverage::CoverageDecision;
use crate::error::{StorageError, StorageResult};
use crate::model::{
    Aggregation, Brief, Conversation, Plan, Report, ResearchContext, Session, TaskResult,
};

/// Typed access to one session's records.
pub struct SessionRecords<'a> {
    store: &'a dyn StateStore,
    session_id: &'a str,
}

impl<'a> SessionRecords<'a> {
    pub fn new(store: &'a dyn StateStore, session_id: &'a str) -> Self {
        Self { store, session_id }
    }

    pub fn session_id(&self) -> &str {
        self.session_id
    }

    async fn save<T: Serialize>(&self, key: RecordKey, value: &T) -> StorageResult<()> {
        let data = serde_json::to_value(value)?;
        self.store.save(&key, &data).await
    }

    async fn load<T: DeserializeOwned>(&self, key: RecordKey) -> StorageResult<Option<T>> {
        match self.store.load(&key).await? {
            Some(data) => decode(&key, data).map(Some),
            None => Ok(None),
        }
    }

    fn key(&self, kind: RecordKind) -> RecordKey {
        RecordKey::session(self.session_id, kind)
    }

    pub async fn save_session(&self, session: &Session) -> StorageResult<()> {
        self.save(self.key(RecordKind::Session), session).await
    }

    pub async fn load_session(&self) -> StorageResult<Option<Session>> {
        self.load(self.key(RecordKind::Session)).await
    }

    pub async fn save_conversation(&self, conversation: &Conversation) -> StorageResult<()> {
        self.save(self.key(RecordKind::Conversation), conversation).await
    }

    /// The conversation so far; empty if none was saved.
    pub async fn load_conversation(&self) -> StorageResult<Conversation> {
        Ok(self
            .load(self.key(RecordKind::Conversation))
            .await?
            .unwrap_or_default())
    }

    pub async fn save_context(&self, context: &ResearchContext) -> StorageResult<()> {
        self.save(self.key(RecordKind::Context), context).await
    }

    pub async fn load_context(&self) -> StorageResult<Option<ResearchContext>> {
        self.load(self.key(RecordKind::Context)).await
    }

    pub async fn save_brief_draft(&self, draft: &Brief) -> StorageResult<()> {
        self.save(self.key(RecordKind::BriefDraft), draft).await
    }

    pub async fn load_brief_draft(&self) -> StorageResult<Option<Brief>> {
        self.load(self.key(RecordKind::BriefDraft)).await
    }

    pub async fn save_brief(&self, brief: &Brief) -> StorageResult<()> {
        self.save(self.key(RecordKind::Brief), brief).await
    }

    pub async fn load_brief(&self) -> StorageResult<Option<Brief>> {
        self.load(self.key(RecordKind::Brief)).await
    }

    pub async fn save_plan(&self, plan: &Plan) -> StorageResult<()> {
        self.save(
            RecordKey::round(self.session_id, RecordKind::Plan, plan.round),
            plan,
        )
        .await
    }

    pub async fn load_plan(&self, round: u32) -> StorageResult<Option<Plan>> {
        self.load(RecordKey::round(self.session_id, RecordKind::Plan, round))
            .await
    }

    pub async fn save_coverage(&self, decision: &CoverageDecision) -> StorageResult<()> {
        self.save(
            RecordKey::round(self.session_id, RecordKind::Coverage, decision.round),
            decision,
        )
        .await
    }

    pub async fn load_coverage(&self, round: u32) -> StorageResult<Option<CoverageDecision>> {
        self.load(RecordKey::round(self.session_id, RecordKind::Coverage, round))
            .await
    }

    /// Save a task result once. Returns `false` if a result for the same
    /// (round, task) was already stored; the stored one wins.
    pub async fn save_result(&self, result: &TaskResult) -> StorageResult<bool> {
        let key = RecordKey::task(self.session_id, result.kind, result.round, &result.task_id);
        let data = serde_json::to_value(result)?;
        self.store.save_if_absent(&key, &data).await
    }

    /// Every saved result of `round`, data results first.
    pub async fn load_results(&self, round: u32) -> StorageResult<Vec<TaskResult>> {
        self.store
            .list_round(self.session_id, round)
            .await?
            .into_iter()
            .map(|record| decode(&record.key, record.data))
            .collect()
    }

    /// Every saved result of rounds `1..=through`.
    pub async fn load_all_results(&self, through: u32) -> StorageResult<Vec<TaskResult>> {
        let mut results = Vec::new();
        for round in 1..=through {
            results.extend(self.load_results(round).await?);
        }
        Ok(results)
    }

    pub async fn save_aggregation(&self, aggregation: &Aggregation) -> StorageResult<()> {
        self.save(self.key(RecordKind::Aggregation), aggregation).await
    }

    pub async fn load_aggregation(&self) -> StorageResult<Option<Aggregation>> {
        self.load(self.key(RecordKind::Aggregation)).await
    }

    pub async fn save_report(&self, report: &Report) -> StorageResult<()> {
        self.save(self.key(RecordKind::Report), report).await
    }

    pub async fn load_report(&self) -> StorageResult<Option<Report>> {
        self.load(self.key(RecordKind::Report)).await
    }
}

fn decode<T: DeserializeOwned>(key: &RecordKey, data: serde_json::Value) -> StorageResult<T> {
    serde_json::from_value(data).map_err(|e| StorageError::Corrupt {
        key: key.to_string(),
        message: e.to_string(),
    })
}
