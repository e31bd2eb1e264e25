use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{sort_records, RecordKey, RecordKind, RecordScope, StateStore, StoredRecord};
use crate::error::StorageResult;

/// In-memory state store. Nothing survives the process.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    records: RwLock<HashMap<RecordKey, serde_json::Value>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn save(&self, key: &RecordKey, data: &serde_json::Value) -> StorageResult<()> {
        key.validate()?;
        self.records.write().await.insert(key.clone(), data.clone());
        Ok(())
    }

    async fn save_if_absent(
        &self,
        key: &RecordKey,
        data: &serde_json::Value,
    ) -> StorageResult<bool> {
        key.validate()?;
        let mut records = self.records.write().await;
        if records.contains_key(key) {
            return Ok(false);
        }
        records.insert(key.clone(), data.clone());
        Ok(true)
    }

    async fn load(&self, key: &RecordKey) -> StorageResult<Option<serde_json::Value>> {
        key.validate()?;
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn list_round(&self, session_id: &str, round: u32) -> StorageResult<Vec<StoredRecord>> {
        let mut records: Vec<StoredRecord> = self
            .records
            .read()
            .await
            .iter()
            .filter(|(key, _)| {
                key.session_id == session_id
                    && key.round == Some(round)
                    && key.kind.scope() == RecordScope::Task
            })
            .map(|(key, data)| StoredRecord {
                key: key.clone(),
                data: data.clone(),
            })
            .collect();
        sort_records(&mut records);
        Ok(records)
    }

    async fn list_sessions(&self) -> StorageResult<Vec<String>> {
        let mut sessions: Vec<String> = self
            .records
            .read()
            .await
            .keys()
            .filter(|key| key.kind == RecordKind::Session)
            .map(|key| key.session_id.clone())
            .collect();
        sessions.sort();
        Ok(sessions)
    }

    async fn delete_session(&self, session_id: &str) -> StorageResult<()> {
        self.records
            .write()
            .await
            .retain(|key, _| key.session_id != session_id);
        Ok(())
    }
}
