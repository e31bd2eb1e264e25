use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info, warn};

use super::{sort_records, RecordKey, RecordKind, StateStore, StoredRecord};
use crate::error::{StorageError, StorageResult};
use crate::model::TaskKind;

const SESSION_FILE: &str = "session.json";

/// File-backed state store: one JSON document per record.
///
/// Layout under the root directory:
///
/// ```text
/// <session>/<kind>.json
/// <session>/round_<N>/<kind>.json
/// <session>/round_<N>/tasks/<kind>-<task>.json
/// ```
#[derive(Debug, Clone)]
pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    /// Open (creating if needed) a store rooted at `root` and remove temp
    /// files left behind by interrupted writes.
    pub async fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;

        let store = Self { root };
        let removed = store.recover_interrupted_writes().await;
        info!(
            root = %store.root.display(),
            removed_temp_files = removed,
            "File state store opened"
        );
        Ok(store)
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    fn round_dir(&self, session_id: &str, round: u32) -> PathBuf {
        self.session_dir(session_id).join(format!("round_{}", round))
    }

    fn path_for(&self, key: &RecordKey) -> PathBuf {
        match (key.round, &key.task_id) {
            (Some(round), Some(task_id)) => self
                .round_dir(&key.session_id, round)
                .join("tasks")
                .join(format!("{}-{}.json", key.kind, task_id)),
            (Some(round), None) => self
                .round_dir(&key.session_id, round)
                .join(format!("{}.json", key.kind)),
            _ => self
                .session_dir(&key.session_id)
                .join(format!("{}.json", key.kind)),
        }
    }

    /// Write `content` to a uniquely named temp file beside `path` and fsync
    /// it. The caller moves it into place.
    async fn write_temp(&self, path: &Path, content: &[u8]) -> StorageResult<PathBuf> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp_path = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        fs::write(&tmp_path, content).await?;

        let sync_path = tmp_path.clone();
        let synced = tokio::task::spawn_blocking(move || {
            std::fs::File::open(&sync_path).and_then(|file| file.sync_all())
        })
        .await;

        match synced {
            Ok(Ok(())) => Ok(tmp_path),
            Ok(Err(e)) => {
                let _ = fs::remove_file(&tmp_path).await;
                Err(StorageError::Io(e))
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp_path).await;
                Err(StorageError::Io(std::io::Error::other(e.to_string())))
            }
        }
    }

    async fn recover_interrupted_writes(&self) -> usize {
        let mut removed = 0;
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let Ok(mut entries) = fs::read_dir(&dir).await else {
                continue;
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
                if is_dir {
                    pending.push(path);
                } else if path.extension().is_some_and(|ext| ext == "tmp") {
                    debug!(path = %path.display(), "Removing interrupted write");
                    if fs::remove_file(&path).await.is_ok() {
                        removed += 1;
                    }
                }
            }
        }
        removed
    }

    async fn read_record(&self, key: &RecordKey, path: &Path) -> StorageResult<Option<serde_json::Value>> {
        let content = match fs::read(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&content)
            .map(Some)
            .map_err(|e| StorageError::Corrupt {
                key: key.to_string(),
                message: e.to_string(),
            })
    }
}

/// Parse `<kind>-<task>.json` back into its parts.
fn parse_task_file(name: &str) -> Option<(RecordKind, TaskKind, String)> {
    let stem = name.strip_suffix(".json")?;
    let (kind, task_id) = stem.rsplit_once('-')?;
    match kind.parse::<RecordKind>().ok()? {
        RecordKind::DataResult => Some((RecordKind::DataResult, TaskKind::Data, task_id.to_string())),
        RecordKind::ResearchResult => Some((
            RecordKind::ResearchResult,
            TaskKind::Research,
            task_id.to_string(),
        )),
        _ => None,
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn save(&self, key: &RecordKey, data: &serde_json::Value) -> StorageResult<()> {
        key.validate()?;
        let path = self.path_for(key);
        let content = serde_json::to_vec_pretty(data)?;

        let tmp_path = self.write_temp(&path, &content).await?;
        if let Err(e) = fs::rename(&tmp_path, &path).await {
            warn!(key = %key, error = %e, "Atomic rename failed");
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        debug!(key = %key, "Record saved");
        Ok(())
    }

    async fn save_if_absent(
        &self,
        key: &RecordKey,
        data: &serde_json::Value,
    ) -> StorageResult<bool> {
        key.validate()?;
        let path = self.path_for(key);
        let content = serde_json::to_vec_pretty(data)?;

        // hard_link fails if the target exists, so the check and the write
        // are a single step
        let tmp_path = self.write_temp(&path, &content).await?;
        let linked = fs::hard_link(&tmp_path, &path).await;
        let _ = fs::remove_file(&tmp_path).await;

        match linked {
            Ok(()) => {
                debug!(key = %key, "Record saved");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                debug!(key = %key, "Record already present, keeping first write");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn load(&self, key: &RecordKey) -> StorageResult<Option<serde_json::Value>> {
        key.validate()?;
        let path = self.path_for(key);
        self.read_record(key, &path).await
    }

    async fn list_round(&self, session_id: &str, round: u32) -> StorageResult<Vec<StoredRecord>> {
        RecordKey::round(session_id, RecordKind::Plan, round).validate()?;
        let tasks_dir = self.round_dir(session_id, round).join("tasks");

        let mut entries = match fs::read_dir(&tasks_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some((_, task_kind, task_id)) = name.to_str().and_then(parse_task_file) else {
                continue;
            };
            let key = RecordKey::task(session_id, task_kind, round, task_id);
            if let Some(data) = self.read_record(&key, &entry.path()).await? {
                records.push(StoredRecord { key, data });
            }
        }

        sort_records(&mut records);
        Ok(records)
    }

    async fn list_sessions(&self) -> StorageResult<Vec<String>> {
        let mut sessions = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.join(SESSION_FILE).is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                sessions.push(name.to_string());
            }
        }
        sessions.sort();
        Ok(sessions)
    }

    async fn delete_session(&self, session_id: &str) -> StorageResult<()> {
        RecordKey::session(session_id, RecordKind::Session).validate()?;
        match fs::remove_dir_all(self.session_dir(session_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
