use async_trait::async_trait;
use chrono::Utc;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

use super::{sort_records, RecordKey, RecordKind, StateStore, StoredRecord};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};
use crate::model::TaskKind;

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed state store
#[derive(Clone)]
pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    /// Create a new SQLite store
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// In-memory database, for tests. Single connection so every query sees
    /// the same database.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
            StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            }
        })?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    #[cfg(test)]
    fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn parse_data(key: &RecordKey, data: &str) -> StorageResult<serde_json::Value> {
    serde_json::from_str(data).map_err(|e| StorageError::Corrupt {
        key: key.to_string(),
        message: e.to_string(),
    })
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn save(&self, key: &RecordKey, data: &serde_json::Value) -> StorageResult<()> {
        key.validate()?;
        let data = serde_json::to_string(data)?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO records (session_id, kind, round, task_id, data, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (session_id, kind, round, task_id)
            DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at
            "#,
        )
        .bind(&key.session_id)
        .bind(key.kind.as_str())
        .bind(key.round_or_zero() as i64)
        .bind(key.task_or_empty())
        .bind(&data)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_if_absent(
        &self,
        key: &RecordKey,
        data: &serde_json::Value,
    ) -> StorageResult<bool> {
        key.validate()?;
        let data = serde_json::to_string(data)?;
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO records (session_id, kind, round, task_id, data, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&key.session_id)
        .bind(key.kind.as_str())
        .bind(key.round_or_zero() as i64)
        .bind(key.task_or_empty())
        .bind(&data)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn load(&self, key: &RecordKey) -> StorageResult<Option<serde_json::Value>> {
        key.validate()?;
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT data
            FROM records
            WHERE session_id = ? AND kind = ? AND round = ? AND task_id = ?
            "#,
        )
        .bind(&key.session_id)
        .bind(key.kind.as_str())
        .bind(key.round_or_zero() as i64)
        .bind(key.task_or_empty())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(data,)| parse_data(key, &data)).transpose()
    }

    async fn list_round(&self, session_id: &str, round: u32) -> StorageResult<Vec<StoredRecord>> {
        let rows: Vec<RecordRow> = sqlx::query_as(
            r#"
            SELECT kind, task_id, data
            FROM records
            WHERE session_id = ? AND round = ? AND kind IN ('data_result', 'research_result')
            "#,
        )
        .bind(session_id)
        .bind(round as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let task_kind = match row.kind.parse::<RecordKind>()? {
                RecordKind::DataResult => TaskKind::Data,
                _ => TaskKind::Research,
            };
            let key = RecordKey::task(session_id, task_kind, round, row.task_id);
            let data = parse_data(&key, &row.data)?;
            records.push(StoredRecord { key, data });
        }

        sort_records(&mut records);
        Ok(records)
    }

    async fn list_sessions(&self) -> StorageResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT session_id
            FROM records
            WHERE kind = 'session'
            ORDER BY session_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn delete_session(&self, session_id: &str) -> StorageResult<()> {
        sqlx::query("DELETE FROM records WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

// Internal row type for SQLx mapping
#[derive(sqlx::FromRow)]
struct RecordRow {
    kind: String,
    task_id: String,
    data: String,
}
