//! SQLite implementation of the saga store (WAL + checkpoints).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::adapters::sqlite::parse_datetime;
use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{SagaInstance, WalEntry, WalEventKind};
use crate::domain::ports::SagaStore;

#[derive(Clone)]
pub struct SqliteSagaStore {
    pool: SqlitePool,
}

impl SqliteSagaStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SagaStore for SqliteSagaStore {
    async fn append_wal(&self, entry: &WalEntry) -> EngineResult<()> {
        let payload_json = entry.payload.as_ref().map(serde_json::to_string).transpose()?;
        sqlx::query(
            "INSERT INTO saga_wal (saga_id, sequence, kind, step_id, payload, error, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.saga_id)
        .bind(entry.sequence as i64)
        .bind(entry.kind.as_str())
        .bind(&entry.step_id)
        .bind(payload_json)
        .bind(&entry.error)
        .bind(entry.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_wal(&self, saga_id: &str) -> EngineResult<Vec<WalEntry>> {
        let rows: Vec<WalRow> =
            sqlx::query_as("SELECT * FROM saga_wal WHERE saga_id = ? ORDER BY sequence")
                .bind(saga_id)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn purge_wal(&self, before: DateTime<Utc>) -> EngineResult<u64> {
        let result = sqlx::query("DELETE FROM saga_wal WHERE created_at < ?")
            .bind(before.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn save_checkpoint(&self, instance: &SagaInstance) -> EngineResult<()> {
        let instance_json = serde_json::to_string(instance)?;
        sqlx::query(
            "INSERT OR REPLACE INTO saga_checkpoints
             (saga_id, definition_name, state, instance, updated_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&instance.id)
        .bind(&instance.definition_name)
        .bind(instance.state.as_str())
        .bind(&instance_json)
        .bind(instance.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_checkpoint(&self, saga_id: &str) -> EngineResult<Option<SagaInstance>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT instance FROM saga_checkpoints WHERE saga_id = ?")
                .bind(saga_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(|(json,)| serde_json::from_str(&json).map_err(Into::into))
            .transpose()
    }

    async fn list_checkpoints(&self) -> EngineResult<Vec<SagaInstance>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT instance FROM saga_checkpoints ORDER BY updated_at")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter()
            .map(|(json,)| serde_json::from_str(&json).map_err(Into::into))
            .collect()
    }
}

#[derive(sqlx::FromRow)]
struct WalRow {
    saga_id: String,
    sequence: i64,
    kind: String,
    step_id: String,
    payload: Option<String>,
    error: Option<String>,
    created_at: String,
}

impl TryFrom<WalRow> for WalEntry {
    type Error = EngineError;

    fn try_from(row: WalRow) -> Result<Self, Self::Error> {
        let kind = WalEventKind::from_str(&row.kind)
            .ok_or_else(|| EngineError::Serialization(format!("bad WAL kind: {}", row.kind)))?;
        let payload = row
            .payload
            .map(|p| serde_json::from_str(&p))
            .transpose()?;

        Ok(WalEntry {
            saga_id: row.saga_id,
            sequence: row.sequence as u64,
            kind,
            step_id: row.step_id,
            payload,
            error: row.error,
            timestamp: parse_datetime(&row.created_at)?,
        })
    }
}
