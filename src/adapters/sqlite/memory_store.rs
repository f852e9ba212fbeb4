//! SQLite implementation of the memory store (the hub's L2 tier).

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::adapters::sqlite::{parse_datetime, parse_json_or_default};
use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::MemoryEntry;
use crate::domain::ports::MemoryStore;

#[derive(Clone)]
pub struct SqliteMemoryStore {
    pool: SqlitePool,
}

impl SqliteMemoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    async fn put(&self, entry: &MemoryEntry) -> EngineResult<()> {
        let vector_json = entry.vector.as_ref().map(serde_json::to_string).transpose()?;
        let metadata_json = serde_json::to_string(&entry.metadata)?;
        sqlx::query(
            "INSERT OR REPLACE INTO memories
             (session_id, entry_id, task_id, content, vector, metadata,
              strength, stability, last_review, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.session_id)
        .bind(&entry.id)
        .bind(&entry.task_id)
        .bind(&entry.content)
        .bind(vector_json)
        .bind(&metadata_json)
        .bind(entry.strength)
        .bind(entry.stability)
        .bind(entry.last_review.to_rfc3339())
        .bind(entry.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, session_id: &str, entry_id: &str) -> EngineResult<Option<MemoryEntry>> {
        let row: Option<MemoryRow> =
            sqlx::query_as("SELECT * FROM memories WHERE session_id = ? AND entry_id = ?")
                .bind(session_id)
                .bind(entry_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn delete(&self, session_id: &str, entry_id: &str) -> EngineResult<()> {
        sqlx::query("DELETE FROM memories WHERE session_id = ? AND entry_id = ?")
            .bind(session_id)
            .bind(entry_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_session(&self, session_id: &str) -> EngineResult<Vec<MemoryEntry>> {
        let rows: Vec<MemoryRow> =
            sqlx::query_as("SELECT * FROM memories WHERE session_id = ? ORDER BY created_at")
                .bind(session_id)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_all(&self) -> EngineResult<Vec<MemoryEntry>> {
        let rows: Vec<MemoryRow> =
            sqlx::query_as("SELECT * FROM memories ORDER BY session_id, created_at")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[derive(sqlx::FromRow)]
struct MemoryRow {
    session_id: String,
    entry_id: String,
    task_id: Option<String>,
    content: String,
    vector: Option<String>,
    metadata: String,
    strength: f64,
    stability: f64,
    last_review: String,
    created_at: String,
}

impl TryFrom<MemoryRow> for MemoryEntry {
    type Error = EngineError;

    fn try_from(row: MemoryRow) -> Result<Self, Self::Error> {
        let vector: Option<Vec<f32>> = row
            .vector
            .map(|v| serde_json::from_str(&v))
            .transpose()?;
        let metadata: HashMap<String, String> = parse_json_or_default(Some(row.metadata))?;

        Ok(MemoryEntry {
            id: row.entry_id,
            session_id: row.session_id,
            task_id: row.task_id,
            content: row.content,
            vector,
            metadata,
            strength: row.strength,
            stability: row.stability,
            last_review: parse_datetime(&row.last_review)?,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}
